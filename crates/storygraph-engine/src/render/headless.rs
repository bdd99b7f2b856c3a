use std::collections::{BTreeMap, HashMap, HashSet};

use storygraph_core::{ElementId, GraphElement, Position};

use super::{ForceParams, LayoutConfig, RenderError, SceneRenderer};
use crate::graph::placement::Bounds;
use crate::graph::style::{ClassChange, StyleAttrs, VisualClass};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    BeginBatch,
    EndBatch,
    Add(Vec<ElementId>),
    Remove(Vec<ElementId>),
    SetStyle(ElementId, StyleAttrs),
    SetPosition(ElementId, Position),
    RunLayout { force: bool },
}

impl RenderCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, RenderCall::BeginBatch | RenderCall::EndBatch)
    }
}

#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    elements: BTreeMap<ElementId, GraphElement>,
    positions: HashMap<ElementId, Position>,
    velocities: HashMap<ElementId, (f64, f64)>,
    styles: HashMap<ElementId, StyleAttrs>,
    classes: HashMap<ElementId, VisualClass>,
    calls: Vec<RenderCall>,
    fail_next: HashSet<&'static str>,
    batch_depth: u32,
    repaints: u32,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` (for example `"add_elements"`) fail.
    pub fn fail_once(&mut self, op: &'static str) {
        self.fail_next.insert(op);
    }

    pub fn calls(&self) -> &[RenderCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<RenderCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn mutation_count(&self) -> usize {
        self.calls.iter().filter(|c| c.is_mutation()).count()
    }

    pub fn repaints(&self) -> u32 {
        self.repaints
    }

    pub fn element(&self, id: &ElementId) -> Option<&GraphElement> {
        self.elements.get(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn style_of(&self, id: &ElementId) -> Option<&StyleAttrs> {
        self.styles.get(id)
    }

    pub fn class_of(&self, id: &ElementId) -> Option<VisualClass> {
        self.classes.get(id).copied()
    }

    fn check(&mut self, op: &'static str) -> Result<(), RenderError> {
        if self.fail_next.remove(op) {
            return Err(RenderError::Rejected {
                op,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn node_ids(&self) -> Vec<ElementId> {
        self.elements
            .values()
            .filter(|e| e.is_node())
            .map(|e| e.id().clone())
            .collect()
    }

    fn clamp_all(&mut self, bounds: Bounds, padding: f64) {
        for p in self.positions.values_mut() {
            *p = bounds.clamp_padded(*p, padding);
        }
    }

    fn force_layout(&mut self, params: &ForceParams) {
        let ids: Vec<ElementId> = self
            .node_ids()
            .into_iter()
            .filter(|id| self.positions.contains_key(id))
            .collect();
        if ids.len() <= 1 {
            return;
        }

        let link_dist = params.link_distance.max(0.1);
        let repulsion = params.repulsion.max(0.0);
        let damping = params.damping.clamp(0.0, 1.0);
        let max_step = params.max_step.max(0.001);
        let dt = 0.1;
        let k = 0.6;

        let springs: Vec<(ElementId, ElementId)> = self
            .elements
            .values()
            .filter_map(|e| e.endpoints())
            .filter(|(s, t)| self.positions.contains_key(*s) && self.positions.contains_key(*t))
            .map(|(s, t)| (s.clone(), t.clone()))
            .collect();

        for _ in 0..params.iterations {
            let mut forces: HashMap<&ElementId, (f64, f64)> =
                ids.iter().map(|id| (id, (0.0, 0.0))).collect();
            let pos = |id: &ElementId| self.positions.get(id).copied().unwrap_or_default();

            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    let (pa, pb) = (pos(&ids[i]), pos(&ids[j]));
                    let (dx, dy) = (pa.x - pb.x, pa.y - pb.y);
                    let dist2 = (dx * dx + dy * dy).max(0.01);
                    let len = dist2.sqrt();
                    let f = repulsion / dist2;
                    let (fx, fy) = (f * dx / len, f * dy / len);
                    add(&mut forces, &ids[i], fx, fy);
                    add(&mut forces, &ids[j], -fx, -fy);
                }
            }

            for (s, t) in &springs {
                let (pa, pb) = (pos(s), pos(t));
                let (dx, dy) = (pb.x - pa.x, pb.y - pa.y);
                let len = (dx * dx + dy * dy).sqrt().max(0.001);
                let f = k * (len - link_dist);
                let (fx, fy) = (f * dx / len, f * dy / len);
                add(&mut forces, s, fx, fy);
                add(&mut forces, t, -fx, -fy);
            }

            let forces: Vec<(ElementId, (f64, f64))> =
                forces.into_iter().map(|(id, f)| (id.clone(), f)).collect();
            for (id, (fx, fy)) in forces {
                let v = self.velocities.entry(id.clone()).or_insert((0.0, 0.0));
                v.0 = (v.0 + fx * dt) * damping;
                v.1 = (v.1 + fy * dt) * damping;
                let (mut sx, mut sy) = (v.0 * dt, v.1 * dt);
                let step = (sx * sx + sy * sy).sqrt();
                if step > max_step {
                    sx = sx / step * max_step;
                    sy = sy / step * max_step;
                }
                if let Some(p) = self.positions.get_mut(&id) {
                    p.x += sx;
                    p.y += sy;
                }
            }
        }
    }
}

fn add(forces: &mut HashMap<&ElementId, (f64, f64)>, id: &ElementId, fx: f64, fy: f64) {
    if let Some(f) = forces.get_mut(id) {
        f.0 += fx;
        f.1 += fy;
    }
}

impl SceneRenderer for HeadlessRenderer {
    fn add_elements(&mut self, elements: &[GraphElement]) -> Result<(), RenderError> {
        self.calls
            .push(RenderCall::Add(elements.iter().map(|e| e.id().clone()).collect()));
        self.check("add_elements")?;

        // Validate the whole call before touching the scene.
        let incoming: HashSet<&ElementId> = elements.iter().filter(|e| e.is_node()).map(|e| e.id()).collect();
        for el in elements {
            if self.elements.contains_key(el.id()) {
                return Err(RenderError::Rejected {
                    op: "add_elements",
                    reason: format!("duplicate id {}", el.id()),
                });
            }
            if let Some((s, t)) = el.endpoints() {
                for end in [s, t] {
                    if !self.elements.contains_key(end) && !incoming.contains(end) {
                        return Err(RenderError::Rejected {
                            op: "add_elements",
                            reason: format!("edge {} references missing node {}", el.id(), end),
                        });
                    }
                }
            }
        }

        for el in elements {
            if let Some(p) = el.position() {
                self.positions.insert(el.id().clone(), p);
            } else if el.is_node() {
                self.positions.insert(el.id().clone(), Position::default());
            }
            self.elements.insert(el.id().clone(), el.clone());
        }
        Ok(())
    }

    fn remove_elements_by_id(&mut self, ids: &[ElementId]) -> Result<(), RenderError> {
        self.calls.push(RenderCall::Remove(ids.to_vec()));
        self.check("remove_elements_by_id")?;

        let gone: HashSet<&ElementId> = ids.iter().collect();
        // Edges hanging off a removed node go with it.
        let mut doomed: Vec<ElementId> = self
            .elements
            .values()
            .filter(|e| {
                gone.contains(e.id())
                    || e.endpoints()
                        .is_some_and(|(s, t)| gone.contains(s) || gone.contains(t))
            })
            .map(|e| e.id().clone())
            .collect();
        doomed.sort();
        for id in doomed {
            self.elements.remove(&id);
            self.positions.remove(&id);
            self.velocities.remove(&id);
            self.styles.remove(&id);
            self.classes.remove(&id);
        }
        Ok(())
    }

    fn set_style(&mut self, id: &ElementId, attrs: &StyleAttrs) -> Result<(), RenderError> {
        self.calls.push(RenderCall::SetStyle(id.clone(), attrs.clone()));
        self.check("set_style")?;
        if !self.elements.contains_key(id) {
            return Err(RenderError::UnknownElement(id.clone()));
        }

        let current = self.styles.entry(id.clone()).or_default();
        if let Some(label) = &attrs.label {
            current.label = Some(label.clone());
        }
        if let Some(w) = attrs.width {
            current.width = Some(w);
        }
        if let Some(c) = &attrs.color {
            current.color = Some(c.clone());
        }
        match attrs.class {
            Some(ClassChange::Set(c)) => {
                self.classes.insert(id.clone(), c);
            }
            Some(ClassChange::Clear) => {
                self.classes.remove(id);
            }
            None => {}
        }
        Ok(())
    }

    fn position(&self, id: &ElementId) -> Option<Position> {
        self.positions.get(id).copied()
    }

    fn set_position(&mut self, id: &ElementId, p: Position) -> Result<(), RenderError> {
        self.calls.push(RenderCall::SetPosition(id.clone(), p));
        self.check("set_position")?;
        match self.positions.get_mut(id) {
            Some(slot) => {
                *slot = p;
                Ok(())
            }
            None => Err(RenderError::UnknownElement(id.clone())),
        }
    }

    fn run_layout(&mut self, config: &LayoutConfig) -> Result<(), RenderError> {
        self.calls.push(RenderCall::RunLayout {
            force: config.is_force(),
        });
        self.check("run_layout")?;
        match config {
            LayoutConfig::Preset { bounds, padding } => self.clamp_all(*bounds, *padding),
            LayoutConfig::Force {
                params,
                bounds,
                padding,
            } => {
                self.force_layout(params);
                self.clamp_all(*bounds, *padding);
            }
        }
        Ok(())
    }

    fn begin_batch(&mut self) {
        self.calls.push(RenderCall::BeginBatch);
        self.batch_depth += 1;
    }

    fn end_batch(&mut self) {
        self.calls.push(RenderCall::EndBatch);
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 {
            self.repaints += 1;
        }
    }

    fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    fn element_ids(&self) -> Vec<ElementId> {
        self.elements.keys().cloned().collect()
    }
}
