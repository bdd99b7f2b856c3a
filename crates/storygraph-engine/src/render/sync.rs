use std::collections::{HashMap, HashSet};

use storygraph_core::{DiffResult, ElementId, GraphElement, Position};

use super::{LayoutConfig, SceneRenderer};
use crate::events::{EventSink, SceneEvent};
use crate::graph::placement::{Bounds, NodePlacer, PlacementRegistry, PlacementReport};
use crate::graph::style::{StyleAttrs, StyleMutation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Remove,
    Add,
    Update,
    Layout,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub removed: Vec<ElementId>,
    pub added: Vec<ElementId>,
    pub updated: Vec<ElementId>,
    pub placement: PlacementReport,
    pub layout_ran: bool,
    pub failed_phases: Vec<SyncPhase>,
    pub pending: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
            && self.added.is_empty()
            && self.updated.is_empty()
            && self.failed_phases.is_empty()
    }

    pub fn is_structural(&self) -> bool {
        !self.removed.is_empty() || !self.added.is_empty()
    }
}

#[derive(Debug, Default)]
struct Pending {
    removed: Vec<ElementId>,
    added: Vec<GraphElement>,
    updated: Vec<GraphElement>,
}

impl Pending {
    fn len(&self) -> usize {
        self.removed.len() + self.added.len() + self.updated.len()
    }
}

/// Applies diffs to a renderer with as few calls as possible.
pub struct SceneSynchronizer {
    placer: NodePlacer,
    bounds: Bounds,
    layout: LayoutConfig,
    pending: Pending,
    applied_styles: HashMap<ElementId, StyleAttrs>,
    events: EventSink,
}

impl SceneSynchronizer {
    pub fn new(placer: NodePlacer, bounds: Bounds, layout: LayoutConfig, events: EventSink) -> Self {
        Self {
            placer,
            bounds,
            layout,
            pending: Pending::default(),
            applied_styles: HashMap::new(),
            events,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn reset(&mut self) {
        self.pending = Pending::default();
        self.applied_styles.clear();
    }

    pub fn sync<R: SceneRenderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        diff: &DiffResult,
        registry: &mut PlacementRegistry,
    ) -> SyncReport {
        let (removes, mut adds, updates) = self.plan(renderer, diff);
        let mut report = SyncReport::default();
        if removes.is_empty() && adds.is_empty() && updates.is_empty() {
            report.pending = self.pending.len();
            return report;
        }

        renderer.begin_batch();

        if !removes.is_empty() {
            match renderer.remove_elements_by_id(&removes) {
                Ok(()) => {
                    for id in &removes {
                        registry.remove(id);
                        self.applied_styles.remove(id);
                    }
                    report.removed = removes;
                }
                Err(e) => {
                    tracing::warn!(error = %e, count = removes.len(), "remove phase failed, keeping as pending");
                    report.failed_phases.push(SyncPhase::Remove);
                    self.pending.removed = removes;
                }
            }
        }

        if !adds.is_empty() {
            for el in adds.iter_mut() {
                if let GraphElement::Node { id, position, .. } = el {
                    if let Some(p) = registry.get(id) {
                        *position = Some(p);
                    }
                }
            }
            let existing: Vec<Position> = registry
                .iter()
                .filter(|(id, _)| renderer.contains(id))
                .map(|(_, p)| *p)
                .collect();
            report.placement = self.placer.place(&mut adds, &existing, self.bounds);

            match renderer.add_elements(&adds) {
                Ok(()) => {
                    for el in &adds {
                        if let Some(p) = el.position() {
                            registry.commit(el.id().clone(), p);
                        }
                        self.applied_styles
                            .insert(el.id().clone(), StyleAttrs::display_for(el));
                    }
                    report.added = adds.iter().map(|e| e.id().clone()).collect();
                }
                Err(e) => {
                    tracing::warn!(error = %e, count = adds.len(), "add phase failed, keeping as pending");
                    report.failed_phases.push(SyncPhase::Add);
                    self.pending.added = adds;
                }
            }
        }

        let mut failed_updates = Vec::new();
        for el in updates {
            let attrs = StyleAttrs::display_for(&el);
            match renderer.set_style(el.id(), &attrs) {
                Ok(()) => {
                    report.updated.push(el.id().clone());
                    self.applied_styles.insert(el.id().clone(), attrs);
                }
                Err(e) => {
                    tracing::warn!(error = %e, id = %el.id(), "restyle failed, keeping as pending");
                    failed_updates.push(el);
                }
            }
        }
        if !failed_updates.is_empty() {
            report.failed_phases.push(SyncPhase::Update);
            self.pending.updated = failed_updates;
        }

        if report.is_structural() {
            self.run_layout(renderer, registry, &mut report);
        }

        renderer.end_batch();

        report.pending = self.pending.len();
        tracing::debug!(
            removed = report.removed.len(),
            added = report.added.len(),
            updated = report.updated.len(),
            fallbacks = report.placement.fallbacks.len(),
            layout = report.layout_ran,
            pending = report.pending,
            "scene synced"
        );
        report
    }

    pub fn apply_styles<R: SceneRenderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        mutations: &[StyleMutation],
    ) -> usize {
        let live: Vec<&StyleMutation> = mutations.iter().filter(|m| renderer.contains(&m.id)).collect();
        if live.is_empty() {
            return 0;
        }
        renderer.begin_batch();
        let mut applied = 0;
        for m in live {
            match renderer.set_style(&m.id, &m.to_attrs()) {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!(error = %e, id = %m.id, "class change failed"),
            }
        }
        renderer.end_batch();
        applied
    }

    fn plan<R: SceneRenderer + ?Sized>(
        &mut self,
        renderer: &R,
        diff: &DiffResult,
    ) -> (Vec<ElementId>, Vec<GraphElement>, Vec<GraphElement>) {
        let pending = std::mem::take(&mut self.pending);
        let superseded: HashSet<&ElementId> = diff
            .added
            .iter()
            .chain(&diff.removed)
            .chain(&diff.updated)
            .map(|e| e.id())
            .collect();

        let mut removes: Vec<ElementId> = pending
            .removed
            .into_iter()
            .filter(|id| !superseded.contains(id))
            .chain(diff.removed.iter().map(|e| e.id().clone()))
            .filter(|id| renderer.contains(id))
            .collect();
        removes.sort();
        removes.dedup();
        let removing: HashSet<&ElementId> = removes.iter().collect();

        let mut adds = Vec::new();
        let mut updates = Vec::new();
        let candidates = pending
            .added
            .into_iter()
            .filter(|e| !superseded.contains(e.id()))
            .chain(diff.added.iter().cloned());
        for el in candidates {
            if renderer.contains(el.id()) && !removing.contains(el.id()) {
                // Already on screen: at most a restyle.
                updates.push(el);
            } else {
                adds.push(el);
            }
        }

        let restyles = pending
            .updated
            .into_iter()
            .filter(|e| !superseded.contains(e.id()))
            .chain(diff.updated.iter().cloned());
        updates.extend(restyles);

        let mut seen = HashSet::new();
        updates.retain(|el| {
            renderer.contains(el.id())
                && !removing.contains(el.id())
                && seen.insert(el.id().clone())
                && self.applied_styles.get(el.id()) != Some(&StyleAttrs::display_for(el))
        });
        let mut seen_adds = HashSet::new();
        adds.retain(|el| seen_adds.insert(el.id().clone()));
        // Nodes before edges so endpoints exist when edges arrive.
        adds.sort_by_key(|el| el.is_edge());

        (removes, adds, updates)
    }

    fn run_layout<R: SceneRenderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        registry: &mut PlacementRegistry,
        report: &mut SyncReport,
    ) {
        match renderer.run_layout(&self.layout) {
            Ok(()) => {
                report.layout_ran = true;
                if self.layout.is_force() {
                    let ids: Vec<ElementId> = registry.iter().map(|(id, _)| id.clone()).collect();
                    for id in ids {
                        if let Some(p) = renderer.position(&id) {
                            registry.moved(id, p);
                        }
                    }
                }
                let ids = renderer.element_ids();
                let nodes = ids.iter().filter(|id| renderer.position(id).is_some()).count();
                self.events.emit(SceneEvent::LayoutComplete {
                    nodes,
                    edges: ids.len() - nodes,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "layout pass failed");
                report.failed_phases.push(SyncPhase::Layout);
            }
        }
    }
}
