use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use storygraph_core::{ElementId, GraphElement, Position};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 800.0,
        }
    }
}

impl Bounds {
    pub fn center(&self) -> Position {
        Position::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn contains_padded(&self, p: &Position, padding: f64) -> bool {
        p.x >= padding && p.x <= self.width - padding && p.y >= padding && p.y <= self.height - padding
    }

    pub fn clamp_padded(&self, p: Position, padding: f64) -> Position {
        let max_x = (self.width - padding).max(padding);
        let max_y = (self.height - padding).max(padding);
        Position::new(p.x.clamp(padding, max_x), p.y.clamp(padding, max_y))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementParams {
    pub initial_radius: f64,
    pub angle_step: f64,
    pub radius_step: f64,
    pub max_attempts: u32,
    pub padding: f64,
    pub node_diameter: f64,
    pub separation_factor: f64,
    pub jitter: f64,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self {
            initial_radius: 40.0,
            angle_step: 0.5,
            radius_step: 6.0,
            max_attempts: 200,
            padding: 30.0,
            node_diameter: 40.0,
            separation_factor: 1.25,
            jitter: 25.0,
        }
    }
}

impl PlacementParams {
    pub fn min_separation(&self) -> f64 {
        self.node_diameter * self.separation_factor
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementReport {
    pub placed: Vec<ElementId>,
    pub fallbacks: Vec<ElementId>,
}

pub struct NodePlacer {
    params: PlacementParams,
    rng: StdRng,
}

impl NodePlacer {
    pub fn new(params: PlacementParams) -> Self {
        Self {
            params,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(params: PlacementParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &PlacementParams {
        &self.params
    }

    /// Assigns a position to every node in `new_nodes` that has none. Nodes
    /// that already carry a position keep it and count as obstacles, as does
    /// each node placed earlier in the same batch. Edges are ignored.
    pub fn place(
        &mut self,
        new_nodes: &mut [GraphElement],
        existing: &[Position],
        bounds: Bounds,
    ) -> PlacementReport {
        let mut taken: Vec<Position> = existing.to_vec();
        taken.extend(new_nodes.iter().filter_map(|n| n.position()));

        let mut report = PlacementReport::default();
        for el in new_nodes.iter_mut() {
            let GraphElement::Node { id, position, .. } = el else {
                continue;
            };
            if position.is_some() {
                continue;
            }
            let p = match self.spiral(&taken, bounds) {
                Some(p) => p,
                None => {
                    tracing::debug!(%id, attempts = self.params.max_attempts, "placement budget exhausted, jittering");
                    report.fallbacks.push(id.clone());
                    self.jitter(bounds)
                }
            };
            *position = Some(p);
            taken.push(p);
            report.placed.push(id.clone());
        }
        report
    }

    fn spiral(&self, taken: &[Position], bounds: Bounds) -> Option<Position> {
        let c = bounds.center();
        let min_sep = self.params.min_separation();
        (0..self.params.max_attempts).find_map(|attempt| {
            let a = f64::from(attempt);
            let angle = a * self.params.angle_step;
            let r = self.params.initial_radius + a * self.params.radius_step;
            let p = Position::new(c.x + r * angle.cos(), c.y + r * angle.sin());
            let fits = bounds.contains_padded(&p, self.params.padding)
                && taken.iter().all(|t| t.distance(&p) > min_sep);
            fits.then_some(p)
        })
    }

    fn jitter(&mut self, bounds: Bounds) -> Position {
        let c = bounds.center();
        let j = self.params.jitter.abs().max(f64::EPSILON);
        Position::new(
            c.x + self.rng.gen_range(-j..=j),
            c.y + self.rng.gen_range(-j..=j),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementRegistry {
    positions: BTreeMap<ElementId, Position>,
}

impl PlacementRegistry {
    pub fn get(&self, id: &ElementId) -> Option<Position> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn commit(&mut self, id: ElementId, p: Position) -> Position {
        *self.positions.entry(id).or_insert(p)
    }

    pub fn moved(&mut self, id: ElementId, p: Position) {
        self.positions.insert(id, p);
    }

    pub fn remove(&mut self, id: &ElementId) -> Option<Position> {
        self.positions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ElementId, &Position)> {
        self.positions.iter()
    }

    pub fn restore(&mut self, other: PlacementRegistry) -> usize {
        let mut restored = 0;
        for (id, p) in other.positions {
            if !self.positions.contains_key(&id) {
                self.positions.insert(id, p);
                restored += 1;
            }
        }
        restored
    }
}
