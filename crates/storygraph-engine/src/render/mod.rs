pub mod headless;
pub mod sync;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use storygraph_core::{ElementId, GraphElement, Position};

use crate::graph::placement::Bounds;
use crate::graph::style::StyleAttrs;

pub use headless::{HeadlessRenderer, RenderCall};
pub use sync::{SceneSynchronizer, SyncPhase, SyncReport};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },
    #[error("unknown element {0}")]
    UnknownElement(ElementId),
    #[error("layout failed: {0}")]
    Layout(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParams {
    pub link_distance: f64,
    pub repulsion: f64,
    pub damping: f64,
    pub max_step: f64,
    pub iterations: u32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            link_distance: 120.0,
            repulsion: 9000.0,
            damping: 0.85,
            max_step: 25.0,
            iterations: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutConfig {
    Preset { bounds: Bounds, padding: f64 },
    Force {
        params: ForceParams,
        bounds: Bounds,
        padding: f64,
    },
}

impl LayoutConfig {
    pub fn is_force(&self) -> bool {
        matches!(self, LayoutConfig::Force { .. })
    }
}

/// Mutation surface of the scene-graph renderer.
///
/// Implementations are not reentrant; callers group mutations between
/// `begin_batch` and `end_batch` so the scene repaints once.
pub trait SceneRenderer {
    fn add_elements(&mut self, elements: &[GraphElement]) -> Result<(), RenderError>;
    fn remove_elements_by_id(&mut self, ids: &[ElementId]) -> Result<(), RenderError>;
    fn set_style(&mut self, id: &ElementId, attrs: &StyleAttrs) -> Result<(), RenderError>;
    fn position(&self, id: &ElementId) -> Option<Position>;
    fn set_position(&mut self, id: &ElementId, p: Position) -> Result<(), RenderError>;
    fn run_layout(&mut self, config: &LayoutConfig) -> Result<(), RenderError>;
    fn begin_batch(&mut self);
    fn end_batch(&mut self);
    fn contains(&self, id: &ElementId) -> bool;
    fn element_ids(&self) -> Vec<ElementId>;
}
