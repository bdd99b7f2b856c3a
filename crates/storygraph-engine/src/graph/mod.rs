pub mod diff;
pub mod elements;
pub mod placement;
pub mod replay;
pub mod search;
pub mod selection;
pub mod style;

pub use diff::diff;
pub use elements::{BuildOutput, ElementBuilder};
pub use placement::{Bounds, NodePlacer, PlacementParams, PlacementRegistry, PlacementReport};
pub use search::{SearchFilterEngine, SearchResult};
pub use selection::{GraphIndex, SelectionHighlighter, SelectionState, TapTarget};
pub use style::{StyleAttrs, StyleMutation, VisualClass};
