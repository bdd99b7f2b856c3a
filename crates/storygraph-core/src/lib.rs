mod element;
mod model;
mod wire;

pub use element::{DiffResult, EdgeData, ElementId, GraphElement, NodeData, Position};
pub use model::{
    canonical_cmp, BaseSnapshot, ChapterSnapshotCache, CharacterId, CharacterState, EventDelta,
    FlatEvent, MaterializedState, RelationKey, RelationState,
};
pub use wire::{Envelope, FineGraph, MacroGraph};
