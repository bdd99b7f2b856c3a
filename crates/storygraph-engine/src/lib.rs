pub mod cache;
pub mod events;
pub mod graph;
pub mod net;
pub mod render;
pub mod session;
pub mod store;
pub mod util;

pub use cache::SnapshotStore;
pub use events::{EventSink, SceneEvent};
pub use session::{GraphSession, NavigationOutcome, Navigator, NavigationReport, StateSource};
pub use util::config::EngineConfig;
