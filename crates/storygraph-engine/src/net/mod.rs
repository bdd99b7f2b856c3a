pub mod loader;

use async_trait::async_trait;
use thiserror::Error;

use storygraph_core::{Envelope, FineGraph, MacroGraph};

pub use loader::{ChapterLoader, LoadOutcome, LoadSource};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Remote graph endpoints. A failed envelope is a miss, not an error; `Err`
/// is reserved for transport and decoding problems.
#[async_trait]
pub trait GraphFetcher: Send + Sync {
    async fn fetch_macro_graph(
        &self,
        book_id: &str,
        up_to_chapter: u32,
    ) -> Result<Envelope<MacroGraph>, FetchError>;

    async fn fetch_fine_graph(
        &self,
        book_id: &str,
        chapter_idx: u32,
        event_idx: u32,
    ) -> Result<Envelope<FineGraph>, FetchError>;
}
