use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use storygraph_core::{FineGraph, MacroGraph};

use super::GraphFetcher;
use crate::cache::{codec, SnapshotStore};
use crate::store::{snapshot_key, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Memory,
    Store,
    Fetched,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<T> {
    Ready(T),
    Miss,
    Superseded,
}

impl<T> LoadOutcome<T> {
    pub fn is_superseded(&self) -> bool {
        matches!(self, LoadOutcome::Superseded)
    }
}

struct EventWalk {
    graphs: Vec<FineGraph>,
    complete: bool,
}

/// Resolves chapter caches: memory, then the key-value store, then the
/// fetch collaborator.
pub struct ChapterLoader {
    kv: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn GraphFetcher>,
    ttl: Option<Duration>,
    max_prefetch_events: u32,
}

fn superseded(token: &CancellationToken, book_id: &str, chapter_idx: u32, stage: &'static str) -> bool {
    let cancelled = token.is_cancelled();
    if cancelled {
        tracing::debug!(book = book_id, chapter = chapter_idx, stage, "load superseded");
    }
    cancelled
}

impl ChapterLoader {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn GraphFetcher>,
        ttl: Option<Duration>,
        max_prefetch_events: u32,
    ) -> Self {
        Self {
            kv,
            fetcher,
            ttl,
            max_prefetch_events: max_prefetch_events.max(1),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Makes sure `memory` holds the chapter up to `target`, if it exists
    /// anywhere. Nothing is written once `token` is cancelled.
    pub async fn load(
        &self,
        memory: &mut SnapshotStore,
        book_id: &str,
        chapter_idx: u32,
        target: i64,
        token: &CancellationToken,
    ) -> LoadOutcome<LoadSource> {
        if superseded(token, book_id, chapter_idx, "start") {
            return LoadOutcome::Superseded;
        }
        if memory.covers(book_id, chapter_idx, target) {
            tracing::debug!(book = book_id, chapter = chapter_idx, "chapter cache hit");
            return LoadOutcome::Ready(LoadSource::Memory);
        }

        let key = snapshot_key(book_id, memory.manifest(book_id), chapter_idx);
        if !memory.is_partial(book_id, chapter_idx) {
            let stored = self.kv.get(&key).await;
            if superseded(token, book_id, chapter_idx, "store read") {
                return LoadOutcome::Superseded;
            }
            match stored {
                Ok(Some(v)) => match codec::from_json(v) {
                    Ok((cache, skipped)) if cache.book_id == book_id && cache.chapter_idx == chapter_idx => {
                        let report = memory.insert(cache);
                        tracing::debug!(
                            book = book_id,
                            chapter = chapter_idx,
                            skipped = skipped + report.skipped_deltas,
                            "chapter cache restored from store"
                        );
                        return LoadOutcome::Ready(LoadSource::Store);
                    }
                    Ok((cache, _)) => {
                        tracing::warn!(key = %key, found_book = %cache.book_id, found_chapter = cache.chapter_idx, "stored cache under wrong key");
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "unreadable stored chapter cache");
                    }
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "store read failed"),
            }
        } else {
            tracing::debug!(book = book_id, chapter = chapter_idx, target, "partial chapter, fetching again");
        }

        let walk = match self.fetch_events(book_id, chapter_idx, token).await {
            LoadOutcome::Ready(w) => w,
            LoadOutcome::Miss => return LoadOutcome::Miss,
            LoadOutcome::Superseded => return LoadOutcome::Superseded,
        };
        let Some(cache) = codec::from_fine_graphs(book_id, chapter_idx, walk.graphs) else {
            return LoadOutcome::Miss;
        };
        if superseded(token, book_id, chapter_idx, "before write") {
            return LoadOutcome::Superseded;
        }

        if !walk.complete {
            tracing::warn!(
                book = book_id,
                chapter = chapter_idx,
                last_event = cache.max_event_idx,
                "chapter has a gap, keeping the fetched part in memory only"
            );
            memory.insert_partial(cache);
            return LoadOutcome::Ready(LoadSource::Fetched);
        }

        let encoded = codec::to_json(&cache);
        memory.insert(cache);
        match encoded {
            Ok(v) => {
                if let Err(e) = self.kv.set(&key, v, self.ttl).await {
                    tracing::warn!(key = %key, error = %e, "store write failed");
                }
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "chapter cache not serializable"),
        }
        if superseded(token, book_id, chapter_idx, "store write") {
            return LoadOutcome::Superseded;
        }
        LoadOutcome::Ready(LoadSource::Fetched)
    }

    pub async fn load_macro(
        &self,
        book_id: &str,
        up_to_chapter: u32,
        token: &CancellationToken,
    ) -> LoadOutcome<MacroGraph> {
        let res = self.fetcher.fetch_macro_graph(book_id, up_to_chapter).await;
        if superseded(token, book_id, up_to_chapter, "macro fetch") {
            return LoadOutcome::Superseded;
        }
        match res {
            Ok(env) => env.into_result().map_or(LoadOutcome::Miss, LoadOutcome::Ready),
            Err(e) => {
                tracing::warn!(book = book_id, chapter = up_to_chapter, error = %e, "macro graph fetch failed");
                LoadOutcome::Miss
            }
        }
    }

    async fn fetch_events(
        &self,
        book_id: &str,
        chapter_idx: u32,
        token: &CancellationToken,
    ) -> LoadOutcome<EventWalk> {
        let mut graphs: Vec<FineGraph> = Vec::new();
        let mut complete = true;
        let mut last = 1u32;
        let mut event_idx = 1u32;
        while event_idx <= last {
            let res = self.fetcher.fetch_fine_graph(book_id, chapter_idx, event_idx).await;
            if superseded(token, book_id, chapter_idx, "fine fetch") {
                return LoadOutcome::Superseded;
            }
            let graph = match res {
                Ok(env) => env.into_result(),
                Err(e) => {
                    tracing::warn!(book = book_id, chapter = chapter_idx, event = event_idx, error = %e, "fine graph fetch failed");
                    None
                }
            };
            let Some(graph) = graph else {
                tracing::debug!(book = book_id, chapter = chapter_idx, event = event_idx, "fine graph miss");
                complete = false;
                break;
            };
            if let Some(max) = graph.max_event_idx {
                if max > self.max_prefetch_events {
                    tracing::debug!(book = book_id, chapter = chapter_idx, max, limit = self.max_prefetch_events, "chapter truncated at prefetch limit");
                }
                last = last.max(max.min(self.max_prefetch_events));
            }
            graphs.push(graph);
            event_idx += 1;
        }

        if graphs.is_empty() {
            LoadOutcome::Miss
        } else {
            tracing::debug!(book = book_id, chapter = chapter_idx, events = graphs.len(), complete, "fetched fine graphs");
            LoadOutcome::Ready(EventWalk { graphs, complete })
        }
    }
}
