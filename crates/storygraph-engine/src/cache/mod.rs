pub mod codec;

use std::collections::{HashMap, HashSet, VecDeque};

use storygraph_core::{ChapterSnapshotCache, EventDelta, FlatEvent, MaterializedState};

use crate::graph::replay;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterKey {
    pub book_id: String,
    pub chapter_idx: u32,
}

impl ChapterKey {
    pub fn new(book_id: impl Into<String>, chapter_idx: u32) -> Self {
        Self {
            book_id: book_id.into(),
            chapter_idx,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertReport {
    pub skipped_deltas: usize,
    pub evicted: Vec<ChapterKey>,
}

#[derive(Debug)]
pub struct SnapshotStore {
    max_size: usize,
    entries: HashMap<ChapterKey, ChapterSnapshotCache>,
    // front = least recently used
    recency: VecDeque<ChapterKey>,
    // chapters whose event walk stopped early; never persisted
    partial: HashSet<ChapterKey>,
    manifests: HashMap<String, String>,
}

impl SnapshotStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
            partial: HashSet::new(),
            manifests: HashMap::new(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, book_id: &str, chapter_idx: u32) -> bool {
        self.entries
            .contains_key(&ChapterKey::new(book_id, chapter_idx))
    }

    /// True when the cached chapter can answer `target`. A partial chapter only
    /// answers up to the last event it holds.
    pub fn covers(&self, book_id: &str, chapter_idx: u32, target: i64) -> bool {
        let key = ChapterKey::new(book_id, chapter_idx);
        match self.entries.get(&key) {
            Some(cache) if self.partial.contains(&key) => target <= i64::from(cache.max_event_idx),
            Some(_) => true,
            None => false,
        }
    }

    pub fn is_partial(&self, book_id: &str, chapter_idx: u32) -> bool {
        self.partial.contains(&ChapterKey::new(book_id, chapter_idx))
    }

    pub fn manifest(&self, book_id: &str) -> Option<&str> {
        self.manifests.get(book_id).map(String::as_str)
    }

    pub fn get(&mut self, book_id: &str, chapter_idx: u32) -> Option<&ChapterSnapshotCache> {
        let key = ChapterKey::new(book_id, chapter_idx);
        if !self.entries.contains_key(&key) {
            return None;
        }
        self.touch(&key);
        self.entries.get(&key)
    }

    pub fn peek(&self, book_id: &str, chapter_idx: u32) -> Option<&ChapterSnapshotCache> {
        self.entries.get(&ChapterKey::new(book_id, chapter_idx))
    }

    pub fn insert(&mut self, cache: ChapterSnapshotCache) -> InsertReport {
        self.insert_with(cache, false)
    }

    pub fn insert_partial(&mut self, cache: ChapterSnapshotCache) -> InsertReport {
        self.insert_with(cache, true)
    }

    fn insert_with(&mut self, cache: ChapterSnapshotCache, partial: bool) -> InsertReport {
        let (cache, skipped_deltas) = codec::normalize(cache);
        let key = ChapterKey::new(cache.book_id.clone(), cache.chapter_idx);
        if partial {
            self.partial.insert(key.clone());
        } else {
            self.partial.remove(&key);
        }
        self.entries.insert(key.clone(), cache);
        self.touch(&key);

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_size {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.partial.remove(&oldest);
            if self.entries.remove(&oldest).is_some() {
                tracing::debug!(book = %oldest.book_id, chapter = oldest.chapter_idx, "evicted chapter cache");
                evicted.push(oldest);
            }
        }
        InsertReport {
            skipped_deltas,
            evicted,
        }
    }

    pub fn remove(&mut self, book_id: &str, chapter_idx: u32) -> Option<ChapterSnapshotCache> {
        let key = ChapterKey::new(book_id, chapter_idx);
        self.recency.retain(|k| k != &key);
        self.partial.remove(&key);
        self.entries.remove(&key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.partial.clear();
        self.manifests.clear();
    }

    pub fn invalidate_book(&mut self, book_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.book_id != book_id);
        self.recency.retain(|k| k.book_id != book_id);
        self.partial.retain(|k| k.book_id != book_id);
        before - self.entries.len()
    }

    /// Records the manifest version of a book. A change from a previously seen
    /// version invalidates all of that book's chapters.
    pub fn observe_manifest(&mut self, book_id: &str, version: &str) -> bool {
        match self.manifests.insert(book_id.to_string(), version.to_string()) {
            Some(prev) if prev != version => {
                let dropped = self.invalidate_book(book_id);
                tracing::debug!(book = book_id, from = %prev, to = version, dropped, "manifest changed");
                true
            }
            _ => false,
        }
    }

    pub fn events_up_to(&mut self, book_id: &str, chapter_idx: u32, n: u32) -> Vec<EventDelta> {
        self.get(book_id, chapter_idx)
            .map(|c| replay::events_up_to(c, n).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn reconstruct(
        &mut self,
        book_id: &str,
        chapter_idx: u32,
        target: i64,
        fallback: &[FlatEvent],
    ) -> MaterializedState {
        match self.get(book_id, chapter_idx) {
            Some(cache) => replay::replay(cache, target),
            None => {
                tracing::debug!(book = book_id, chapter = chapter_idx, "no chapter cache, aggregating flat events");
                replay::aggregate_flat(fallback, target)
            }
        }
    }

    fn touch(&mut self, key: &ChapterKey) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storygraph_core::{BaseSnapshot, CharacterState, RelationState};

    fn cache(book: &str, chapter: u32) -> ChapterSnapshotCache {
        let mut d2 = EventDelta::new(2);
        d2.characters.push(CharacterState::new("B", "Ben"));
        d2.relations.push(RelationState::new("A", "B", 0.5));
        ChapterSnapshotCache {
            book_id: book.to_string(),
            chapter_idx: chapter,
            base_snapshot: BaseSnapshot {
                event_idx: 1,
                characters: vec![CharacterState::new("A", "Anna")],
                relations: Vec::new(),
            },
            diffs: vec![d2],
            max_event_idx: 2,
        }
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut store = SnapshotStore::new(2);
        store.insert(cache("b", 1));
        store.insert(cache("b", 2));
        assert!(store.get("b", 1).is_some());

        let report = store.insert(cache("b", 3));
        assert_eq!(report.evicted, vec![ChapterKey::new("b", 2)]);
        assert!(store.contains("b", 1));
        assert!(!store.contains("b", 2));
        assert!(store.contains("b", 3));
    }

    #[test]
    fn manifest_change_invalidates_book() {
        let mut store = SnapshotStore::new(8);
        store.insert(cache("b", 1));
        store.insert(cache("b", 2));
        store.insert(cache("other", 1));

        assert!(!store.observe_manifest("b", "v1"));
        assert!(!store.observe_manifest("b", "v1"));
        assert_eq!(store.len(), 3);

        assert!(store.observe_manifest("b", "v2"));
        assert_eq!(store.len(), 1);
        assert!(store.contains("other", 1));
    }

    #[test]
    fn partial_chapter_covers_only_what_it_holds() {
        let mut store = SnapshotStore::new(4);
        store.insert_partial(cache("b", 1));
        assert!(store.is_partial("b", 1));
        assert!(store.covers("b", 1, 2));
        assert!(!store.covers("b", 1, 3));

        store.insert(cache("b", 1));
        assert!(!store.is_partial("b", 1));
        assert!(store.covers("b", 1, 3));
        assert!(!store.covers("b", 2, 1));

        store.insert_partial(cache("b", 1));
        store.invalidate_book("b");
        assert!(!store.is_partial("b", 1));
    }

    #[test]
    fn reconstruct_is_deterministic() {
        let mut store = SnapshotStore::new(4);
        store.insert(cache("b", 1));
        for target in [-1, 0, 1, 2, 7] {
            let first = store.reconstruct("b", 1, target, &[]);
            let second = store.reconstruct("b", 1, target, &[]);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn reconstruct_falls_back_to_flat_events() {
        let mut store = SnapshotStore::new(4);
        let flat = vec![FlatEvent {
            event_idx: 1,
            characters: vec![CharacterState::new("A", "Anna")],
            relations: Vec::new(),
        }];
        let st = store.reconstruct("b", 9, 1, &flat);
        assert_eq!(st.characters.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn events_up_to_and_clear() {
        let mut store = SnapshotStore::new(4);
        store.insert(cache("b", 1));
        assert_eq!(store.events_up_to("b", 1, 1).len(), 0);
        assert_eq!(store.events_up_to("b", 1, 2).len(), 1);
        store.clear();
        assert!(store.is_empty());
        assert!(store.events_up_to("b", 1, 2).is_empty());
    }
}
