use serde::Deserialize;
use std::collections::BTreeMap;

use storygraph_core::{
    BaseSnapshot, ChapterSnapshotCache, CharacterId, CharacterState, EventDelta, FineGraph,
    RelationKey, RelationState,
};

use crate::graph::replay::{validate_delta, DeltaError};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChapterCache {
    book_id: String,
    chapter_idx: u32,
    base_snapshot: BaseSnapshot,
    #[serde(default)]
    diffs: Vec<serde_json::Value>,
    #[serde(default)]
    max_event_idx: u32,
}

pub fn from_json(value: serde_json::Value) -> Result<(ChapterSnapshotCache, usize), serde_json::Error> {
    let raw: RawChapterCache = serde_json::from_value(value)?;
    let mut skipped = 0usize;
    let mut diffs = Vec::with_capacity(raw.diffs.len());
    for (pos, v) in raw.diffs.into_iter().enumerate() {
        match serde_json::from_value::<EventDelta>(v) {
            Ok(d) => diffs.push(d),
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    book = %raw.book_id,
                    chapter = raw.chapter_idx,
                    position = pos,
                    error = %DeltaError::Decode(e.to_string()),
                    "skipping malformed delta"
                );
            }
        }
    }
    let (cache, invalid) = normalize(ChapterSnapshotCache {
        book_id: raw.book_id,
        chapter_idx: raw.chapter_idx,
        base_snapshot: raw.base_snapshot,
        diffs,
        max_event_idx: raw.max_event_idx,
    });
    Ok((cache, skipped + invalid))
}

pub fn to_json(cache: &ChapterSnapshotCache) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(cache)
}

pub fn normalize(mut cache: ChapterSnapshotCache) -> (ChapterSnapshotCache, usize) {
    let base_idx = cache.base_snapshot.event_idx;
    let before = cache.diffs.len();
    cache.diffs.retain(|d| match validate_delta(d, base_idx) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                book = %cache.book_id,
                chapter = cache.chapter_idx,
                event = d.event_idx,
                error = %err,
                "dropping malformed delta"
            );
            false
        }
    });
    let dropped = before - cache.diffs.len();
    cache.diffs.sort_by_key(|d| d.event_idx);
    cache.max_event_idx = cache
        .diffs
        .iter()
        .map(|d| d.event_idx)
        .chain([cache.max_event_idx, base_idx])
        .max()
        .unwrap_or(base_idx);
    (cache, dropped)
}

/// Builds a cache from per-event materialized graphs: the first event becomes
/// the base snapshot and every later event is stored as the entity-level
/// change relative to the one before it. The cache ends at the last graph
/// given, whatever the graphs claim about the chapter's length.
pub fn from_fine_graphs(
    book_id: &str,
    chapter_idx: u32,
    mut graphs: Vec<FineGraph>,
) -> Option<ChapterSnapshotCache> {
    graphs.retain(|g| g.event_idx >= 1);
    graphs.sort_by_key(|g| g.event_idx);
    graphs.dedup_by_key(|g| g.event_idx);

    let mut iter = graphs.into_iter();
    let first = iter.next()?;
    let mut max_event_idx = first.event_idx;

    let mut prev_chars = index_characters(&first.characters);
    let mut prev_rels = index_relations(&first.relations);
    let base_snapshot = BaseSnapshot {
        event_idx: first.event_idx,
        characters: prev_chars.values().cloned().collect(),
        relations: prev_rels.values().cloned().collect(),
    };

    let mut diffs = Vec::new();
    for g in iter {
        max_event_idx = g.event_idx;
        let chars = index_characters(&g.characters);
        let rels = index_relations(&g.relations);

        let mut delta = EventDelta::new(g.event_idx);
        delta.char_start_pos = g.char_start_pos;
        delta.char_end_pos = g.char_end_pos;
        delta.event_meta = g.event_meta;
        delta.characters = chars
            .iter()
            .filter(|(id, c)| prev_chars.get(*id) != Some(*c))
            .map(|(_, c)| c.clone())
            .collect();
        delta.removed_characters = prev_chars
            .keys()
            .filter(|id| !chars.contains_key(*id))
            .cloned()
            .collect();
        delta.relations = rels
            .iter()
            .filter(|(key, r)| prev_rels.get(*key) != Some(*r))
            .map(|(_, r)| r.clone())
            .collect();
        delta.removed_relations = prev_rels
            .keys()
            .filter(|key| !rels.contains_key(*key))
            .cloned()
            .collect();

        diffs.push(delta);
        prev_chars = chars;
        prev_rels = rels;
    }

    Some(ChapterSnapshotCache {
        book_id: book_id.to_string(),
        chapter_idx,
        base_snapshot,
        diffs,
        max_event_idx,
    })
}

fn index_characters(chars: &[CharacterState]) -> BTreeMap<CharacterId, CharacterState> {
    chars.iter().map(|c| (c.id.clone(), c.clone())).collect()
}

fn index_relations(rels: &[RelationState]) -> BTreeMap<RelationKey, RelationState> {
    rels.iter().map(|r| (r.key.clone(), r.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::replay::replay;
    use serde_json::json;

    fn fine(event_idx: u32, chars: &[(&str, &str)], rels: &[(&str, &str, f64)]) -> FineGraph {
        FineGraph {
            chapter_idx: 1,
            event_idx,
            max_event_idx: Some(3),
            char_start_pos: u64::from(event_idx) * 100,
            char_end_pos: u64::from(event_idx) * 100 + 99,
            characters: chars.iter().map(|(id, n)| CharacterState::new(*id, *n)).collect(),
            relations: rels
                .iter()
                .map(|(a, b, p)| RelationState::new(*a, *b, *p))
                .collect(),
            event_meta: None,
        }
    }

    #[test]
    fn fine_graphs_compress_to_deltas_and_replay_back() {
        let graphs = vec![
            fine(3, &[("1", "Anna")], &[]),
            fine(1, &[("1", "Anna")], &[]),
            fine(2, &[("1", "Anna"), ("2", "Ben")], &[("2", "1", 0.5)]),
        ];
        let cache = from_fine_graphs("book", 1, graphs).unwrap();
        assert_eq!(cache.base_snapshot.event_idx, 1);
        assert_eq!(cache.diffs.len(), 2);
        assert_eq!(cache.max_event_idx, 3);

        let d2 = &cache.diffs[0];
        assert_eq!(d2.characters.len(), 1, "only the new character is carried");
        assert_eq!(d2.relations.len(), 1);

        let d3 = &cache.diffs[1];
        assert_eq!(d3.removed_characters, vec![CharacterId::new("2")]);
        assert_eq!(d3.removed_relations.len(), 1);

        let at2 = replay(&cache, 2);
        assert_eq!(at2.characters.len(), 2);
        assert_eq!(replay(&cache, 3).characters.len(), 1);
    }

    #[test]
    fn cache_ends_at_last_graph_given() {
        let graphs = vec![fine(1, &[("1", "Anna")], &[]), fine(2, &[("1", "Anna")], &[])];
        let cache = from_fine_graphs("book", 1, graphs).unwrap();
        assert_eq!(cache.max_event_idx, 2);
        assert_eq!(replay(&cache, 3).event_idx, 2);
    }

    #[test]
    fn no_graphs_no_cache() {
        assert!(from_fine_graphs("book", 1, Vec::new()).is_none());
    }

    #[test]
    fn decoding_skips_malformed_deltas() {
        let value = json!({
            "bookId": "book",
            "chapterIdx": 4,
            "baseSnapshot": {"eventIdx": 1, "characters": [{"id": 1, "names": ["Anna"]}]},
            "diffs": [
                {"eventIdx": 3, "characters": [{"id": 3, "names": ["Cleo"]}]},
                {"characters": [{"id": 9}]},
                {"eventIdx": 2, "relations": [{"source": 1, "target": 3}]},
                {"eventIdx": 0}
            ],
            "maxEventIdx": 2
        });
        let (cache, skipped) = from_json(value).unwrap();
        assert_eq!(skipped, 2);
        let order: Vec<u32> = cache.diffs.iter().map(|d| d.event_idx).collect();
        assert_eq!(order, vec![2, 3]);
        assert_eq!(cache.max_event_idx, 3);
    }

    #[test]
    fn decoding_without_base_fails() {
        let value = json!({"bookId": "book", "chapterIdx": 1});
        assert!(from_json(value).is_err());
    }
}
