use std::collections::BTreeMap;

use storygraph_core::{
    BaseSnapshot, ChapterSnapshotCache, CharacterId, CharacterState, EventDelta, FlatEvent,
    MacroGraph, MaterializedState, RelationKey, RelationState,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeltaError {
    #[error("event index must be >= 1")]
    ZeroEventIdx,
    #[error("event {event_idx} precedes base snapshot event {base_idx}")]
    BeforeBase { event_idx: u32, base_idx: u32 },
    #[error("event {event_idx}: character id is empty")]
    EmptyCharacterId { event_idx: u32 },
    #[error("event {event_idx}: relation {edge} has an empty endpoint")]
    EmptyRelationEndpoint { event_idx: u32, edge: String },
    #[error("undecodable delta: {0}")]
    Decode(String),
}

/// Checks the fields a delta must carry to be replayable on top of a base
/// snapshot taken at `base_idx`.
pub fn validate_delta(delta: &EventDelta, base_idx: u32) -> Result<(), DeltaError> {
    if delta.event_idx == 0 {
        return Err(DeltaError::ZeroEventIdx);
    }
    if delta.event_idx < base_idx {
        return Err(DeltaError::BeforeBase {
            event_idx: delta.event_idx,
            base_idx,
        });
    }
    if delta
        .characters
        .iter()
        .any(|c| c.id.as_str().trim().is_empty())
    {
        return Err(DeltaError::EmptyCharacterId {
            event_idx: delta.event_idx,
        });
    }
    if let Some(r) = delta.relations.iter().find(|r| {
        r.key.lo().as_str().trim().is_empty() || r.key.hi().as_str().trim().is_empty()
    }) {
        return Err(DeltaError::EmptyRelationEndpoint {
            event_idx: delta.event_idx,
            edge: r.key.edge_id(),
        });
    }
    Ok(())
}

pub fn effective_max_event(cache: &ChapterSnapshotCache) -> u32 {
    cache
        .diffs
        .iter()
        .map(|d| d.event_idx)
        .chain([cache.max_event_idx, cache.base_snapshot.event_idx])
        .max()
        .unwrap_or(0)
}

pub fn events_up_to(cache: &ChapterSnapshotCache, n: u32) -> Vec<&EventDelta> {
    let mut out: Vec<&EventDelta> = cache.diffs.iter().filter(|d| d.event_idx <= n).collect();
    out.sort_by_key(|d| d.event_idx);
    out
}

/// Materialized state of `cache` at `target`.
///
/// `target <= 0` is the empty chapter; larger values clamp to the last known
/// event. A target below the base snapshot's index cannot be reconstructed and
/// yields the empty chapter as well.
pub fn replay(cache: &ChapterSnapshotCache, target: i64) -> MaterializedState {
    if target <= 0 {
        return MaterializedState::empty();
    }
    let max = effective_max_event(cache).max(1);
    let target = target.clamp(1, i64::from(max)) as u32;
    let base_idx = cache.base_snapshot.event_idx;
    if target < base_idx {
        tracing::debug!(
            book = %cache.book_id,
            chapter = cache.chapter_idx,
            target,
            base_idx,
            "requested event precedes base snapshot"
        );
        return MaterializedState::empty();
    }

    let mut acc = Accumulator::from_base(&cache.base_snapshot);
    for delta in events_up_to(cache, target) {
        if let Err(err) = validate_delta(delta, base_idx) {
            tracing::warn!(
                book = %cache.book_id,
                chapter = cache.chapter_idx,
                event = delta.event_idx,
                error = %err,
                "skipping malformed delta"
            );
            continue;
        }
        acc.apply(delta);
    }
    acc.finish(target)
}

pub fn aggregate_flat(events: &[FlatEvent], target: i64) -> MaterializedState {
    if target <= 0 {
        return MaterializedState::empty();
    }
    let Some(max) = events.iter().map(|e| e.event_idx).max() else {
        return MaterializedState::empty();
    };
    let target = target.clamp(1, i64::from(max.max(1))) as u32;

    let mut ordered: Vec<&FlatEvent> = events
        .iter()
        .filter(|e| e.event_idx >= 1 && e.event_idx <= target)
        .collect();
    ordered.sort_by_key(|e| e.event_idx);

    let mut acc = Accumulator::default();
    for ev in ordered {
        acc.upsert(ev.event_idx, &ev.characters, &ev.relations);
    }
    acc.finish(target)
}

/// Chapter-level state for chapters that carry no event data. The result is
/// stamped with event 0, since no event of the chapter is represented.
pub fn from_macro(graph: &MacroGraph) -> MaterializedState {
    let mut acc = Accumulator::default();
    acc.upsert(0, &graph.characters, &graph.relations);
    acc.finish(0)
}

#[derive(Default)]
struct Accumulator {
    characters: BTreeMap<CharacterId, CharacterState>,
    relations: BTreeMap<RelationKey, RelationState>,
}

impl Accumulator {
    fn from_base(base: &BaseSnapshot) -> Self {
        let mut acc = Self::default();
        acc.upsert(base.event_idx, &base.characters, &base.relations);
        acc
    }

    fn apply(&mut self, delta: &EventDelta) {
        self.upsert(delta.event_idx, &delta.characters, &delta.relations);
        for id in &delta.removed_characters {
            self.characters.remove(id);
            self.relations.retain(|key, _| !key.touches(id));
        }
        for key in &delta.removed_relations {
            self.relations.remove(key);
        }
    }

    fn upsert(&mut self, event_idx: u32, characters: &[CharacterState], relations: &[RelationState]) {
        for c in characters {
            if let Some(prev) = self.characters.get(&c.id) {
                if c.weight < prev.weight {
                    tracing::debug!(
                        id = %c.id,
                        event = event_idx,
                        previous = prev.weight,
                        next = c.weight,
                        "character weight decreased"
                    );
                }
            }
            self.characters.insert(c.id.clone(), c.clone());
        }
        for r in relations {
            self.relations.insert(r.key.clone(), r.clone());
        }
    }

    fn finish(self, event_idx: u32) -> MaterializedState {
        MaterializedState {
            characters: self.characters,
            relations: self.relations.into_values().collect(),
            event_idx,
        }
    }
}
