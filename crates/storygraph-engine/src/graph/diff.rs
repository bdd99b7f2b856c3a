use std::collections::{HashMap, HashSet};

use storygraph_core::{DiffResult, ElementId, GraphElement};

/// Partitions `next` against `previous` by element id in linear time.
///
/// Elements present in both are `updated` only when their render payload
/// differs; positions are never compared. Duplicate ids in `next` keep their
/// first occurrence.
pub fn diff(previous: &[GraphElement], next: &[GraphElement]) -> DiffResult {
    let prev_index: HashMap<&ElementId, &GraphElement> =
        previous.iter().map(|el| (el.id(), el)).collect();

    let mut seen: HashSet<&ElementId> = HashSet::with_capacity(next.len());
    let mut out = DiffResult::default();

    for el in next {
        if !seen.insert(el.id()) {
            continue;
        }
        match prev_index.get(el.id()) {
            None => out.added.push(el.clone()),
            Some(prev) if !prev.same_payload(el) => out.updated.push(el.clone()),
            Some(_) => {}
        }
    }

    let mut gone: HashSet<&ElementId> = HashSet::new();
    for el in previous {
        if !seen.contains(el.id()) && gone.insert(el.id()) {
            out.removed.push(el.clone());
        }
    }
    out
}
