use std::collections::HashSet;

use storygraph_core::{ElementId, GraphElement};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub active: bool,
    pub result_ids: HashSet<ElementId>,
}

impl SearchResult {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.result_ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.result_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SearchFilterEngine {
    min_query_len: usize,
}

impl Default for SearchFilterEngine {
    fn default() -> Self {
        Self::new(2)
    }
}

impl SearchFilterEngine {
    pub fn new(min_query_len: usize) -> Self {
        Self {
            min_query_len: min_query_len.max(1),
        }
    }

    pub fn min_query_len(&self) -> usize {
        self.min_query_len
    }

    /// Nodes whose label, aliases or full name contain `query` (case
    /// insensitive), narrowed by `restrict`, then expanded one hop along their
    /// incident edges.
    pub fn filter(
        &self,
        query: &str,
        elements: &[GraphElement],
        restrict: Option<&HashSet<ElementId>>,
    ) -> SearchResult {
        let q = query.trim();
        if q.chars().count() < self.min_query_len {
            return SearchResult::inactive();
        }
        let needle = q.to_lowercase();

        let matched: HashSet<&ElementId> = elements
            .iter()
            .filter_map(|el| match el {
                GraphElement::Node { id, data, .. } => {
                    let hit = contains_ci(&data.label, &needle)
                        || contains_ci(&data.full_name, &needle)
                        || data.names.iter().any(|n| contains_ci(n, &needle));
                    hit.then_some(id)
                }
                GraphElement::Edge { .. } => None,
            })
            .filter(|id| restrict.map_or(true, |r| r.contains(*id)))
            .collect();

        let mut result_ids: HashSet<ElementId> = matched.iter().map(|id| (*id).clone()).collect();
        for el in elements {
            let Some((s, t)) = el.endpoints() else {
                continue;
            };
            let (hit_s, hit_t) = (matched.contains(s), matched.contains(t));
            if hit_s || hit_t {
                result_ids.insert(el.id().clone());
                result_ids.insert(s.clone());
                result_ids.insert(t.clone());
            }
        }

        tracing::debug!(query = q, matched = matched.len(), expanded = result_ids.len(), "search filtered");
        SearchResult {
            active: true,
            result_ids,
        }
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

pub fn outside_result<'a>(
    result: &'a SearchResult,
    ids: impl Iterator<Item = &'a ElementId> + 'a,
) -> impl Iterator<Item = &'a ElementId> + 'a {
    ids.filter(move |id| result.active && !result.contains(id))
}
