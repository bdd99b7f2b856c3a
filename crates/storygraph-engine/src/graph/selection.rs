use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

use storygraph_core::{ElementId, GraphElement};

use super::search::{outside_result, SearchResult};
use super::style::{StyleMutation, VisualClass};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    Idle,
    NodeSelected(ElementId),
    EdgeSelected(ElementId),
}

impl SelectionState {
    pub fn selected(&self) -> Option<&ElementId> {
        match self {
            SelectionState::Idle => None,
            SelectionState::NodeSelected(id) | SelectionState::EdgeSelected(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapTarget {
    Node(ElementId),
    Edge(ElementId),
    Background,
}

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    nodes: HashSet<ElementId>,
    edges: HashMap<ElementId, (ElementId, ElementId)>,
    incident: HashMap<ElementId, SmallVec<[ElementId; 4]>>,
}

impl GraphIndex {
    pub fn from_elements(elements: &[GraphElement]) -> Self {
        let mut index = Self::default();
        for el in elements {
            match el {
                GraphElement::Node { id, .. } => {
                    index.nodes.insert(id.clone());
                }
                GraphElement::Edge { id, data } => {
                    index
                        .edges
                        .insert(id.clone(), (data.source.clone(), data.target.clone()));
                    index.incident.entry(data.source.clone()).or_default().push(id.clone());
                    if data.target != data.source {
                        index.incident.entry(data.target.clone()).or_default().push(id.clone());
                    }
                }
            }
        }
        index
    }

    pub fn has_node(&self, id: &ElementId) -> bool {
        self.nodes.contains(id)
    }

    pub fn has_edge(&self, id: &ElementId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.has_node(id) || self.has_edge(id)
    }

    pub fn endpoints(&self, edge: &ElementId) -> Option<&(ElementId, ElementId)> {
        self.edges.get(edge)
    }

    pub fn incident_edges(&self, node: &ElementId) -> &[ElementId] {
        self.incident.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn ids(&self) -> impl Iterator<Item = &ElementId> {
        self.nodes.iter().chain(self.edges.keys())
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tap-driven highlight/fade state machine.
///
/// Tracks the classes it has applied so each transition only emits the
/// difference: first the clears, then the new classes. A renderer applying the
/// list in order never shows two selections at once.
#[derive(Debug, Default)]
pub struct SelectionHighlighter {
    state: SelectionState,
    styled: HashMap<ElementId, VisualClass>,
}

impl SelectionHighlighter {
    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn class_of(&self, id: &ElementId) -> Option<VisualClass> {
        self.styled.get(id).copied()
    }

    pub fn tap(
        &mut self,
        target: TapTarget,
        index: &GraphIndex,
        search: Option<&SearchResult>,
    ) -> Vec<StyleMutation> {
        let next = match (&self.state, target) {
            (SelectionState::NodeSelected(n), TapTarget::Node(m)) if *n == m => SelectionState::Idle,
            (_, TapTarget::Node(m)) if index.has_node(&m) => SelectionState::NodeSelected(m),
            (_, TapTarget::Edge(e)) if index.has_edge(&e) => SelectionState::EdgeSelected(e),
            (SelectionState::Idle, TapTarget::Background) => return Vec::new(),
            (_, TapTarget::Background) => SelectionState::Idle,
            (_, other) => {
                tracing::debug!(tap = ?other, "tap on element not in scene");
                return Vec::new();
            }
        };
        tracing::debug!(from = ?self.state, to = ?next, "selection transition");
        self.state = next;
        self.apply(index, search)
    }

    pub fn refresh(&mut self, index: &GraphIndex, search: Option<&SearchResult>) -> Vec<StyleMutation> {
        if let Some(id) = self.state.selected() {
            if !index.contains(id) {
                self.state = SelectionState::Idle;
            }
        }
        self.apply(index, search)
    }

    pub fn forget_removed<'a>(&mut self, removed: impl IntoIterator<Item = &'a ElementId>) -> bool {
        let mut dropped_selection = false;
        for id in removed {
            self.styled.remove(id);
            if self.state.selected() == Some(id) {
                dropped_selection = true;
            }
        }
        if dropped_selection {
            self.state = SelectionState::Idle;
        }
        dropped_selection
    }

    pub fn reset(&mut self) -> Vec<StyleMutation> {
        self.state = SelectionState::Idle;
        let mut ids: Vec<ElementId> = self.styled.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids.into_iter().map(StyleMutation::clear).collect()
    }

    fn apply(&mut self, index: &GraphIndex, search: Option<&SearchResult>) -> Vec<StyleMutation> {
        let desired = self.desired(index, search.filter(|s| s.active));

        let mut clears: Vec<ElementId> = self
            .styled
            .iter()
            .filter(|(id, cls)| desired.get(*id) != Some(*cls))
            .map(|(id, _)| id.clone())
            .collect();
        clears.sort();

        let mut sets: Vec<(ElementId, VisualClass)> = desired
            .iter()
            .filter(|(id, cls)| self.styled.get(*id) != Some(*cls))
            .map(|(id, cls)| (id.clone(), *cls))
            .collect();
        sets.sort_by(|a, b| a.0.cmp(&b.0));

        self.styled = desired;
        clears
            .into_iter()
            .map(StyleMutation::clear)
            .chain(sets.into_iter().map(|(id, cls)| StyleMutation::set(id, cls)))
            .collect()
    }

    fn desired(&self, index: &GraphIndex, search: Option<&SearchResult>) -> HashMap<ElementId, VisualClass> {
        let in_scope = |id: &ElementId| search.map_or(true, |s| s.contains(id));
        let mut lit: HashMap<ElementId, VisualClass> = HashMap::new();

        match &self.state {
            SelectionState::Idle => {
                let Some(s) = search else {
                    return lit;
                };
                return outside_result(s, index.ids())
                    .map(|id| (id.clone(), VisualClass::Faded))
                    .collect();
            }
            SelectionState::NodeSelected(n) => {
                lit.insert(n.clone(), VisualClass::Selected);
                for e in index.incident_edges(n) {
                    let Some((s, t)) = index.endpoints(e) else {
                        continue;
                    };
                    let other = if s == n { t } else { s };
                    if in_scope(e) && in_scope(other) {
                        lit.insert(e.clone(), VisualClass::Highlighted);
                        lit.entry(other.clone()).or_insert(VisualClass::Highlighted);
                    }
                }
            }
            SelectionState::EdgeSelected(e) => {
                lit.insert(e.clone(), VisualClass::Selected);
                if let Some((s, t)) = index.endpoints(e) {
                    lit.insert(s.clone(), VisualClass::Highlighted);
                    lit.insert(t.clone(), VisualClass::Highlighted);
                }
            }
        }

        for id in index.ids() {
            lit.entry(id.clone()).or_insert(VisualClass::Faded);
        }
        lit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::elements::ElementBuilder;
    use crate::graph::search::SearchFilterEngine;
    use std::collections::BTreeMap;
    use storygraph_core::{CharacterId, CharacterState, RelationState};

    fn scene() -> Vec<GraphElement> {
        let chars: BTreeMap<CharacterId, CharacterState> =
            [("1", "Anna"), ("2", "Ben"), ("3", "Cleo"), ("4", "Dan")]
                .iter()
                .map(|(id, n)| (CharacterId::new(*id), CharacterState::new(*id, *n)))
                .collect();
        let rels = [RelationState::new("1", "3", 0.4), RelationState::new("2", "4", 0.1), RelationState::new("1", "4", 0.0)];
        ElementBuilder::default().build(&chars, &rels).elements
    }

    fn id(s: &str) -> ElementId {
        ElementId::new(s)
    }

    fn node(s: &str) -> TapTarget {
        TapTarget::Node(id(s))
    }

    #[test]
    fn node_tap_highlights_neighbourhood_and_fades_rest() {
        let els = scene();
        let index = GraphIndex::from_elements(&els);
        let mut h = SelectionHighlighter::default();
        let muts = h.tap(node("1"), &index, None);

        assert_eq!(h.state(), &SelectionState::NodeSelected(id("1")));
        assert_eq!(muts.len(), els.len());
        assert_eq!(h.class_of(&id("1")), Some(VisualClass::Selected));
        for lit in ["3", "4", "1|3", "1|4"] {
            assert_eq!(h.class_of(&id(lit)), Some(VisualClass::Highlighted), "{lit}");
        }
        assert_eq!(h.class_of(&id("2")), Some(VisualClass::Faded));
        assert_eq!(h.class_of(&id("2|4")), Some(VisualClass::Faded));
    }

    #[test]
    fn retap_same_node_clears_everything() {
        let index = GraphIndex::from_elements(&scene());
        let mut h = SelectionHighlighter::default();
        h.tap(node("1"), &index, None);
        let muts = h.tap(node("1"), &index, None);
        assert_eq!(h.state(), &SelectionState::Idle);
        assert!(muts.iter().all(|m| m.class.is_none()));
        assert_eq!(muts.len(), index.len());
    }

    #[test]
    fn background_tap_while_idle_is_noop() {
        let index = GraphIndex::from_elements(&scene());
        let mut h = SelectionHighlighter::default();
        assert!(h.tap(TapTarget::Background, &index, None).is_empty());

        h.tap(node("2"), &index, None);
        let muts = h.tap(TapTarget::Background, &index, None);
        assert_eq!(h.state(), &SelectionState::Idle);
        assert!(!muts.is_empty());
    }

    #[test]
    fn switching_nodes_never_shows_two_selections() {
        let index = GraphIndex::from_elements(&scene());
        let mut h = SelectionHighlighter::default();
        let mut live: HashMap<ElementId, VisualClass> = HashMap::new();
        let replay = |muts: Vec<StyleMutation>, live: &mut HashMap<ElementId, VisualClass>| {
            for m in muts {
                match m.class {
                    Some(c) => {
                        live.insert(m.id, c);
                    }
                    None => {
                        live.remove(&m.id);
                    }
                }
                let selected = live.values().filter(|c| **c == VisualClass::Selected).count();
                assert!(selected <= 1, "two selections visible at once");
            }
        };

        replay(h.tap(node("1"), &index, None), &mut live);
        replay(h.tap(node("2"), &index, None), &mut live);

        assert_eq!(live.get(&id("2")), Some(&VisualClass::Selected));
        assert_ne!(live.get(&id("1")), Some(&VisualClass::Selected));
        assert_ne!(live.get(&id("1")), Some(&VisualClass::Highlighted));
    }

    #[test]
    fn edge_tap_highlights_endpoints_only() {
        let index = GraphIndex::from_elements(&scene());
        let mut h = SelectionHighlighter::default();
        h.tap(TapTarget::Edge(id("2|4")), &index, None);
        assert_eq!(h.class_of(&id("2|4")), Some(VisualClass::Selected));
        assert_eq!(h.class_of(&id("2")), Some(VisualClass::Highlighted));
        assert_eq!(h.class_of(&id("4")), Some(VisualClass::Highlighted));
        assert_eq!(h.class_of(&id("1")), Some(VisualClass::Faded));
        assert_eq!(h.class_of(&id("1|4")), Some(VisualClass::Faded));
    }

    #[test]
    fn search_limits_neighbour_highlighting() {
        let els = scene();
        let index = GraphIndex::from_elements(&els);
        // "cleo" matches node 3 and expands to 1 and 1-3.
        let result = SearchFilterEngine::default().filter("cleo", &els, None);
        let mut h = SelectionHighlighter::default();
        h.tap(node("1"), &index, Some(&result));

        assert_eq!(h.class_of(&id("3")), Some(VisualClass::Highlighted));
        assert_eq!(h.class_of(&id("4")), Some(VisualClass::Faded));
        assert_eq!(h.class_of(&id("1|4")), Some(VisualClass::Faded));

        // Deselecting falls back to search fading rather than a clean slate.
        h.tap(node("1"), &index, Some(&result));
        assert_eq!(h.class_of(&id("1")), None);
        assert_eq!(h.class_of(&id("4")), Some(VisualClass::Faded));
    }

    #[test]
    fn removed_selection_returns_to_idle() {
        let els = scene();
        let index = GraphIndex::from_elements(&els);
        let mut h = SelectionHighlighter::default();
        h.tap(node("3"), &index, None);
        assert!(h.forget_removed([&id("3"), &id("1|3")]));
        assert_eq!(h.state(), &SelectionState::Idle);

        let smaller: Vec<GraphElement> = els
            .into_iter()
            .filter(|e| e.id() != &id("3") && e.id() != &id("1|3"))
            .collect();
        let muts = h.refresh(&GraphIndex::from_elements(&smaller), None);
        assert!(muts.iter().all(|m| m.class.is_none()));
        assert!(h.reset().is_empty());
    }

    #[test]
    fn unchanged_refresh_emits_nothing() {
        let index = GraphIndex::from_elements(&scene());
        let mut h = SelectionHighlighter::default();
        h.tap(node("4"), &index, None);
        assert!(h.refresh(&index, None).is_empty());
    }
}
