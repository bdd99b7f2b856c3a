use std::collections::{BTreeMap, HashMap};

use storygraph_core::{
    CharacterId, CharacterState, EdgeData, ElementId, GraphElement, MaterializedState, NodeData,
    RelationKey, RelationState,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildOutput {
    pub elements: Vec<GraphElement>,
    pub dropped_edges: usize,
}

#[derive(Debug, Clone)]
pub struct ElementBuilder {
    label_max_chars: usize,
}

impl Default for ElementBuilder {
    fn default() -> Self {
        Self::new(14)
    }
}

impl ElementBuilder {
    pub fn new(label_max_chars: usize) -> Self {
        Self {
            label_max_chars: label_max_chars.max(2),
        }
    }

    pub fn build_state(&self, state: &MaterializedState) -> BuildOutput {
        self.build(&state.characters, &state.relations)
    }

    pub fn build(
        &self,
        characters: &BTreeMap<CharacterId, CharacterState>,
        relations: &[RelationState],
    ) -> BuildOutput {
        let mut edges: BTreeMap<&RelationKey, &RelationState> = BTreeMap::new();
        let mut dropped = 0usize;
        for r in relations {
            if characters.contains_key(r.key.lo()) && characters.contains_key(r.key.hi()) {
                edges.insert(&r.key, r);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, "dropping relations with missing endpoints");
        }

        let mut incident: HashMap<&CharacterId, f64> = HashMap::new();
        for r in edges.values() {
            let w = r.weight.max(0.0);
            *incident.entry(r.key.lo()).or_insert(0.0) += w;
            if r.key.lo() != r.key.hi() {
                *incident.entry(r.key.hi()).or_insert(0.0) += w;
            }
        }

        let mut elements = Vec::with_capacity(characters.len() + edges.len());
        for (id, c) in characters {
            let extra = incident.get(id).copied().unwrap_or(0.0);
            elements.push(self.node(c, extra));
        }
        for r in edges.values() {
            elements.push(self.edge(r));
        }

        BuildOutput {
            elements,
            dropped_edges: dropped,
        }
    }

    fn node(&self, c: &CharacterState, incident_weight: f64) -> GraphElement {
        let full_name = c.display_name().to_string();
        GraphElement::Node {
            id: ElementId::from(&c.id),
            data: NodeData {
                label: truncate_label(&full_name, self.label_max_chars),
                full_name,
                names: c.names.clone(),
                description: c.description.clone(),
                weight: node_weight(c, incident_weight),
                is_main: c.is_main,
                image: c.profile_image.clone(),
            },
            position: None,
        }
    }

    fn edge(&self, r: &RelationState) -> GraphElement {
        GraphElement::Edge {
            id: ElementId::from(&r.key),
            data: EdgeData {
                source: ElementId::from(r.key.lo()),
                target: ElementId::from(r.key.hi()),
                label: truncate_label(&edge_label(&r.tags), self.label_max_chars * 2),
                positivity: r.positivity,
                weight: r.weight,
                count: r.count,
                tags: r.tags.clone(),
            },
        }
    }
}

pub fn node_weight(c: &CharacterState, incident_weight: f64) -> f64 {
    let own = if c.weight > 0.0 {
        c.weight
    } else {
        f64::from(c.appearance_count)
    };
    own + incident_weight
}

pub fn edge_label(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn truncate_label(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = s.chars().take(keep).collect();
    out.push('…');
    out
}
