use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{CharacterId, RelationKey};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&CharacterId> for ElementId {
    fn from(id: &CharacterId) -> Self {
        Self(id.element_key())
    }
}

impl From<&RelationKey> for ElementId {
    fn from(key: &RelationKey) -> Self {
        Self(key.edge_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub label: String,
    pub full_name: String,
    pub names: Vec<String>,
    pub description: String,
    pub weight: f64,
    pub is_main: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    pub source: ElementId,
    pub target: ElementId,
    pub label: String,
    pub positivity: f64,
    pub weight: f64,
    pub count: u32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum GraphElement {
    Node {
        id: ElementId,
        data: NodeData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
    },
    Edge {
        id: ElementId,
        data: EdgeData,
    },
}

impl GraphElement {
    pub fn id(&self) -> &ElementId {
        match self {
            GraphElement::Node { id, .. } | GraphElement::Edge { id, .. } => id,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, GraphElement::Node { .. })
    }

    pub fn is_edge(&self) -> bool {
        matches!(self, GraphElement::Edge { .. })
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            GraphElement::Node { position, .. } => *position,
            GraphElement::Edge { .. } => None,
        }
    }

    pub fn endpoints(&self) -> Option<(&ElementId, &ElementId)> {
        match self {
            GraphElement::Edge { data, .. } => Some((&data.source, &data.target)),
            GraphElement::Node { .. } => None,
        }
    }

    pub fn same_payload(&self, other: &GraphElement) -> bool {
        match (self, other) {
            (GraphElement::Node { data: a, .. }, GraphElement::Node { data: b, .. }) => a == b,
            (GraphElement::Edge { data: a, .. }, GraphElement::Edge { data: b, .. }) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiffResult {
    pub added: Vec<GraphElement>,
    pub removed: Vec<GraphElement>,
    pub updated: Vec<GraphElement>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    pub fn is_structural(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}
