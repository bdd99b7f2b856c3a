use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Character identifier, unique within a book.
///
/// Upstream payloads carry ids either as strings or as integers; both
/// deserialize into the same string form so `1` and `"1"` are one character.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Renderer id of this character's node. `|` joins edge endpoints, so it
    /// is escaped here together with the backslash.
    pub fn element_key(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for ch in self.0.chars() {
            if ch == '|' || ch == '\\' {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CharacterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) if s.trim().is_empty() => {
                Err(serde::de::Error::custom("character id must not be empty"))
            }
            Raw::Text(s) => Ok(Self(s)),
            Raw::Int(n) => Ok(Self(n.to_string())),
        }
    }
}

pub fn canonical_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterState {
    pub id: CharacterId,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub appearance_count: u32,
}

impl CharacterState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CharacterId::new(id),
            names: vec![name.into()],
            description: String::new(),
            is_main: false,
            profile_image: None,
            weight: 0.0,
            appearance_count: 0,
        }
    }

    pub fn display_name(&self) -> &str {
        self.names
            .iter()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
            .unwrap_or(self.id.as_str())
    }
}

/// Canonical undirected character pair. `(a, b)` and `(b, a)` build the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(CharacterId, CharacterId)", into = "(CharacterId, CharacterId)")]
pub struct RelationKey {
    min: CharacterId,
    max: CharacterId,
}

impl RelationKey {
    pub fn new(a: CharacterId, b: CharacterId) -> Self {
        if canonical_cmp(a.as_str(), b.as_str()) == Ordering::Greater {
            Self { min: b, max: a }
        } else {
            Self { min: a, max: b }
        }
    }

    pub fn lo(&self) -> &CharacterId {
        &self.min
    }

    pub fn hi(&self) -> &CharacterId {
        &self.max
    }

    pub fn touches(&self, id: &CharacterId) -> bool {
        &self.min == id || &self.max == id
    }

    /// Node keys contain no unescaped `|`, so an edge id never equals a node
    /// id and splits back into exactly one pair.
    pub fn edge_id(&self) -> String {
        format!("{}|{}", self.min.element_key(), self.max.element_key())
    }
}

impl From<(CharacterId, CharacterId)> for RelationKey {
    fn from((a, b): (CharacterId, CharacterId)) -> Self {
        Self::new(a, b)
    }
}

impl From<RelationKey> for (CharacterId, CharacterId) {
    fn from(key: RelationKey) -> Self {
        (key.min, key.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RelationWire", into = "RelationWire")]
pub struct RelationState {
    pub key: RelationKey,
    pub tags: Vec<String>,
    /// Sentiment in `[-1, 1]`; out-of-range and NaN inputs are clamped on ingest.
    pub positivity: f64,
    pub weight: f64,
    pub count: u32,
}

impl RelationState {
    pub fn new(a: impl Into<String>, b: impl Into<String>, positivity: f64) -> Self {
        Self {
            key: RelationKey::new(CharacterId::new(a), CharacterId::new(b)),
            tags: Vec::new(),
            positivity: clamp_positivity(positivity),
            weight: 1.0,
            count: 1,
        }
    }
}

fn clamp_positivity(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(-1.0, 1.0)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationWire {
    source: CharacterId,
    target: CharacterId,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    positivity: f64,
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    count: u32,
}

impl From<RelationWire> for RelationState {
    fn from(w: RelationWire) -> Self {
        Self {
            key: RelationKey::new(w.source, w.target),
            tags: w.tags,
            positivity: clamp_positivity(w.positivity),
            weight: w.weight,
            count: w.count,
        }
    }
}

impl From<RelationState> for RelationWire {
    fn from(r: RelationState) -> Self {
        let (source, target) = r.key.into();
        Self {
            source,
            target,
            tags: r.tags,
            positivity: r.positivity,
            weight: r.weight,
            count: r.count,
        }
    }
}

/// Change introduced by one narrative event. Entities listed here carry their
/// complete state; removals are explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDelta {
    pub event_idx: u32,
    #[serde(default)]
    pub char_start_pos: u64,
    #[serde(default)]
    pub char_end_pos: u64,
    #[serde(default)]
    pub characters: Vec<CharacterState>,
    #[serde(default)]
    pub relations: Vec<RelationState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_characters: Vec<CharacterId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_relations: Vec<RelationKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_meta: Option<serde_json::Value>,
}

impl EventDelta {
    pub fn new(event_idx: u32) -> Self {
        Self {
            event_idx,
            char_start_pos: 0,
            char_end_pos: 0,
            characters: Vec::new(),
            relations: Vec::new(),
            removed_characters: Vec::new(),
            removed_relations: Vec::new(),
            event_meta: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.characters.is_empty()
            && self.relations.is_empty()
            && self.removed_characters.is_empty()
            && self.removed_relations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseSnapshot {
    pub event_idx: u32,
    #[serde(default)]
    pub characters: Vec<CharacterState>,
    #[serde(default)]
    pub relations: Vec<RelationState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSnapshotCache {
    pub book_id: String,
    pub chapter_idx: u32,
    pub base_snapshot: BaseSnapshot,
    #[serde(default)]
    pub diffs: Vec<EventDelta>,
    pub max_event_idx: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatEvent {
    pub event_idx: u32,
    #[serde(default)]
    pub characters: Vec<CharacterState>,
    #[serde(default)]
    pub relations: Vec<RelationState>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedState {
    pub characters: BTreeMap<CharacterId, CharacterState>,
    pub relations: Vec<RelationState>,
    pub event_idx: u32,
}

impl MaterializedState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_key_is_canonical_and_numeric_aware() {
        let a = RelationKey::new(CharacterId::new("10"), CharacterId::new("9"));
        let b = RelationKey::new(CharacterId::new("9"), CharacterId::new("10"));
        assert_eq!(a, b);
        assert_eq!(a.edge_id(), "9|10");

        let c = RelationKey::new(CharacterId::new("zed"), CharacterId::new("amy"));
        assert_eq!(c.lo().as_str(), "amy");
    }

    #[test]
    fn edge_ids_do_not_collide_with_dashed_or_piped_ids() {
        let edge = |a: &str, b: &str| RelationKey::new(CharacterId::new(a), CharacterId::new(b)).edge_id();
        assert_ne!(edge("a-b", "c"), edge("a", "b-c"));
        assert_ne!(edge("a|b", "c"), edge("a", "b|c"));

        let node = CharacterId::new("a|b").element_key();
        assert_eq!(node, "a\\|b");
        assert_ne!(node, edge("a", "b"));
        assert_eq!(CharacterId::new("plain").element_key(), "plain");
    }

    #[test]
    fn numeric_ids_deserialize_as_strings() {
        let c: CharacterState =
            serde_json::from_str(r#"{"id": 7, "names": ["Anna"], "isMain": true}"#).unwrap();
        assert_eq!(c.id, CharacterId::new("7"));
        assert!(c.is_main);
        assert_eq!(c.display_name(), "Anna");
    }

    #[test]
    fn empty_id_is_rejected() {
        let r: Result<CharacterState, _> = serde_json::from_str(r#"{"id": "  "}"#);
        assert!(r.is_err());
    }

    #[test]
    fn relation_wire_canonicalises_and_clamps() {
        let r: RelationState = serde_json::from_str(
            r#"{"source": "b", "target": "a", "positivity": 3.5, "tags": ["friend"]}"#,
        )
        .unwrap();
        assert_eq!(r.key.lo().as_str(), "a");
        assert_eq!(r.positivity, 1.0);

        let out = serde_json::to_value(&r).unwrap();
        assert_eq!(out["source"], "a");
        assert_eq!(out["target"], "b");
    }

    #[test]
    fn delta_requires_event_idx() {
        let r: Result<EventDelta, _> = serde_json::from_str(r#"{"characters": []}"#);
        assert!(r.is_err());
    }
}
