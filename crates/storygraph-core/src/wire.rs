use serde::{Deserialize, Serialize};

use crate::model::{CharacterState, RelationState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(result: T) -> Self {
        Self {
            is_success: true,
            result: Some(result),
        }
    }

    pub fn failure() -> Self {
        Self {
            is_success: false,
            result: None,
        }
    }

    pub fn into_result(self) -> Option<T> {
        if self.is_success {
            self.result
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroGraph {
    pub up_to_chapter: u32,
    #[serde(default)]
    pub characters: Vec<CharacterState>,
    #[serde(default)]
    pub relations: Vec<RelationState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineGraph {
    pub chapter_idx: u32,
    pub event_idx: u32,
    #[serde(default)]
    pub max_event_idx: Option<u32>,
    #[serde(default)]
    pub char_start_pos: u64,
    #[serde(default)]
    pub char_end_pos: u64,
    #[serde(default)]
    pub characters: Vec<CharacterState>,
    #[serde(default)]
    pub relations: Vec<RelationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_meta: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_envelope_is_a_miss() {
        let env: Envelope<MacroGraph> =
            serde_json::from_str(r#"{"isSuccess": false, "result": {"upToChapter": 1}}"#).unwrap();
        assert!(env.into_result().is_none());

        let env: Envelope<MacroGraph> =
            serde_json::from_str(r#"{"isSuccess": true, "result": {"upToChapter": 2}}"#).unwrap();
        assert_eq!(env.into_result().map(|g| g.up_to_chapter), Some(2));
    }
}
