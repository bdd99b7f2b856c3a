use serde::{Deserialize, Serialize};
use storygraph_core::{ElementId, GraphElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualClass {
    Selected,
    Highlighted,
    Faded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassChange {
    Set(VisualClass),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassChange>,
}

impl StyleAttrs {
    pub fn display_for(el: &GraphElement) -> Self {
        match el {
            GraphElement::Node { data, .. } => Self {
                label: Some(data.label.clone()),
                width: Some(node_size(data.weight)),
                color: Some(if data.is_main { MAIN_NODE_COLOR } else { NODE_COLOR }.to_string()),
                class: None,
            },
            GraphElement::Edge { data, .. } => Self {
                label: Some(data.label.clone()),
                width: Some(edge_width(data.weight)),
                color: Some(positivity_color(data.positivity)),
                class: None,
            },
        }
    }

    pub fn class_only(change: ClassChange) -> Self {
        Self {
            class: Some(change),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleMutation {
    pub id: ElementId,
    pub class: Option<VisualClass>,
}

impl StyleMutation {
    pub fn set(id: ElementId, class: VisualClass) -> Self {
        Self {
            id,
            class: Some(class),
        }
    }

    pub fn clear(id: ElementId) -> Self {
        Self { id, class: None }
    }

    pub fn to_attrs(&self) -> StyleAttrs {
        StyleAttrs::class_only(match self.class {
            Some(c) => ClassChange::Set(c),
            None => ClassChange::Clear,
        })
    }
}

const NODE_COLOR: &str = "#5c6bc0";
const MAIN_NODE_COLOR: &str = "#f9a825";

const NEGATIVE: (f64, f64, f64) = (229.0, 83.0, 75.0);
const NEUTRAL: (f64, f64, f64) = (158.0, 158.0, 158.0);
const POSITIVE: (f64, f64, f64) = (63.0, 185.0, 80.0);

pub fn node_size(weight: f64) -> f64 {
    (20.0 + 6.0 * weight.max(0.0).ln_1p()).clamp(20.0, 60.0)
}

pub fn edge_width(weight: f64) -> f64 {
    (1.0 + 1.5 * weight.max(0.0).ln_1p()).clamp(1.0, 8.0)
}

/// Red at -1, grey at 0, green at +1.
pub fn positivity_color(p: f64) -> String {
    let p = if p.is_nan() { 0.0 } else { p.clamp(-1.0, 1.0) };
    let (from, to, t) = if p < 0.0 {
        (NEUTRAL, NEGATIVE, -p)
    } else {
        (NEUTRAL, POSITIVE, p)
    };
    let mix = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        mix(from.0, to.0),
        mix(from.1, to.1),
        mix(from.2, to.2)
    )
}
