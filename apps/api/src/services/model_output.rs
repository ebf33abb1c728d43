use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid code fence pattern")
});

/// One entry the model recommended.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelItem {
    #[serde(default, alias = "sourceId", alias = "id")]
    pub source_id: Option<String>,
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default, alias = "reason")]
    pub description: Option<String>,
}

/// Result of reading a completion: either the JSON shape the prompt asked
/// for, or the raw text when the model ignored it.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Structured {
        items: Vec<ModelItem>,
        notes: Option<String>,
    },
    RawText(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Object {
        recommendations: Vec<ModelItem>,
        #[serde(default, alias = "modelNotes", alias = "model_notes")]
        notes: Option<String>,
    },
    List(Vec<ModelItem>),
}

pub fn parse_model_output(completion: &str) -> ModelOutput {
    let trimmed = completion.trim();
    let candidate = CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    match serde_json::from_str::<Payload>(candidate) {
        Ok(Payload::Object {
            recommendations,
            notes,
        }) => ModelOutput::Structured {
            items: recommendations,
            notes: notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        },
        Ok(Payload::List(items)) => ModelOutput::Structured { items, notes: None },
        Err(_) => ModelOutput::RawText(trimmed.to_string()),
    }
}
