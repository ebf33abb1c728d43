use serde::{Deserialize, Serialize};

/// A catalog fragment returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub text: String,
    pub source_id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Relevance in `[0, 1]`, higher is better
    pub score: f32,
}

impl RetrievedFragment {
    /// Display title, falling back to the source id.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.source_id)
    }
}

/// Map a cosine similarity in `[-1, 1]` onto `[0, 1]`.
pub fn normalize_score(cosine: f32) -> f32 {
    if cosine.is_nan() {
        return 0.0;
    }
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}
