use serde::{Deserialize, Serialize};

pub use fragment::{normalize_score, RetrievedFragment};
pub use query::Query;

mod fragment;
mod query;

/// Request body for `POST /recommend`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    /// Free-text description of what the caller is looking for
    #[serde(alias = "question")]
    pub query: String,
    /// Optional number of catalog fragments to consider; capped by the
    /// configured top-k
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// A single recommended catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub score: f32,
}

/// Response body for `POST /recommend`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    /// Recommendations in non-increasing score order
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_notes: Option<String>,
}

/// Health check response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Current timestamp in RFC3339 format
    pub timestamp: String,
}
