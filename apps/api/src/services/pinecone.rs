use crate::{
    error::{ApiError, Result},
    models::RetrievedFragment,
    services::vector_index::VectorIndex,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Remote catalog index hosted on Pinecone, queried over its REST API.
#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: Client,
    host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

impl PineconeIndex {
    pub fn new(host: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key)
                .map_err(|e| ApiError::Config(format!("Invalid Pinecone API key: {}", e)))?,
        );
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        })
    }
}

impl QueryMatch {
    fn into_fragment(self) -> RetrievedFragment {
        let metadata = self.metadata.unwrap_or_default();
        let field = |name: &str| {
            metadata
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        RetrievedFragment {
            text: field("text")
                .or_else(|| field("description"))
                .unwrap_or_default(),
            source_id: field("url").unwrap_or(self.id),
            title: field("title").or_else(|| field("name")),
            score: self.score.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn search(&self, vector: &[f32], k: usize) -> anyhow::Result<Vec<RetrievedFragment>> {
        let request = QueryRequest {
            vector,
            top_k: k,
            include_values: false,
            include_metadata: true,
        };

        let response = self
            .client
            .post(format!("{}/query", self.host))
            .json(&request)
            .send()
            .await
            .context("Pinecone query request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Pinecone query failed ({}): {}", status, error_text);
        }

        let query_response: QueryResponse = response
            .json()
            .await
            .context("Failed to parse Pinecone query response")?;
        debug!("Pinecone returned {} matches", query_response.matches.len());

        Ok(query_response
            .matches
            .into_iter()
            .map(QueryMatch::into_fragment)
            .collect())
    }
}
