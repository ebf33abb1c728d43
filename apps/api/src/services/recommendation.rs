use crate::{
    config::Config,
    error::{ApiError, Result, UpstreamStage},
    models::{Query, Recommendation, RecommendationResponse, RetrievedFragment},
    services::{
        embedding::EmbeddingModel,
        generation::GenerationModel,
        model_output::{parse_model_output, ModelItem, ModelOutput},
        prompt::PromptBuilder,
        vector_index::VectorIndex,
    },
};
use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Notes returned when the index has nothing for a query.
pub const NO_MATCHES_NOTE: &str = "No matching assessments were found for this query.";
/// Notes returned when the model judged every retrieved entry irrelevant.
pub const NO_RELEVANT_NOTE: &str = "None of the retrieved catalog entries fit this query.";
/// Title used when the model answered in free text.
pub const RAW_TEXT_TITLE: &str = "Recommendation";

/// Tunables of the request pipeline, copied out of [`Config`] at startup.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub prompt_char_budget: usize,
    pub max_query_chars: usize,
    pub upstream_timeout: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            top_k: config.top_k,
            prompt_char_budget: config.prompt_char_budget,
            max_query_chars: config.max_query_chars,
            upstream_timeout: config.request_timeout,
        }
    }
}

/// Runs one query through embed → search → generate → shape.
///
/// Holds only read-only handles, so a single instance is shared by every
/// worker.
#[derive(Clone)]
pub struct RecommendationService {
    settings: PipelineSettings,
    prompt_builder: PromptBuilder,
    embedder: Arc<dyn EmbeddingModel>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerationModel>,
}

impl RecommendationService {
    pub fn new(
        settings: PipelineSettings,
        embedder: Arc<dyn EmbeddingModel>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationModel>,
    ) -> Self {
        Self {
            prompt_builder: PromptBuilder::new(settings.prompt_char_budget),
            settings,
            embedder,
            index,
            generator,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Produce recommendations for `raw_query`.
    ///
    /// Fails with `InvalidInput` before any collaborator is called when the
    /// query is blank or too long, and with an upstream error when any
    /// collaborator fails or exceeds the configured timeout.
    pub async fn handle(
        &self,
        raw_query: &str,
        top_k: Option<usize>,
    ) -> Result<RecommendationResponse> {
        let query = Query::parse(raw_query, self.settings.max_query_chars)?;
        let k = self.effective_top_k(top_k)?;
        info!(query = %query.preview(), k, "Processing recommendation request");

        let embedding = self
            .call_upstream(UpstreamStage::Embedding, self.embedder.embed(query.as_str()))
            .await?;
        if embedding.is_empty() {
            return Err(ApiError::Upstream {
                stage: UpstreamStage::Embedding,
                detail: "embedding model returned an empty vector".to_string(),
            });
        }

        let mut fragments = self
            .call_upstream(UpstreamStage::VectorSearch, self.index.search(&embedding, k))
            .await?;
        fragments.sort_by(|a, b| b.score.total_cmp(&a.score));
        if fragments.len() > k {
            warn!(
                "Vector index returned {} fragments for k = {}, discarding the lowest scored",
                fragments.len(),
                k
            );
            fragments.truncate(k);
        }
        debug!(
            "Retrieved fragments: {:?}",
            fragments
                .iter()
                .map(|f| (f.source_id.as_str(), f.score))
                .collect::<Vec<_>>()
        );

        if fragments.is_empty() {
            info!(query = %query.preview(), "No fragments matched, skipping generation");
            return Ok(no_matches_response());
        }

        let prompt = self.prompt_builder.build(&query, &fragments);
        if prompt.fragments.len() < fragments.len() {
            debug!(
                "Prompt budget kept {} of {} fragments",
                prompt.fragments.len(),
                fragments.len()
            );
        }

        let completion = self
            .call_upstream(UpstreamStage::Generation, self.generator.generate(&prompt.text))
            .await?;
        if completion.trim().is_empty() {
            return Err(ApiError::Upstream {
                stage: UpstreamStage::Generation,
                detail: "generation model returned an empty completion".to_string(),
            });
        }

        let response = shape_response(prompt.fragments, &completion);
        info!(
            query = %query.preview(),
            recommendations = response.recommendations.len(),
            "Recommendation request completed"
        );
        Ok(response)
    }

    fn effective_top_k(&self, requested: Option<usize>) -> Result<usize> {
        match requested {
            Some(0) => Err(ApiError::InvalidInput(
                "top_k must be at least 1".to_string(),
            )),
            Some(k) => Ok(k.min(self.settings.top_k)),
            None => Ok(self.settings.top_k),
        }
    }

    /// Await a collaborator call under the configured timeout, translating
    /// its failure into an upstream error.
    async fn call_upstream<T, F>(&self, stage: UpstreamStage, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let timeout = self.settings.upstream_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!(%stage, error = ?err, "Upstream call failed");
                Err(ApiError::Upstream {
                    stage,
                    detail: format!("{:#}", err),
                })
            }
            Err(_) => {
                error!(%stage, ?timeout, "Upstream call timed out");
                Err(ApiError::UpstreamTimeout { stage, timeout })
            }
        }
    }
}

/// The fixed response for a query the index has nothing for.
pub fn no_matches_response() -> RecommendationResponse {
    RecommendationResponse {
        recommendations: Vec::new(),
        model_notes: Some(NO_MATCHES_NOTE.to_string()),
    }
}

/// Turn a completion into a response over the fragments the prompt contained.
///
/// Structured items are tied back to fragments and reported in fragment
/// order with fragment scores. Output that cannot be tied to any fragment is
/// returned as a single raw-text recommendation.
pub fn shape_response(fragments: &[RetrievedFragment], completion: &str) -> RecommendationResponse {
    let (items, notes) = match parse_model_output(completion) {
        ModelOutput::Structured { items, notes } => (items, notes),
        ModelOutput::RawText(text) => return raw_text_response(fragments, text),
    };

    if items.is_empty() {
        return RecommendationResponse {
            recommendations: Vec::new(),
            model_notes: Some(notes.unwrap_or_else(|| NO_RELEVANT_NOTE.to_string())),
        };
    }

    let mut seen = HashSet::new();
    let mut picked: Vec<(usize, &ModelItem)> = Vec::with_capacity(items.len());
    for item in &items {
        match match_fragment(fragments, item) {
            Some(rank) => {
                if seen.insert(rank) {
                    picked.push((rank, item));
                }
            }
            None => debug!(
                "Dropping model item that matches no retrieved fragment: {:?}",
                item
            ),
        }
    }

    if picked.is_empty() {
        warn!("Model output referenced no retrieved fragment, returning it as raw text");
        return raw_text_response(fragments, completion.trim().to_string());
    }

    picked.sort_by_key(|(rank, _)| *rank);
    let recommendations = picked
        .into_iter()
        .map(|(rank, item)| {
            let fragment = &fragments[rank];
            Recommendation {
                title: fragment
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .or_else(|| non_blank(&item.title))
                    .unwrap_or_else(|| fragment.source_id.clone()),
                description: non_blank(&item.description)
                    .unwrap_or_else(|| fragment.text.clone()),
                score: fragment.score,
            }
        })
        .collect();

    RecommendationResponse {
        recommendations,
        model_notes: notes,
    }
}

fn raw_text_response(fragments: &[RetrievedFragment], text: String) -> RecommendationResponse {
    RecommendationResponse {
        recommendations: vec![Recommendation {
            title: RAW_TEXT_TITLE.to_string(),
            description: text,
            score: fragments.first().map(|f| f.score).unwrap_or(0.0),
        }],
        model_notes: None,
    }
}

fn match_fragment(fragments: &[RetrievedFragment], item: &ModelItem) -> Option<usize> {
    if let Some(source_id) = non_blank(&item.source_id) {
        if let Some(rank) = fragments.iter().position(|f| f.source_id == source_id) {
            return Some(rank);
        }
    }

    let title = non_blank(&item.title)?.to_lowercase();
    fragments
        .iter()
        .position(|f| f.display_title().trim().to_lowercase() == title)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        build_service, build_service_with, fragment, FakeEmbedder, FakeGenerator, FakeIndex,
    };
    use std::time::Instant;

    fn java_fragments() -> Vec<RetrievedFragment> {
        vec![
            fragment("java-a", "Java Test A", 0.9),
            fragment("java-b", "Java Test B", 0.7),
        ]
    }

    #[tokio::test]
    async fn test_recommendations_preserve_fragment_order() {
        // The model lists B before A; the response must follow the index.
        let generator = FakeGenerator::replying(
            r#"{"recommendations": [
                {"source_id": "java-b", "description": "Spring and JVM"},
                {"source_id": "java-a", "description": "Core Java"}
            ]}"#,
        );
        let (service, _, index, _) = build_service(java_fragments(), generator, 2);

        let response = service
            .handle("Java backend developer assessment", None)
            .await
            .unwrap();

        let titles: Vec<_> = response
            .recommendations
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Java Test A", "Java Test B"]);
        assert_eq!(response.recommendations[0].score, 0.9);
        assert_eq!(response.recommendations[0].description, "Core Java");
        assert_eq!(index.last_k(), 2);
    }

    #[tokio::test]
    async fn test_scores_are_non_increasing() {
        let fragments = vec![
            fragment("c", "C", 0.2),
            fragment("a", "A", 0.95),
            fragment("b", "B", 0.5),
        ];
        let generator = FakeGenerator::replying(
            r#"[{"title": "c"}, {"title": "B"}, {"source_id": "a"}, {"source_id": "a"}]"#,
        );
        let (service, _, _, _) = build_service(fragments, generator, 10);

        let response = service.handle("anything", None).await.unwrap();
        assert_eq!(response.recommendations.len(), 3);
        assert!(response
            .recommendations
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_empty_query_never_reaches_collaborators() {
        let (service, embedder, index, generator) =
            build_service(java_fragments(), FakeGenerator::replying("[]"), 2);

        for raw in ["", "   ", "\n"] {
            let err = service.handle(raw, None).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidInput(_)));
        }
        let too_long = "x".repeat(service.settings().max_query_chars + 1);
        assert!(matches!(
            service.handle(&too_long, None).await,
            Err(ApiError::InvalidInput(_))
        ));

        assert_eq!(embedder.calls(), 0);
        assert_eq!(index.calls(), 0);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_fragments_skips_generation() {
        let (service, _, _, generator) =
            build_service(Vec::new(), FakeGenerator::replying("unused"), 5);

        let response = service.handle("rare skill", None).await.unwrap();
        assert_eq!(response, no_matches_response());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_timeout_is_upstream_error() {
        let generator = FakeGenerator::replying("late").with_delay(Duration::from_secs(10));
        let (mut service, _, _, _) = build_service(java_fragments(), generator, 2);
        service.settings.upstream_timeout = Duration::from_millis(50);

        let started = Instant::now();
        let err = service.handle("java", None).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::UpstreamTimeout {
                stage: UpstreamStage::Generation,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_collaborator_failures_become_upstream_errors() {
        let fragments = java_fragments();

        let (service, _, _, _) = build_service_with(
            FakeEmbedder::failing(),
            FakeIndex::new(fragments.clone()),
            FakeGenerator::replying("[]"),
            2,
        );
        assert!(matches!(
            service.handle("java", None).await,
            Err(ApiError::Upstream {
                stage: UpstreamStage::Embedding,
                ..
            })
        ));

        let (service, _, _, _) = build_service_with(
            FakeEmbedder::new(),
            FakeIndex::failing(),
            FakeGenerator::replying("[]"),
            2,
        );
        assert!(matches!(
            service.handle("java", None).await,
            Err(ApiError::Upstream {
                stage: UpstreamStage::VectorSearch,
                ..
            })
        ));

        let (service, _, _, _) = build_service(fragments, FakeGenerator::failing(), 2);
        assert!(matches!(
            service.handle("java", None).await,
            Err(ApiError::Upstream {
                stage: UpstreamStage::Generation,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_same_query_same_ordering() {
        let generator = FakeGenerator::replying(r#"[{"source_id": "java-b"}, {"source_id": "java-a"}]"#);
        let (service, _, _, _) = build_service(java_fragments(), generator, 2);

        let first = service.handle("Java backend developer", None).await.unwrap();
        let second = service.handle("Java backend developer", None).await.unwrap();
        let order = |r: &RecommendationResponse| {
            r.recommendations
                .iter()
                .map(|r| r.title.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second));
    }

    #[tokio::test]
    async fn test_top_k_is_bounded_by_configuration() {
        let fragments: Vec<_> = (0..8)
            .map(|i| fragment(&format!("id-{}", i), &format!("T{}", i), 1.0 - i as f32 / 10.0))
            .collect();
        let every_id = (0..8)
            .map(|i| format!(r#"{{"source_id": "id-{}"}}"#, i))
            .collect::<Vec<_>>()
            .join(", ");
        let generator = FakeGenerator::replying(&format!("[{}]", every_id));
        let (service, _, index, _) = build_service(fragments, generator, 3);

        // the fake ignores k, the service must still cap what it consumes
        let response = service.handle("query", Some(50)).await.unwrap();
        assert_eq!(index.last_k(), 3);
        let titles: Vec<_> = response
            .recommendations
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(titles, vec!["T0", "T1", "T2"]);

        let response = service.handle("query", Some(2)).await.unwrap();
        assert_eq!(index.last_k(), 2);
        assert_eq!(response.recommendations.len(), 2);

        assert!(matches!(
            service.handle("query", Some(0)).await,
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unordered_index_results_keep_the_best_k() {
        let fragments = vec![
            fragment("low", "Low", 0.2),
            fragment("mid", "Mid", 0.5),
            fragment("high", "High", 0.9),
        ];
        let generator = FakeGenerator::replying(
            r#"[{"source_id": "low"}, {"source_id": "mid"}, {"source_id": "high"}]"#,
        );
        let (service, _, _, _) = build_service(fragments, generator, 2);

        let response = service.handle("query", None).await.unwrap();
        let titles: Vec<_> = response
            .recommendations
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(titles, vec!["High", "Mid"]);
    }

    #[tokio::test]
    async fn test_blank_completion_is_upstream_error() {
        let (service, _, _, _) = build_service(java_fragments(), FakeGenerator::replying("  \n"), 2);
        assert!(matches!(
            service.handle("java", None).await,
            Err(ApiError::Upstream {
                stage: UpstreamStage::Generation,
                ..
            })
        ));
    }

    #[test]
    fn test_raw_text_fallback() {
        let response = shape_response(&java_fragments(), "Try Java Test A, it covers the basics.");
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0].title, RAW_TEXT_TITLE);
        assert_eq!(
            response.recommendations[0].description,
            "Try Java Test A, it covers the basics."
        );
        assert_eq!(response.recommendations[0].score, 0.9);
        assert!(response.model_notes.is_none());
    }

    #[test]
    fn test_unmatched_structured_output_falls_back_to_raw_text() {
        let completion = r#"[{"source_id": "python-x", "title": "Python X"}]"#;
        let response = shape_response(&java_fragments(), completion);
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0].description, completion);
    }

    #[test]
    fn test_empty_structured_output_keeps_notes() {
        let response = shape_response(
            &java_fragments(),
            r#"{"recommendations": [], "notes": "Nothing fits a chef role."}"#,
        );
        assert!(response.recommendations.is_empty());
        assert_eq!(
            response.model_notes.as_deref(),
            Some("Nothing fits a chef role.")
        );

        let response = shape_response(&java_fragments(), r#"{"recommendations": []}"#);
        assert_eq!(response.model_notes.as_deref(), Some(NO_RELEVANT_NOTE));
    }

    #[test]
    fn test_missing_description_uses_fragment_text() {
        let response = shape_response(&java_fragments(), r#"[{"source_id": "java-b"}]"#);
        assert_eq!(response.recommendations[0].description, "Text of Java Test B");
    }
}
