//! In-process fakes of the external collaborators for unit tests.

use crate::{
    models::RetrievedFragment,
    services::{
        embedding::EmbeddingModel,
        generation::GenerationModel,
        recommendation::{PipelineSettings, RecommendationService},
        vector_index::VectorIndex,
    },
};
use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub fn fragment(source_id: &str, title: &str, score: f32) -> RetrievedFragment {
    RetrievedFragment {
        text: format!("Text of {}", title),
        source_id: source_id.to_string(),
        title: Some(title.to_string()),
        score,
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingModel for FakeEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("embedding backend unreachable");
        }
        Ok(vec![text.len() as f32, 1.0])
    }
}

/// Returns its fixed fragments regardless of the query vector or `k`.
pub struct FakeIndex {
    fragments: Vec<RetrievedFragment>,
    calls: AtomicUsize,
    last_k: AtomicUsize,
    fail: bool,
}

impl FakeIndex {
    pub fn new(fragments: Vec<RetrievedFragment>) -> Self {
        Self {
            fragments,
            calls: AtomicUsize::new(0),
            last_k: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_k(&self) -> usize {
        self.last_k.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn search(&self, _vector: &[f32], k: usize) -> anyhow::Result<Vec<RetrievedFragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_k.store(k, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("index file is corrupt");
        }
        Ok(self.fragments.clone())
    }
}

pub struct FakeGenerator {
    reply: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    fail: bool,
    panic: bool,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
            fail: false,
            panic: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying("")
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::replying("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationModel for FakeGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("generator exploded");
        }
        if self.fail {
            anyhow::bail!("quota exceeded for project");
        }
        Ok(self.reply.clone())
    }
}

pub fn settings(top_k: usize) -> PipelineSettings {
    PipelineSettings {
        top_k,
        prompt_char_budget: 6000,
        max_query_chars: 2000,
        upstream_timeout: Duration::from_secs(5),
    }
}

pub fn build_service_with(
    embedder: FakeEmbedder,
    index: FakeIndex,
    generator: FakeGenerator,
    top_k: usize,
) -> (
    RecommendationService,
    Arc<FakeEmbedder>,
    Arc<FakeIndex>,
    Arc<FakeGenerator>,
) {
    let embedder = Arc::new(embedder);
    let index = Arc::new(index);
    let generator = Arc::new(generator);
    let service = RecommendationService::new(
        settings(top_k),
        embedder.clone(),
        index.clone(),
        generator.clone(),
    );
    (service, embedder, index, generator)
}

pub fn build_service(
    fragments: Vec<RetrievedFragment>,
    generator: FakeGenerator,
    top_k: usize,
) -> (
    RecommendationService,
    Arc<FakeEmbedder>,
    Arc<FakeIndex>,
    Arc<FakeGenerator>,
) {
    build_service_with(FakeEmbedder::new(), FakeIndex::new(fragments), generator, top_k)
}
