use async_trait::async_trait;

/// Hosted text-generation model.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// Complete `prompt`, returning the model's free-form text.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
