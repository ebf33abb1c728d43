use crate::error::{ApiError, Result};
use config::Environment;
use serde::Deserialize;
use std::{env, fmt::Display, time::Duration};
use tracing::{info, warn};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5001;
const DEFAULT_GENERATION_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
const DEFAULT_VECTOR_STORE: &str = "data/catalog_index.json";
const DEFAULT_TOP_K: usize = 10;
const DEFAULT_PROMPT_CHAR_BUDGET: usize = 6000;
const DEFAULT_MAX_QUERY_CHARS: usize = 2000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Credential variable accepted when `APP_GENERATION_API_KEY` is unset.
const LEGACY_API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// Process-wide settings, read once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub generation_api_key: String,
    pub generation_base_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    /// Local index file path, or the `http(s)://` host of a Pinecone index.
    pub vector_store: String,
    pub vector_store_api_key: Option<String>,
    pub top_k: usize,
    pub prompt_char_budget: usize,
    pub max_query_chars: usize,
    pub request_timeout: Duration,
}

/// Shape of the `APP_*` environment before defaults are applied.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    host: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
    generation_api_key: Option<String>,
    generation_base_url: Option<String>,
    generation_model: Option<String>,
    embedding_model: Option<String>,
    vector_store: Option<String>,
    vector_store_api_key: Option<String>,
    top_k: Option<usize>,
    prompt_char_budget: Option<usize>,
    max_query_chars: Option<usize>,
    request_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from `APP_*` environment variables.
    ///
    /// Fails when no generation API key is available, either as
    /// `APP_GENERATION_API_KEY` or `GOOGLE_API_KEY`.
    pub fn load() -> Result<Self> {
        let legacy_key = env::var(LEGACY_API_KEY_VAR).ok();
        Self::from_environment(Environment::with_prefix("APP"), legacy_key)
    }

    pub(crate) fn from_environment(
        environment: Environment,
        legacy_api_key: Option<String>,
    ) -> Result<Self> {
        let raw: RawConfig = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        let generation_api_key = non_empty(raw.generation_api_key)
            .or_else(|| non_empty(legacy_api_key))
            .ok_or_else(|| {
                ApiError::Config(
                    "APP_GENERATION_API_KEY (or GOOGLE_API_KEY) must be set".to_string(),
                )
            })?;

        let config = Config {
            host: or_default("APP_HOST", non_empty(raw.host), DEFAULT_HOST.to_string()),
            port: or_default("APP_PORT", raw.port, DEFAULT_PORT),
            workers: raw.workers,
            generation_api_key,
            generation_base_url: or_default(
                "APP_GENERATION_BASE_URL",
                non_empty(raw.generation_base_url),
                DEFAULT_GENERATION_BASE_URL.to_string(),
            )
            .trim_end_matches('/')
            .to_string(),
            generation_model: or_default(
                "APP_GENERATION_MODEL",
                non_empty(raw.generation_model),
                DEFAULT_GENERATION_MODEL.to_string(),
            ),
            embedding_model: or_default(
                "APP_EMBEDDING_MODEL",
                non_empty(raw.embedding_model),
                DEFAULT_EMBEDDING_MODEL.to_string(),
            ),
            vector_store: or_default(
                "APP_VECTOR_STORE",
                non_empty(raw.vector_store),
                DEFAULT_VECTOR_STORE.to_string(),
            ),
            vector_store_api_key: non_empty(raw.vector_store_api_key),
            top_k: positive("APP_TOP_K", or_default("APP_TOP_K", raw.top_k, DEFAULT_TOP_K))?,
            prompt_char_budget: positive(
                "APP_PROMPT_CHAR_BUDGET",
                or_default(
                    "APP_PROMPT_CHAR_BUDGET",
                    raw.prompt_char_budget,
                    DEFAULT_PROMPT_CHAR_BUDGET,
                ),
            )?,
            max_query_chars: positive(
                "APP_MAX_QUERY_CHARS",
                or_default(
                    "APP_MAX_QUERY_CHARS",
                    raw.max_query_chars,
                    DEFAULT_MAX_QUERY_CHARS,
                ),
            )?,
            request_timeout: Duration::from_secs(positive(
                "APP_REQUEST_TIMEOUT_SECS",
                or_default(
                    "APP_REQUEST_TIMEOUT_SECS",
                    raw.request_timeout_secs,
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
            )?),
        };

        info!(
            "Configuration loaded: vector store {}, generation model {}, embedding model {}, top_k {}, prompt budget {} chars, timeout {:?}",
            config.vector_store,
            config.generation_model,
            config.embedding_model,
            config.top_k,
            config.prompt_char_budget,
            config.request_timeout
        );

        Ok(config)
    }

    /// Whether the vector store points at a remote (Pinecone) index.
    pub fn uses_remote_vector_store(&self) -> bool {
        self.vector_store.starts_with("http://") || self.vector_store.starts_with("https://")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn or_default<T: Display>(name: &str, value: Option<T>, default: T) -> T {
    match value {
        Some(value) => value,
        None => {
            warn!("{} not set, using default: {}", name, default);
            default
        }
    }
}

fn positive<T: Default + PartialOrd + Display>(name: &str, value: T) -> Result<T> {
    if value <= T::default() {
        return Err(ApiError::Config(format!(
            "{} must be greater than zero, got {}",
            name, value
        )));
    }
    Ok(value)
}
