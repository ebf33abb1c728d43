use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// External collaborator a request was waiting on when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStage {
    Embedding,
    VectorSearch,
    Generation,
}

impl fmt::Display for UpstreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpstreamStage::Embedding => "embedding",
            UpstreamStage::VectorSearch => "vector search",
            UpstreamStage::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream {stage} failed: {detail}")]
    Upstream {
        stage: UpstreamStage,
        detail: String,
    },

    #[error("Upstream {stage} timed out after {timeout:?}")]
    UpstreamTimeout {
        stage: UpstreamStage,
        timeout: Duration,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// Message safe to hand to HTTP clients. Upstream and internal details
    /// stay in the server logs.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::InvalidInput(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::MethodNotAllowed => "Method not allowed".to_string(),
            ApiError::Upstream { .. } | ApiError::UpstreamTimeout { .. } => {
                "An upstream service failed while processing the request.".to_string()
            }
            ApiError::Config(_) | ApiError::InternalError(_) => {
                "An internal error occurred while processing the request.".to_string()
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Upstream { .. } | ApiError::UpstreamTimeout { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Config(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }

        HttpResponse::build(status).json(ErrorResponse {
            error: self.public_message(),
        })
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::Config(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{:#}", err))
    }
}
