use actix_web::{error::JsonPayloadError, web, HttpRequest};
use tracing::warn;

use crate::error::ApiError;
use crate::handlers::{health_check, method_not_allowed, recommend};

/// Largest accepted request body.
const JSON_BODY_LIMIT: usize = 64 * 1024;

/// Configure all routes for the API
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config()).service(health_check).service(
        web::resource("/recommend")
            .route(web::post().to(recommend))
            .default_service(web::to(method_not_allowed)),
    );
}

/// Reject unusable bodies as client errors with a JSON message.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
            warn!("Rejected request body: {}", err);
            let message = match &err {
                JsonPayloadError::ContentType => "Request must be JSON.".to_string(),
                JsonPayloadError::Deserialize(e) if e.is_data() => {
                    "Invalid request body. Required: {\"query\": \"your non-empty query\"}."
                        .to_string()
                }
                JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                    format!("Request body exceeds {} bytes.", JSON_BODY_LIMIT)
                }
                _ => "Invalid JSON format in request body.".to_string(),
            };
            ApiError::InvalidInput(message).into()
        })
}
