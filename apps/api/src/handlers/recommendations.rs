use crate::{
    error::ApiError,
    models::RecommendationRequest,
    services::RecommendationService,
};
use actix_web::{
    web::{self, Json},
    HttpRequest, HttpResponse,
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe};
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// Recommend catalog entries for a free-text query.
///
/// `POST /recommend` with `{"query": "..."}`. Validation failures map to
/// 400, collaborator failures to 502 and anything unexpected, including a
/// panic inside the pipeline, to 500.
pub async fn recommend(
    request: Json<RecommendationRequest>,
    recommendation_service: web::Data<RecommendationService>,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let RecommendationRequest { query, top_k } = request.into_inner();

    let outcome = AssertUnwindSafe(async move { recommendation_service.handle(&query, top_k).await })
        .catch_unwind()
        .instrument(info_span!("recommend", %request_id))
        .await;

    match outcome {
        Ok(result) => Ok(HttpResponse::Ok().json(result?)),
        Err(panic) => Err(ApiError::InternalError(format!(
            "request {} panicked: {}",
            request_id,
            panic_message(panic.as_ref())
        ))),
    }
}

pub async fn method_not_allowed() -> Result<HttpResponse, ApiError> {
    Err(ApiError::MethodNotAllowed)
}

pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound(format!("No route for {}", req.path())))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
