//! Mapping pipeline outcomes to HTTP responses.
//!
//! | Outcome          | Status | Body                          |
//! |------------------|--------|-------------------------------|
//! | Success          | 200    | result + cache flag           |
//! | RateLimited      | 429    | limit info, `Retry-After`     |
//! | CircuitOpen      | 503    | degraded fallback, `Retry-After` |
//! | RetryExhausted   | 502    | degraded fallback             |
//! | Rejected         | 422    | upstream rejection message    |

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::pipeline::AnalysisOutcome;
use crate::security::rate_limit::rate_limited_response;

pub fn outcome_response(outcome: AnalysisOutcome, unix_now: u64) -> Response {
    match outcome {
        AnalysisOutcome::Success {
            result,
            cache_hit,
            rate_limit,
        } => {
            let mut response = Json(json!({
                "status": "success",
                "cache_hit": cache_hit,
                "result": result,
            }))
            .into_response();
            if let Some(info) = rate_limit {
                response.headers_mut().extend(info.headers());
            }
            response
        }
        AnalysisOutcome::RateLimited(info) => rate_limited_response(&info, unix_now),
        AnalysisOutcome::CircuitOpen {
            service,
            retry_after_secs,
            fallback,
        } => {
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "error": fallback.error_type,
                    "message": format!("{service} is temporarily unavailable"),
                    "retry_after_seconds": retry_after_secs,
                    "fallback": fallback,
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
        AnalysisOutcome::RetryExhausted {
            service,
            attempts,
            fallback,
        } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "status": "degraded",
                "error": fallback.error_type,
                "message": format!("{service} failed after {attempts} attempt(s)"),
                "attempts": attempts,
                "fallback": fallback,
            })),
        )
            .into_response(),
        AnalysisOutcome::Rejected { service, message } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "status": "error",
                "error": "NonRetryableError",
                "service": service,
                "message": message,
            })),
        )
            .into_response(),
    }
}

/// A 422 for requests rejected before reaching the pipeline.
pub fn invalid_request(message: impl Into<String>) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "status": "error",
            "error": "ValidationError",
            "message": message.into(),
        })),
    )
        .into_response()
}
