use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::cache::{AnalysisKind, CacheStats};
use crate::http::response::invalid_request;
use crate::http::server::AppState;
use crate::observability::performance::PerformanceSummary;
use crate::resilience::ServiceStatus;

pub async fn get_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.pipeline.get_cache_stats())
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.pipeline.clear_cache();
    Json(json!({ "status": "success", "message": "Cache cleared" }))
}

#[derive(Debug, Deserialize)]
pub struct CacheInfoQuery {
    pub url: String,
    pub analysis_type: Option<String>,
}

/// Inspect one cache entry without counting a lookup.
pub async fn get_cache_info(
    State(state): State<AppState>,
    Query(query): Query<CacheInfoQuery>,
) -> Response {
    let kind = match query.analysis_type.as_deref() {
        Some(raw) => match raw.parse::<AnalysisKind>() {
            Ok(kind) => kind,
            Err(e) => return invalid_request(e),
        },
        None => AnalysisKind::infer(&query.url),
    };

    match state.pipeline.get_cache_info(&query.url, kind) {
        Some(info) => Json(json!({ "cached": true, "info": info })).into_response(),
        None => Json(json!({ "cached": false, "url": query.url, "analysis_type": kind })).into_response(),
    }
}

pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceStatus>> {
    Json(state.pipeline.all_service_status())
}

pub async fn get_service(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let status = state.pipeline.get_service_status(&name);
    if !status.known {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown service '{name}'") })),
        )
            .into_response();
    }
    Json(status).into_response()
}

pub async fn reset_service(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.pipeline.reset_circuit_breaker(&name) {
        tracing::info!(service = %name, "Circuit breaker reset by operator");
        Json(json!({
            "status": "success",
            "message": format!("Circuit breaker for {name} reset"),
            "service": state.pipeline.get_service_status(&name),
        }))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no circuit breaker for '{name}'") })),
        )
            .into_response()
    }
}

pub async fn get_performance(State(state): State<AppState>) -> Json<PerformanceSummary> {
    Json(state.pipeline.get_performance_summary())
}

#[derive(Debug, Deserialize)]
pub struct ClearMetricsQuery {
    pub operation: Option<String>,
}

pub async fn clear_performance(
    State(state): State<AppState>,
    Query(query): Query<ClearMetricsQuery>,
) -> Json<serde_json::Value> {
    state.pipeline.clear_metrics(query.operation.as_deref());
    let message = match &query.operation {
        Some(op) => format!("Cleared metrics for {op}"),
        None => "Cleared all performance metrics".to_string(),
    };
    Json(json!({ "status": "success", "message": message }))
}
