//! Administrative API.
//!
//! Cache, circuit breaker and performance management for operators. Routes
//! live under `/admin` and require a bearer token while `admin.enabled`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/cache/stats", get(get_cache_stats))
        .route("/admin/cache/clear", post(clear_cache))
        .route("/admin/cache/info", get(get_cache_info))
        .route("/admin/services", get(list_services))
        .route("/admin/services/{name}", get(get_service))
        .route("/admin/services/{name}/reset", post(reset_service))
        .route("/admin/performance", get(get_performance))
        .route("/admin/performance/clear", post(clear_performance))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
