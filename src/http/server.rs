//! HTTP server setup and handlers.
//!
//! # Responsibilities
//! - Build the Axum router (public API, health, admin)
//! - Wire up middleware (request ID, tracing, timeout, rate limit, metrics)
//! - Serve until the shutdown broadcast fires
//! - Apply hot-reloaded configuration to the running pipeline
//! - Run background maintenance while serving

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::cache::{AnalysisKind, CacheStats};
use crate::clock::{SharedClock, SystemClock};
use crate::config::GatewayConfig;
use crate::http::middleware::metrics::track_requests;
use crate::http::request::{request_id, MakeRequestUuid, X_REQUEST_ID};
use crate::http::response::{invalid_request, outcome_response};
use crate::lifecycle::maintenance;
use crate::observability::performance::SummaryTotals;
use crate::pipeline::RequestPipeline;
use crate::resilience::{CircuitState, ServiceStatus};
use crate::security::rate_limit::{rate_limit_middleware, RateLimitInfo, RateLimitState};
use crate::upstream::{AnalysisRequest, Analyzer, UpstreamClient};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
    /// Current configuration; swapped on reload.
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub clock: SharedClock,
    pub started_at: Instant,
}

/// HTTP server for the analysis gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server that analyzes through the real upstream client.
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = UpstreamClient::new(&config.upstream)?;
        Ok(Self::with_analyzer(config, Arc::new(client), SystemClock::shared()))
    }

    /// Create a server with an explicit analyzer and clock.
    pub fn with_analyzer(config: GatewayConfig, analyzer: Arc<dyn Analyzer>, clock: SharedClock) -> Self {
        let pipeline = Arc::new(RequestPipeline::with_clock(&config, analyzer, Arc::clone(&clock)));
        let state = AppState {
            pipeline,
            config: Arc::new(ArcSwap::from_pointee(config)),
            clock,
            started_at: Instant::now(),
        };
        let router = Self::build_router(&state);
        Self { router, state }
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.state.pipeline
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: &AppState) -> Router {
        let config = state.config.load_full();

        let mut api = Router::new()
            .route("/", get(health_handler))
            .route("/health", get(health_handler))
            .route("/api/analyze", post(analyze_handler));

        if config.rate_limit.enabled {
            let rate_state = RateLimitState {
                limiter: Arc::clone(state.pipeline.limiter()),
                exempt_paths: Arc::new(config.rate_limit.exempt_paths.clone()),
                clock: Arc::clone(&state.clock),
            };
            api = api.layer(middleware::from_fn_with_state(rate_state, rate_limit_middleware));
        }

        api.merge(admin::setup_admin_router(state.clone()))
            .route_layer(middleware::from_fn(track_requests))
            .with_state(state.clone())
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id(request.headers()),
                )
            }))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// New configurations received on `config_updates` are applied live.
    /// Returns once `shutdown` fires and in-flight requests drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let tasks = maintenance::spawn_all(
            Arc::clone(&self.state.pipeline),
            &self.state.config.load(),
            &shutdown,
        );

        let reload_state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                reload_state.pipeline.apply_config(&new_config);
                reload_state.config.store(Arc::new(new_config));
                tracing::info!("Configuration reloaded");
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        reloader.abort();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub services: Vec<ServiceStatus>,
    pub performance: SummaryTotals,
}

/// Liveness plus a summary of every subsystem. Degraded while any breaker
/// is open.
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let services = state.pipeline.all_service_status();
    let degraded = services.iter().any(|s| s.state == CircuitState::Open);

    Json(HealthReport {
        status: if degraded { "degraded" } else { "healthy" },
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        cache: state.pipeline.get_cache_stats(),
        services,
        performance: state.pipeline.get_performance_summary().summary,
    })
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
    #[serde(default)]
    pub analysis_type: Option<String>,
}

async fn analyze_handler(
    State(state): State<AppState>,
    rate_limit: Option<Extension<RateLimitInfo>>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_request(rejection.body_text()),
    };

    let target = body.url.trim();
    if target.is_empty() {
        return invalid_request("url must not be empty");
    }

    let kind = match body.analysis_type.as_deref() {
        Some(raw) => match raw.parse::<AnalysisKind>() {
            Ok(kind) => kind,
            Err(e) => return invalid_request(e),
        },
        None => AnalysisKind::infer(target),
    };

    tracing::info!(url = %target, analysis_type = kind.as_str(), "Analysis requested");

    let request = AnalysisRequest::new(target, kind);
    let outcome = state
        .pipeline
        .process(request, rate_limit.map(|Extension(info)| info))
        .await;
    outcome_response(outcome, state.clock.unix_now()).into_response()
}
