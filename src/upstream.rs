//! Calls to external analysis sources.
//!
//! Website analysis fetches the target page; repository analysis fetches
//! repository metadata from a GitHub-compatible API. Both return the raw
//! facts as JSON and map transport failures onto [`UpstreamError`] so the
//! retry executor can classify them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use crate::cache::AnalysisKind;
use crate::config::schema::UpstreamConfig;
use crate::observability::metadata::Metadata;
use crate::resilience::errors::UpstreamError;
use crate::resilience::timeouts::with_timeout;

pub type AnalyzeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, UpstreamError>> + Send + 'a>>;

/// One analysis request as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub target: String,
    pub kind: AnalysisKind,
    pub context: Metadata,
}

impl AnalysisRequest {
    pub fn new(target: impl Into<String>, kind: AnalysisKind) -> Self {
        Self {
            target: target.into(),
            kind,
            context: Metadata::new(),
        }
    }
}

/// The external work behind a cache miss.
pub trait Analyzer: Send + Sync {
    fn analyze<'a>(&'a self, request: &'a AnalysisRequest) -> AnalyzeFuture<'a>;
}

/// Headers worth reporting from a scraped site.
const REPORTED_HEADERS: &[&str] = &[
    "server",
    "x-powered-by",
    "x-generator",
    "x-aspnet-version",
    "x-drupal-cache",
    "via",
    "content-type",
];

pub struct UpstreamClient {
    http: reqwest::Client,
    github_api_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5));
        if !config.use_env_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            github_api_url: config.github_api_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn analyze_website(&self, target: &str) -> Result<Value, UpstreamError> {
        let url = url::Url::parse(target)
            .map_err(|e| UpstreamError::InvalidInput(format!("invalid url {target}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidInput(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let response = self.http.get(url.clone()).send().await.map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers()));
        }

        let mut headers = Map::new();
        for name in REPORTED_HEADERS {
            if let Some(value) = response.headers().get(*name).and_then(|v| v.to_str().ok()) {
                headers.insert((*name).to_string(), Value::String(value.to_string()));
            }
        }

        Ok(json!({
            "analysis_type": "website",
            "url": url.as_str(),
            "final_url": response.url().as_str(),
            "status": status.as_u16(),
            "headers": headers,
        }))
    }

    async fn analyze_repository(&self, target: &str) -> Result<Value, UpstreamError> {
        let (owner, repo) = parse_repository(target)?;
        let endpoint = format!("{}/repos/{}/{}", self.github_api_url, owner, repo);

        let response = self
            .http
            .get(&endpoint)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(format!("invalid repository payload: {e}")))?;

        Ok(json!({
            "analysis_type": "repository",
            "repository": format!("{owner}/{repo}"),
            "default_branch": body.get("default_branch").cloned().unwrap_or(Value::Null),
            "language": body.get("language").cloned().unwrap_or(Value::Null),
            "created_at": body.get("created_at").cloned().unwrap_or(Value::Null),
            "pushed_at": body.get("pushed_at").cloned().unwrap_or(Value::Null),
            "archived": body.get("archived").cloned().unwrap_or(Value::Bool(false)),
        }))
    }
}

impl Analyzer for UpstreamClient {
    fn analyze<'a>(&'a self, request: &'a AnalysisRequest) -> AnalyzeFuture<'a> {
        Box::pin(with_timeout(self.timeout, async move {
            match request.kind {
                AnalysisKind::Website => self.analyze_website(&request.target).await,
                AnalysisKind::Repository => self.analyze_repository(&request.target).await,
            }
        }))
    }
}

/// Extract `(owner, repo)` from a repository URL or `owner/repo` shorthand.
pub fn parse_repository(target: &str) -> Result<(String, String), UpstreamError> {
    let trimmed = target.trim();
    let path = match url::Url::parse(trimmed) {
        Ok(url) => url.path().to_string(),
        Err(_) => trimmed.to_string(),
    };

    let mut parts = path.split('/').filter(|s| !s.is_empty());
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(UpstreamError::InvalidInput(format!(
            "not a repository reference: {target}"
        ))),
    }
}

fn map_transport(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(Duration::ZERO)
    } else if err.is_connect() {
        UpstreamError::Connect(err.to_string())
    } else if err.is_builder() {
        UpstreamError::InvalidInput(err.to_string())
    } else {
        UpstreamError::Other(err.to_string())
    }
}

fn status_error(status: StatusCode, headers: &HeaderMap) -> UpstreamError {
    let quota_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let retry_after_secs = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    UpstreamError::Status {
        status: status.as_u16(),
        rate_limited: status == StatusCode::TOO_MANY_REQUESTS || quota_exhausted,
        retry_after_secs,
    }
}
