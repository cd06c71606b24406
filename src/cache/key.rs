//! Cache keys and target normalization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Which kind of analysis produced a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Website,
    Repository,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Website => "website",
            AnalysisKind::Repository => "repository",
        }
    }

    /// External service that backs this kind of analysis.
    pub fn service_name(&self) -> &'static str {
        match self {
            AnalysisKind::Website => "http_scraper",
            AnalysisKind::Repository => "github_api",
        }
    }

    /// Name under which the performance monitor tracks this analysis.
    pub fn operation_name(&self) -> &'static str {
        match self {
            AnalysisKind::Website => "website_analysis",
            AnalysisKind::Repository => "repository_analysis",
        }
    }

    /// Guess the kind from a target URL: GitHub repository links are
    /// repository analyses, everything else is a website.
    pub fn infer(target: &str) -> Self {
        let normalized = normalize_target(target);
        match Url::parse(&normalized) {
            Ok(url) if url.host_str() == Some("github.com") || url.host_str() == Some("www.github.com") => {
                AnalysisKind::Repository
            }
            _ => AnalysisKind::Website,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "website" => Ok(AnalysisKind::Website),
            "repository" | "github" => Ok(AnalysisKind::Repository),
            other => Err(format!("unknown analysis type '{}'", other)),
        }
    }
}

/// Identity of a cached analysis: normalized target plus analysis kind.
///
/// Construct through [`CacheKey::new`] so the target is always normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    target: String,
    kind: AnalysisKind,
}

impl CacheKey {
    pub fn new(target: &str, kind: AnalysisKind) -> Self {
        Self {
            target: normalize_target(target),
            kind,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.target)
    }
}

/// Normalize a target so scheme case, host case and trailing slashes do not
/// change its identity.
///
/// Parseable URLs go through `url` first (drops default ports, canonicalizes
/// the authority); the result is then lowercased as a whole and stripped of
/// trailing slashes.
pub fn normalize_target(raw: &str) -> String {
    let trimmed = raw.trim();
    let canonical = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url.to_string(),
        _ => trimmed.to_string(),
    };
    canonical.to_lowercase().trim_end_matches('/').to_string()
}
