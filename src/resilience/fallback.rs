//! Degraded responses for failed analyses.
//!
//! Building a fallback has no side effects and never fails; callers may
//! log or cache the result as they see fit.

use serde::Serialize;

use crate::clock::unix_secs;
use crate::observability::metadata::{Metadata, MetadataValue};
use crate::resilience::errors::ServiceError;

#[derive(Debug, Clone, Serialize)]
pub struct FallbackResponse {
    pub service_name: String,
    pub error_type: String,
    pub error_message: String,
    pub fallback_active: bool,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Metadata>,
    pub detected_components: Vec<serde_json::Value>,
    pub failed_detections: Vec<String>,
    pub detection_metadata: Metadata,
}

pub fn build_fallback(service_name: &str, error: &ServiceError, context: &Metadata) -> FallbackResponse {
    let (analysis_type, failed) = match service_name {
        "github_api" => ("repository", format!("GitHub API unavailable: {error}")),
        "http_scraper" => ("website", format!("HTTP scraping unavailable: {error}")),
        other => ("unknown", format!("{other} unavailable: {error}")),
    };

    let mut detection_metadata = Metadata::new();
    detection_metadata.insert("analysis_type".into(), MetadataValue::from(analysis_type));
    detection_metadata.insert(
        "fallback_reason".into(),
        MetadataValue::from(format!("{service_name}_failure")),
    );
    detection_metadata.insert("original_error".into(), MetadataValue::from(error.to_string()));

    FallbackResponse {
        service_name: service_name.to_string(),
        error_type: error.type_name().to_string(),
        error_message: error.to_string(),
        fallback_active: true,
        timestamp: unix_secs(std::time::SystemTime::now()),
        context: (!context.is_empty()).then(|| context.clone()),
        detected_components: Vec::new(),
        failed_detections: vec![failed],
        detection_metadata,
    }
}
