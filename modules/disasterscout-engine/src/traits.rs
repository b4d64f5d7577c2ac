// Trait abstractions for the external collaborators.
//
// SearchProvider — raw news snippets for a query.
// ExtractionClient — LLM classification of one snippet.
// Geocoder — place name to coordinates.
// (The persistence seam, IncidentStore, lives in `store.rs`.)
//
// These enable deterministic testing with mock implementations:
// no network, no API keys, no Docker. `cargo test` in seconds.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// One raw search result snippet with its source timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnippet {
    pub text: String,
    pub url: String,
    /// Timestamp of the source report, when the provider supplies one.
    pub published_at: Option<DateTime<Utc>>,
}

/// What the classification collaborator returns for one snippet.
/// Fields are loose strings; the normalizer owns validation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawExtraction {
    /// Incident type: "flood", "storm", "wildfire", "infrastructure",
    /// "sos", "shelter", "general_info", or "unknown".
    pub incident_type: Option<String>,
    /// The most specific place mentioned in the text.
    pub raw_location_text: Option<String>,
    /// Severity hint: "low", "medium", "high", or "critical".
    pub severity_hint: Option<String>,
    /// Classifier confidence in this extraction, 0–1.
    pub extraction_confidence: f64,
}

/// Tagged classification outcome, consumed exhaustively by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExtractionResult {
    Valid(RawExtraction),
    NotDisasterRelated,
    Malformed { reason: String },
}

/// A geocoder match for a place-name query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeocodedPlace {
    pub lat: f64,
    pub lng: f64,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch raw snippets for a query. Provider failures surface as `Err`;
    /// the pipeline treats them as zero results for the cycle.
    async fn search(&self, query: &str) -> Result<Vec<RawSnippet>>;
}

#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Classify one snippet into a structured extraction guess.
    async fn classify(&self, snippet_text: &str) -> Result<ExtractionResult>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a place-name query. `Ok(None)` means the provider found no
    /// match at all; confidence filtering happens in the resolver.
    async fn geocode(&self, query: &str) -> Result<Option<GeocodedPlace>>;
}
