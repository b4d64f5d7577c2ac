use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

impl GeoPoint {
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// A geographic bounding box for store queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub const WORLD: BoundingBox = BoundingBox {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lng: -180.0,
        max_lng: 180.0,
    };

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }
}

/// Coordinates attached to a candidate by the geo resolver, with the
/// geocoder's confidence in the match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCoordinates {
    pub point: GeoPoint,
    pub confidence: f64,
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Flood,
    Storm,
    Wildfire,
    Infrastructure,
    Sos,
    Shelter,
    GeneralInfo,
    Unknown,
}

impl IncidentType {
    /// Area-scale hazards spread; point-scale reports stay local. The merge
    /// radius for similarity scoring depends on which kind this is.
    pub fn is_area_incident(&self) -> bool {
        matches!(self, IncidentType::Wildfire | IncidentType::Storm)
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "flood" | "flooding" => Some(IncidentType::Flood),
            "storm" => Some(IncidentType::Storm),
            "wildfire" | "fire" => Some(IncidentType::Wildfire),
            "infrastructure" => Some(IncidentType::Infrastructure),
            "sos" => Some(IncidentType::Sos),
            "shelter" => Some(IncidentType::Shelter),
            "general_info" | "info" => Some(IncidentType::GeneralInfo),
            "unknown" => Some(IncidentType::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentType::Flood => write!(f, "flood"),
            IncidentType::Storm => write!(f, "storm"),
            IncidentType::Wildfire => write!(f, "wildfire"),
            IncidentType::Infrastructure => write!(f, "infrastructure"),
            IncidentType::Sos => write!(f, "sos"),
            IncidentType::Shelter => write!(f, "shelter"),
            IncidentType::GeneralInfo => write!(f, "general_info"),
            IncidentType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Freshness lifecycle of a canonical incident. Transitions only move
/// forward with time; the sole way back to Active is a merge that extends
/// `last_reported_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Active,
    Stale,
    Expired,
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentState::Active => write!(f, "active"),
            IncidentState::Stale => write!(f, "stale"),
            IncidentState::Expired => write!(f, "expired"),
        }
    }
}

// --- Incident Records ---

/// One validated, not-yet-merged report of a possible disaster event.
/// Owned by the ingestion batch that produced it; discarded after the
/// merge decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateIncident {
    pub source_text: String,
    pub source_url: String,
    pub incident_type: IncidentType,
    pub raw_location_text: String,
    pub resolved_coordinates: Option<ResolvedCoordinates>,
    pub severity_hint: Option<Severity>,
    pub reported_at: DateTime<Utc>,
    pub extraction_confidence: f64,
}

/// The persisted record for one real-world event cluster.
///
/// The merge engine and lifecycle sweep are the only writers; readers get
/// cloned snapshots. `version` increments on every committed write and is
/// checked by the store for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIncident {
    pub id: Uuid,
    pub incident_type: IncidentType,
    pub centroid: GeoPoint,
    /// Confidence of the centroid: max geocode confidence seen so far.
    pub centroid_confidence: f64,
    /// Accumulated sum of contributing geocode confidences. Denominator of
    /// the confidence-weighted running average.
    pub centroid_weight: f64,
    pub representative_summary: String,
    pub summary_confidence: f64,
    pub summary_reported_at: DateTime<Utc>,
    pub severity: Severity,
    pub contributing_report_count: u32,
    pub source_urls: Vec<String>,
    pub first_reported_at: DateTime<Utc>,
    pub last_reported_at: DateTime<Utc>,
    pub state: IncidentState,
    pub last_evaluated_at: DateTime<Utc>,
    pub version: u64,
}

impl CanonicalIncident {
    /// Seed a new canonical incident from a geocoded candidate.
    /// Callers must only pass candidates with resolved coordinates.
    pub fn from_candidate(candidate: &CandidateIncident, now: DateTime<Utc>) -> Option<Self> {
        let coords = candidate.resolved_coordinates?;
        Some(Self {
            id: Uuid::new_v4(),
            incident_type: candidate.incident_type,
            centroid: coords.point,
            centroid_confidence: coords.confidence,
            centroid_weight: coords.confidence,
            representative_summary: candidate.source_text.clone(),
            summary_confidence: candidate.extraction_confidence,
            summary_reported_at: candidate.reported_at,
            severity: candidate.severity_hint.unwrap_or(Severity::Low),
            contributing_report_count: 1,
            source_urls: if candidate.source_url.is_empty() {
                Vec::new()
            } else {
                vec![candidate.source_url.clone()]
            },
            first_reported_at: candidate.reported_at,
            last_reported_at: candidate.reported_at,
            state: IncidentState::Active,
            last_evaluated_at: now,
            version: 0,
        })
    }
}

// --- Text Normalization ---

/// Trim and collapse internal whitespace. Used both for candidate text
/// cleanup and for the exact-duplicate comparison key.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
