use std::time::Duration;

use anyhow::Result;
use chrono::Duration as ChronoDuration;

/// All tuning knobs for the engine. `Default` carries the production
/// values; `from_env()` lets deployments override individual knobs without
/// a config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extractions below this confidence never become candidates.
    pub min_extraction_confidence: f64,
    /// Geocode matches below this confidence are treated as not found.
    pub min_geocode_confidence: f64,
    /// Composite similarity floor for merge eligibility.
    pub merge_threshold: f64,
    /// Weight of the geospatial term in the composite score.
    pub w_geo: f64,
    /// Weight of the textual term in the composite score.
    pub w_text: f64,
    /// Merge radius for point incidents (flood, sos, shelter, ...).
    pub point_radius_km: f64,
    /// Merge radius for area incidents (wildfire, storm).
    pub area_radius_km: f64,
    /// Capacity of the geocode LRU cache.
    pub geocode_cache_capacity: usize,
    /// Reports within this window of evaluation time keep an incident Active.
    pub fresh_window: ChronoDuration,
    /// No report within this window expires the incident. Terminal.
    pub expire_window: ChronoDuration,
    /// Time budget per external collaborator call.
    pub collaborator_timeout: Duration,
    /// Retries after the first failed collaborator call.
    pub collaborator_retries: u32,
    /// Initial backoff between collaborator retries (doubles each attempt).
    pub collaborator_backoff: Duration,
    /// Attempts to commit a merge before the candidate is requeued.
    pub merge_commit_attempts: u32,
    /// Optional region appended to geocode queries ("Bay Ridge" →
    /// "Bay Ridge, Brooklyn, NY").
    pub region_qualifier: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_extraction_confidence: 0.5,
            min_geocode_confidence: 0.3,
            merge_threshold: 0.55,
            w_geo: 0.6,
            w_text: 0.4,
            point_radius_km: 5.0,
            area_radius_km: 25.0,
            geocode_cache_capacity: 10_000,
            fresh_window: ChronoDuration::hours(24),
            expire_window: ChronoDuration::days(7),
            collaborator_timeout: Duration::from_secs(10),
            collaborator_retries: 2,
            collaborator_backoff: Duration::from_millis(250),
            merge_commit_attempts: 3,
            region_qualifier: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables where set.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(v) = env_f64("MIN_EXTRACTION_CONFIDENCE")? {
            config.min_extraction_confidence = v;
        }
        if let Some(v) = env_f64("MIN_GEOCODE_CONFIDENCE")? {
            config.min_geocode_confidence = v;
        }
        if let Some(v) = env_f64("MERGE_THRESHOLD")? {
            config.merge_threshold = v;
        }
        if let Some(v) = env_f64("POINT_RADIUS_KM")? {
            config.point_radius_km = v;
        }
        if let Some(v) = env_f64("AREA_RADIUS_KM")? {
            config.area_radius_km = v;
        }
        if let Some(v) = env_i64("FRESH_WINDOW_HOURS")? {
            config.fresh_window = ChronoDuration::hours(v);
        }
        if let Some(v) = env_i64("EXPIRE_WINDOW_HOURS")? {
            config.expire_window = ChronoDuration::hours(v);
        }
        if let Some(v) = env_i64("GEOCODE_CACHE_CAPACITY")? {
            config.geocode_cache_capacity = v.max(1) as usize;
        }
        if let Some(v) = env_i64("COLLABORATOR_TIMEOUT_SECS")? {
            config.collaborator_timeout = Duration::from_secs(v.max(1) as u64);
        }
        if let Some(v) = env_i64("COLLABORATOR_RETRIES")? {
            config.collaborator_retries = v.max(0) as u32;
        }
        config.region_qualifier = std::env::var("REGION_QUALIFIER")
            .ok()
            .filter(|s| !s.trim().is_empty());

        tracing::info!(
            merge_threshold = config.merge_threshold,
            point_radius_km = config.point_radius_km,
            area_radius_km = config.area_radius_km,
            fresh_window_hours = config.fresh_window.num_hours(),
            expire_window_hours = config.expire_window.num_hours(),
            "Engine config loaded"
        );
        Ok(config)
    }

    /// Merge radius in km for an incident of the given type.
    pub fn merge_radius_km(&self, incident_type: disasterscout_common::IncidentType) -> f64 {
        if incident_type.is_area_incident() {
            self.area_radius_km
        } else {
            self.point_radius_km
        }
    }
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(v) => Ok(Some(v.parse()?)),
        Err(_) => Ok(None),
    }
}

fn env_i64(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(v) => Ok(Some(v.parse()?)),
        Err(_) => Ok(None),
    }
}
