//! Geo resolver: place name → coordinates, with a bounded cache.
//!
//! Wraps the external geocoding collaborator. Queries are normalized
//! before lookup so "Bay Ridge,  Brooklyn" and "bay ridge, brooklyn" share
//! a cache entry. Only successful resolutions are cached — a transient
//! provider failure must not poison a place name for the process lifetime.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tracing::{debug, warn};

use disasterscout_common::{GeoPoint, IngestError, IngestResult, ResolvedCoordinates};

use crate::config::EngineConfig;
use crate::retry::{call_with_budget, CallOutcome};
use crate::traits::Geocoder;

pub struct GeoResolver {
    geocoder: Arc<dyn Geocoder>,
    cache: Mutex<LruCache<String, ResolvedCoordinates>>,
    min_confidence: f64,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    region_qualifier: Option<String>,
}

impl GeoResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, config: &EngineConfig) -> Self {
        let capacity = NonZeroUsize::new(config.geocode_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            geocoder,
            cache: Mutex::new(LruCache::new(capacity)),
            min_confidence: config.min_geocode_confidence,
            timeout: config.collaborator_timeout,
            retries: config.collaborator_retries,
            backoff: config.collaborator_backoff,
            region_qualifier: config.region_qualifier.clone(),
        }
    }

    /// Resolve a raw place name to coordinates, or fail the candidate.
    pub async fn resolve(&self, raw_location_text: &str) -> IngestResult<ResolvedCoordinates> {
        let key = normalize_place_key(raw_location_text);
        if key.is_empty() {
            return Err(IngestError::UnresolvableLocation {
                place: raw_location_text.to_string(),
            });
        }

        if let Some(hit) = self.cache.lock().expect("geocode cache poisoned").get(&key) {
            debug!(place = %key, "Geocode cache hit");
            return Ok(*hit);
        }

        let query = match &self.region_qualifier {
            Some(region) => format!("{key}, {region}"),
            None => key.clone(),
        };

        let outcome = call_with_budget(
            "geocode",
            self.timeout,
            self.retries,
            self.backoff,
            || self.geocoder.geocode(&query),
        )
        .await;

        let place = match outcome {
            CallOutcome::Ok(Some(place)) => place,
            CallOutcome::Ok(None) => {
                return Err(IngestError::UnresolvableLocation {
                    place: raw_location_text.to_string(),
                })
            }
            CallOutcome::TimedOut => {
                return Err(IngestError::CollaboratorTimeout {
                    operation: "geocode".into(),
                })
            }
            CallOutcome::Failed(e) => {
                warn!(place = %key, error = %e, "Geocoder failed after retries");
                return Err(IngestError::UnresolvableLocation {
                    place: raw_location_text.to_string(),
                });
            }
        };

        if place.confidence < self.min_confidence {
            debug!(
                place = %key,
                confidence = place.confidence,
                floor = self.min_confidence,
                "Geocode match below confidence floor"
            );
            return Err(IngestError::UnresolvableLocation {
                place: raw_location_text.to_string(),
            });
        }

        let resolved = ResolvedCoordinates {
            point: GeoPoint {
                lat: place.lat,
                lng: place.lng,
            },
            confidence: place.confidence,
        };
        self.cache
            .lock()
            .expect("geocode cache poisoned")
            .put(key, resolved);
        Ok(resolved)
    }
}

/// Cache key normalization: trim, collapse whitespace, case-fold.
pub fn normalize_place_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
