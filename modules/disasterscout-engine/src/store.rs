//! Incident store facade.
//!
//! The persistence collaborator sits behind `IncidentStore`; the engine
//! issues no queries beyond this contract. Upserts are optimistic: the
//! incoming record carries the version it was read at, and a mismatch is a
//! `MergeConflict` for the caller to retry against a refreshed snapshot.
//! `MemoryIncidentStore` is the process-local implementation used by tests
//! and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use disasterscout_common::{
    BoundingBox, CanonicalIncident, GeoPoint, IncidentState, IncidentType, IngestError,
    IngestResult,
};

/// Inclusive window over `last_reported_at` for store queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.since && t <= self.until
    }
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Fetch one incident by id.
    async fn get(&self, id: Uuid) -> IngestResult<Option<CanonicalIncident>>;

    /// Versioned upsert. The record's `version` must match the stored
    /// version (or the id must be new); the committed record gets
    /// `version + 1`. Returns the committed version.
    async fn upsert(&self, incident: &CanonicalIncident) -> IngestResult<u64>;

    /// Incidents whose centroid falls in `bbox`, optionally filtered by a
    /// `last_reported_at` window, restricted to the given states.
    async fn query(
        &self,
        bbox: BoundingBox,
        window: Option<TimeWindow>,
        states: &[IncidentState],
    ) -> IngestResult<Vec<CanonicalIncident>>;

    /// Non-expired incidents within `radius_km` of `point`, optionally
    /// restricted to one incident type. The merge-target candidate set.
    async fn list_active_near(
        &self,
        point: GeoPoint,
        radius_km: f64,
        incident_type: Option<IncidentType>,
    ) -> IngestResult<Vec<CanonicalIncident>>;

    /// Transition the given incidents to Expired. Idempotent.
    async fn mark_expired(&self, ids: &[Uuid]) -> IngestResult<u32>;
}

/// In-memory store. Snapshot reads, versioned writes.
#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<HashMap<Uuid, CanonicalIncident>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.incidents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.incidents.read().await.is_empty()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn get(&self, id: Uuid) -> IngestResult<Option<CanonicalIncident>> {
        Ok(self.incidents.read().await.get(&id).cloned())
    }

    async fn upsert(&self, incident: &CanonicalIncident) -> IngestResult<u64> {
        let mut incidents = self.incidents.write().await;
        if let Some(current) = incidents.get(&incident.id) {
            if current.version != incident.version {
                return Err(IngestError::MergeConflict { id: incident.id });
            }
        }
        let mut committed = incident.clone();
        committed.version += 1;
        let version = committed.version;
        incidents.insert(committed.id, committed);
        Ok(version)
    }

    async fn query(
        &self,
        bbox: BoundingBox,
        window: Option<TimeWindow>,
        states: &[IncidentState],
    ) -> IngestResult<Vec<CanonicalIncident>> {
        let incidents = self.incidents.read().await;
        Ok(incidents
            .values()
            .filter(|i| states.contains(&i.state))
            .filter(|i| bbox.contains(&i.centroid))
            .filter(|i| window.map(|w| w.contains(i.last_reported_at)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn list_active_near(
        &self,
        point: GeoPoint,
        radius_km: f64,
        incident_type: Option<IncidentType>,
    ) -> IngestResult<Vec<CanonicalIncident>> {
        let incidents = self.incidents.read().await;
        Ok(incidents
            .values()
            .filter(|i| i.state != IncidentState::Expired)
            .filter(|i| incident_type.map(|t| i.incident_type == t).unwrap_or(true))
            .filter(|i| i.centroid.distance_km(&point) <= radius_km)
            .cloned()
            .collect())
    }

    async fn mark_expired(&self, ids: &[Uuid]) -> IngestResult<u32> {
        let mut incidents = self.incidents.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for id in ids {
            if let Some(incident) = incidents.get_mut(id) {
                if incident.state != IncidentState::Expired {
                    incident.state = IncidentState::Expired;
                    incident.last_evaluated_at = now;
                    incident.version += 1;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}
