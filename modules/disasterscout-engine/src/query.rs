//! Read surface for the serving layer.
//!
//! Returns immutable snapshots of non-expired incidents near a point,
//! newest report first. Lifecycle is re-evaluated lazily on every read, so
//! callers never see an incident the windows say is dead — even between
//! sweeps.

use chrono::{DateTime, Utc};

use disasterscout_common::{CanonicalIncident, GeoPoint, IncidentState, IncidentType, IngestResult};

use crate::config::EngineConfig;
use crate::lifecycle::evaluate_state;
use crate::store::IncidentStore;

/// Current non-expired incidents within `radius_km` of `point`, optionally
/// filtered by type, sorted by `last_reported_at` descending.
pub async fn incidents_near(
    store: &dyn IncidentStore,
    config: &EngineConfig,
    point: GeoPoint,
    radius_km: f64,
    type_filter: Option<IncidentType>,
    now: DateTime<Utc>,
) -> IngestResult<Vec<CanonicalIncident>> {
    let rows = store.list_active_near(point, radius_km, type_filter).await?;

    let mut newly_expired = Vec::new();
    let mut snapshots = Vec::with_capacity(rows.len());
    for mut incident in rows {
        let state = evaluate_state(now, incident.last_reported_at, config);
        if state == IncidentState::Expired {
            newly_expired.push(incident.id);
            continue;
        }
        // Snapshot reflects the evaluated state; persistence of
        // Active→Stale transitions is the sweep's job.
        incident.state = state;
        snapshots.push(incident);
    }

    if !newly_expired.is_empty() {
        store.mark_expired(&newly_expired).await?;
    }

    snapshots.sort_by(|a, b| b.last_reported_at.cmp(&a.last_reported_at));
    Ok(snapshots)
}
