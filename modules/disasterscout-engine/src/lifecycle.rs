//! Incident freshness lifecycle: Active → Stale → Expired.
//!
//! The transition function is pure — state is only ever a function of
//! evaluation time vs. `last_reported_at`. Nothing revives an incident
//! except a merge extending `last_reported_at`. Sweeps run lazily: at the
//! start of each ingestion batch and on external reads.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use disasterscout_common::{BoundingBox, IncidentState, IngestResult};

use crate::config::EngineConfig;
use crate::store::IncidentStore;

/// Pure transition function.
pub fn evaluate_state(
    now: DateTime<Utc>,
    last_reported_at: DateTime<Utc>,
    config: &EngineConfig,
) -> IncidentState {
    let age = now - last_reported_at;
    if age <= config.fresh_window {
        IncidentState::Active
    } else if age <= config.expire_window {
        IncidentState::Stale
    } else {
        IncidentState::Expired
    }
}

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub evaluated: u32,
    pub transitioned: u32,
    pub expired: u32,
}

/// Re-evaluate every non-expired incident and persist the transitions.
///
/// Version conflicts on individual records are skipped — a concurrent
/// merge just extended the incident, and the next sweep re-evaluates it.
pub async fn sweep(
    store: &dyn IncidentStore,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> IngestResult<SweepStats> {
    let rows = store
        .query(
            BoundingBox::WORLD,
            None,
            &[IncidentState::Active, IncidentState::Stale],
        )
        .await?;

    let mut stats = SweepStats {
        evaluated: rows.len() as u32,
        ..SweepStats::default()
    };
    let mut to_expire = Vec::new();

    for mut incident in rows {
        let next = evaluate_state(now, incident.last_reported_at, config);
        if next == incident.state {
            continue;
        }
        if next == IncidentState::Expired {
            to_expire.push(incident.id);
            stats.expired += 1;
            continue;
        }
        incident.state = next;
        incident.last_evaluated_at = now;
        match store.upsert(&incident).await {
            Ok(_) => stats.transitioned += 1,
            Err(e) if !e.is_fatal_to_batch() => {
                warn!(id = %incident.id, error = %e, "Skipped lifecycle transition, will retry next sweep");
            }
            Err(e) => return Err(e),
        }
    }

    if !to_expire.is_empty() {
        store.mark_expired(&to_expire).await?;
    }

    if stats.transitioned > 0 || stats.expired > 0 {
        info!(
            evaluated = stats.evaluated,
            transitioned = stats.transitioned,
            expired = stats.expired,
            "Lifecycle sweep complete"
        );
    }
    Ok(stats)
}
