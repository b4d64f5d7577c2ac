//! Deduplication & merge engine.
//!
//! Given a validated, geocoded candidate and the current set of Active and
//! Stale canonical incidents, decide merge / create / discard and commit
//! the result. Commits are optimistic: the canonical record carries the
//! version it was read at, the store rejects stale writes, and a rejected
//! write is recomputed against a refreshed record up to a bounded number
//! of attempts before the candidate is handed back for requeue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use disasterscout_common::{
    collapse_whitespace, CandidateIncident, CanonicalIncident, GeoPoint, IncidentState,
    IngestError, IngestResult, ResolvedCoordinates,
};

use crate::config::EngineConfig;
use crate::similarity;
use crate::store::IncidentStore;

/// Decision for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    MergedInto(Uuid),
    CreatedNew(Uuid),
    DiscardedAsDuplicate,
}

/// Batch-local memory of which normalized source texts have already been
/// folded into which canonical incident. Protects against overlapping
/// search queries returning the identical snippet twice in one batch.
#[derive(Debug, Default)]
pub struct BatchDedup {
    seen: HashMap<Uuid, HashSet<String>>,
}

impl BatchDedup {
    pub fn new() -> Self {
        Self::default()
    }

    fn merged_target(&self, normalized_text: &str) -> Option<Uuid> {
        self.seen
            .iter()
            .find(|(_, texts)| texts.contains(normalized_text))
            .map(|(id, _)| *id)
    }

    fn record(&mut self, id: Uuid, normalized_text: String) {
        self.seen.entry(id).or_default().insert(normalized_text);
    }
}

pub struct MergeEngine {
    store: Arc<dyn IncidentStore>,
    config: EngineConfig,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn IncidentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Decide and commit for one candidate.
    ///
    /// Errors: `InvalidCandidate` if the candidate has no coordinates
    /// (the pipeline geocodes before merging), `MergeConflict` once commit
    /// attempts are exhausted (caller requeues), store errors as-is.
    pub async fn process(
        &self,
        candidate: &CandidateIncident,
        batch: &mut BatchDedup,
        now: DateTime<Utc>,
    ) -> IngestResult<MergeOutcome> {
        let coords = candidate
            .resolved_coordinates
            .ok_or_else(|| IngestError::InvalidCandidate {
                reason: "candidate reached merge engine without coordinates".into(),
            })?;
        let normalized_text = collapse_whitespace(&candidate.source_text);

        // Exact-duplicate shortcut: an identical snippet already folded in
        // this batch is discarded before any scoring or store lookup.
        if let Some(id) = batch.merged_target(&normalized_text) {
            debug!(id = %id, "Identical snippet already merged this batch");
            return Ok(MergeOutcome::DiscardedAsDuplicate);
        }

        let radius_km = self.config.merge_radius_km(candidate.incident_type);

        let mut conflicted_id = None;
        for attempt in 0..self.config.merge_commit_attempts {
            let targets = self
                .store
                .list_active_near(coords.point, radius_km, Some(candidate.incident_type))
                .await?;

            let Some(best) = select_target(candidate, &targets, &self.config) else {
                let incident = CanonicalIncident::from_candidate(candidate, now).ok_or_else(
                    || IngestError::InvalidCandidate {
                        reason: "candidate lost coordinates before create".into(),
                    },
                )?;
                match self.store.upsert(&incident).await {
                    Ok(_) => {
                        batch.record(incident.id, normalized_text);
                        info!(
                            id = %incident.id,
                            incident_type = %incident.incident_type,
                            "Created new canonical incident"
                        );
                        return Ok(MergeOutcome::CreatedNew(incident.id));
                    }
                    Err(IngestError::MergeConflict { id }) => {
                        debug!(id = %id, attempt, "Create conflicted, refreshing snapshot");
                        conflicted_id = Some(id);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            let merged = merge_fields(&best, candidate, coords, now);
            match self.store.upsert(&merged).await {
                Ok(_) => {
                    batch.record(best.id, normalized_text);
                    info!(
                        id = %best.id,
                        reports = merged.contributing_report_count,
                        severity = %merged.severity,
                        "Merged candidate into canonical incident"
                    );
                    return Ok(MergeOutcome::MergedInto(best.id));
                }
                Err(IngestError::MergeConflict { id }) => {
                    debug!(id = %id, attempt, "Merge commit conflicted, refreshing snapshot");
                    conflicted_id = Some(id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(IngestError::MergeConflict {
            id: conflicted_id.unwrap_or(Uuid::nil()),
        })
    }
}

/// Pick the best eligible merge target: highest composite score, ties
/// broken by most recent `last_reported_at`, then smallest id.
fn select_target(
    candidate: &CandidateIncident,
    targets: &[CanonicalIncident],
    config: &EngineConfig,
) -> Option<CanonicalIncident> {
    let mut eligible: Vec<(f64, &CanonicalIncident)> = targets
        .iter()
        .filter(|t| t.state != IncidentState::Expired)
        .filter_map(|t| {
            let sim = similarity::assess(candidate, t, config);
            sim.eligible.then_some((sim.score, t))
        })
        .collect();

    eligible.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.last_reported_at.cmp(&a.last_reported_at))
            .then(a.id.cmp(&b.id))
    });

    eligible.first().map(|(_, t)| (*t).clone())
}

/// Deterministic field reconciliation. Pure; the store commit happens in
/// `MergeEngine::process`.
fn merge_fields(
    current: &CanonicalIncident,
    candidate: &CandidateIncident,
    coords: ResolvedCoordinates,
    now: DateTime<Utc>,
) -> CanonicalIncident {
    let mut merged = current.clone();

    // Confidence-weighted running average: higher-confidence geocodes pull
    // the centroid harder.
    let prior_weight = current.centroid_weight;
    let total_weight = prior_weight + coords.confidence;
    merged.centroid = GeoPoint {
        lat: (current.centroid.lat * prior_weight + coords.point.lat * coords.confidence)
            / total_weight,
        lng: (current.centroid.lng * prior_weight + coords.point.lng * coords.confidence)
            / total_weight,
    };
    merged.centroid_weight = total_weight;
    merged.centroid_confidence = current.centroid_confidence.max(coords.confidence);

    if let Some(hint) = candidate.severity_hint {
        merged.severity = merged.severity.max(hint);
    }

    merged.contributing_report_count = current.contributing_report_count + 1;
    merged.first_reported_at = current.first_reported_at.min(candidate.reported_at);
    merged.last_reported_at = current.last_reported_at.max(candidate.reported_at);

    // The summary follows whichever report dominates on confidence or recency.
    if candidate.extraction_confidence > current.summary_confidence
        || candidate.reported_at > current.summary_reported_at
    {
        merged.representative_summary = candidate.source_text.clone();
        merged.summary_confidence = candidate.extraction_confidence;
        merged.summary_reported_at = candidate.reported_at;
    }

    if !candidate.source_url.is_empty() && !merged.source_urls.contains(&candidate.source_url) {
        merged.source_urls.push(candidate.source_url.clone());
    }

    // A merge always reactivates.
    merged.state = IncidentState::Active;
    merged.last_evaluated_at = now;
    merged
}
