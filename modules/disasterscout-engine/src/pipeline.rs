//! Batch ingestion orchestrator.
//!
//! One batch per search cycle: fetch snippets, classify, normalize,
//! geocode, merge. A bad snippet never aborts the rest of the batch; only
//! an unreachable store does. Candidates that lose their merge-commit race
//! past the retry bound are requeued and drained at the start of the next
//! batch.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use disasterscout_common::{CandidateIncident, IngestError, IngestResult};

use crate::config::EngineConfig;
use crate::geocode::GeoResolver;
use crate::lifecycle;
use crate::merge::{BatchDedup, MergeEngine, MergeOutcome};
use crate::normalizer;
use crate::retry::{call_with_budget, CallOutcome};
use crate::store::IncidentStore;
use crate::traits::{ExtractionClient, RawSnippet, SearchProvider};

/// Counters for one ingestion batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub snippets_fetched: u32,
    pub requeued_processed: u32,
    pub discarded_invalid: u32,
    pub discarded_unresolvable: u32,
    pub discarded_timeout: u32,
    pub discarded_failed: u32,
    pub duplicates: u32,
    pub merged: u32,
    pub created: u32,
    pub requeued: u32,
    pub swept_expired: u32,
}

pub struct IngestPipeline {
    search: Arc<dyn SearchProvider>,
    extractor: Arc<dyn ExtractionClient>,
    resolver: GeoResolver,
    merge: MergeEngine,
    store: Arc<dyn IncidentStore>,
    config: EngineConfig,
    /// Candidates whose merge commit exhausted its retries, carried into
    /// the next batch instead of dropped.
    requeue: Mutex<Vec<CandidateIncident>>,
}

impl IngestPipeline {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        extractor: Arc<dyn ExtractionClient>,
        geocoder: Arc<dyn crate::traits::Geocoder>,
        store: Arc<dyn IncidentStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            search,
            extractor,
            resolver: GeoResolver::new(geocoder, &config),
            merge: MergeEngine::new(store.clone(), config.clone()),
            store,
            config,
            requeue: Mutex::new(Vec::new()),
        }
    }

    /// Run one ingestion batch for a search query.
    ///
    /// Returns `Err` only when the store is unavailable — the batch is
    /// then retried from scratch next cycle; merges already committed
    /// stay committed.
    pub async fn run_batch(&self, query: &str) -> IngestResult<BatchStats> {
        let now = Utc::now();
        let mut stats = BatchStats::default();
        let mut batch = BatchDedup::new();

        // Lifecycle first: expired incidents must not become merge targets.
        let sweep = lifecycle::sweep(self.store.as_ref(), &self.config, now).await?;
        stats.swept_expired = sweep.expired;

        // Drain candidates requeued by the previous batch.
        let carried: Vec<CandidateIncident> = self.requeue.lock().await.drain(..).collect();
        for candidate in carried {
            stats.requeued_processed += 1;
            self.merge_candidate(candidate, &mut batch, &mut stats).await?;
        }

        // Fetch this cycle's snippets. Provider trouble means an empty
        // cycle, never a dead process.
        let snippets = match call_with_budget(
            "search",
            self.config.collaborator_timeout,
            self.config.collaborator_retries,
            self.config.collaborator_backoff,
            || self.search.search(query),
        )
        .await
        {
            CallOutcome::Ok(snippets) => snippets,
            CallOutcome::TimedOut => {
                warn!(query, "Search provider timed out, zero results this cycle");
                Vec::new()
            }
            CallOutcome::Failed(e) => {
                warn!(query, error = %e, "Search provider failed, zero results this cycle");
                Vec::new()
            }
        };
        stats.snippets_fetched = snippets.len() as u32;

        for snippet in &snippets {
            let Some(candidate) = self.prepare_candidate(snippet, &mut stats).await else {
                continue;
            };
            self.merge_candidate(candidate, &mut batch, &mut stats).await?;
        }

        info!(
            query,
            fetched = stats.snippets_fetched,
            merged = stats.merged,
            created = stats.created,
            duplicates = stats.duplicates,
            invalid = stats.discarded_invalid,
            unresolvable = stats.discarded_unresolvable,
            timeouts = stats.discarded_timeout,
            failed = stats.discarded_failed,
            requeued = stats.requeued,
            "Ingestion batch complete"
        );
        Ok(stats)
    }

    /// Number of candidates waiting for the next batch.
    pub async fn requeue_len(&self) -> usize {
        self.requeue.lock().await.len()
    }

    /// Classify, normalize, and geocode one snippet. `None` means the
    /// snippet was discarded (and counted).
    async fn prepare_candidate(
        &self,
        snippet: &RawSnippet,
        stats: &mut BatchStats,
    ) -> Option<CandidateIncident> {
        let classification = match call_with_budget(
            "classify",
            self.config.collaborator_timeout,
            self.config.collaborator_retries,
            self.config.collaborator_backoff,
            || self.extractor.classify(&snippet.text),
        )
        .await
        {
            CallOutcome::Ok(result) => result,
            CallOutcome::TimedOut => {
                warn!(url = %snippet.url, "Classification timed out, snippet discarded");
                stats.discarded_timeout += 1;
                return None;
            }
            CallOutcome::Failed(e) => {
                warn!(url = %snippet.url, error = %e, "Classification failed, snippet discarded");
                stats.discarded_failed += 1;
                return None;
            }
        };

        let mut candidate =
            match normalizer::normalize(snippet, classification, &self.config, Utc::now()) {
                Ok(candidate) => candidate,
                Err(e) => {
                    stats.discarded_invalid += 1;
                    warn!(url = %snippet.url, error = %e, "Snippet discarded by normalizer");
                    return None;
                }
            };

        match self.resolver.resolve(&candidate.raw_location_text).await {
            Ok(coords) => candidate.resolved_coordinates = Some(coords),
            Err(IngestError::CollaboratorTimeout { .. }) => {
                warn!(place = %candidate.raw_location_text, "Geocoding timed out, candidate discarded");
                stats.discarded_timeout += 1;
                return None;
            }
            Err(e) => {
                warn!(place = %candidate.raw_location_text, error = %e, "Candidate discarded as unresolvable");
                stats.discarded_unresolvable += 1;
                return None;
            }
        }

        Some(candidate)
    }

    /// Run the merge decision, routing conflicts to the requeue buffer.
    /// Only store unavailability propagates.
    async fn merge_candidate(
        &self,
        candidate: CandidateIncident,
        batch: &mut BatchDedup,
        stats: &mut BatchStats,
    ) -> IngestResult<()> {
        match self.merge.process(&candidate, batch, Utc::now()).await {
            Ok(MergeOutcome::MergedInto(_)) => stats.merged += 1,
            Ok(MergeOutcome::CreatedNew(_)) => stats.created += 1,
            Ok(MergeOutcome::DiscardedAsDuplicate) => stats.duplicates += 1,
            Err(IngestError::MergeConflict { id }) => {
                warn!(id = %id, "Merge retries exhausted, candidate requeued for next batch");
                stats.requeued += 1;
                self.requeue.lock().await.push(candidate);
            }
            Err(e) if e.is_fatal_to_batch() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Candidate discarded during merge");
                stats.discarded_invalid += 1;
            }
        }
        Ok(())
    }
}
