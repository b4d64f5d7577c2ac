//! Typed errors for the ingestion and merge pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while turning raw reports into canonical incidents.
///
/// Only `StoreUnavailable` is fatal to a batch. Everything else discards
/// (or requeues) the single candidate that caused it.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed or low-confidence extraction — candidate discarded.
    #[error("invalid candidate: {reason}")]
    InvalidCandidate { reason: String },

    /// Geocoding produced no usable match — candidate discarded.
    #[error("unresolvable location: {place}")]
    UnresolvableLocation { place: String },

    /// An external collaborator exceeded its time budget after retries.
    #[error("collaborator timeout during {operation}")]
    CollaboratorTimeout { operation: String },

    /// Concurrent write detected on commit. Retried against a refreshed
    /// snapshot; candidates that exhaust retries are requeued.
    #[error("merge conflict on incident {id}")]
    MergeConflict { id: Uuid },

    /// Persistence collaborator unreachable — the whole batch aborts and
    /// is retried from scratch next cycle.
    #[error("incident store unavailable: {source}")]
    StoreUnavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl IngestError {
    /// Whether this error aborts the current batch (vs. discarding one
    /// candidate).
    pub fn is_fatal_to_batch(&self) -> bool {
        matches!(self, IngestError::StoreUnavailable { .. })
    }
}

/// Result type alias for ingestion operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
