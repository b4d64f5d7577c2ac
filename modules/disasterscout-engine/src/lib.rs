//! Incident dedup/merge engine for disaster reports.
//!
//! Raw search snippets come in; classified, geocoded, deduplicated
//! canonical incidents come out. External collaborators (search, LLM
//! classification, geocoding, persistence) live behind traits so the whole
//! pipeline runs deterministically under test.

pub mod config;
pub mod geocode;
pub mod lifecycle;
pub mod merge;
pub mod normalizer;
pub mod pipeline;
pub mod query;
pub mod retry;
pub mod similarity;
pub mod store;
pub mod traits;

pub use config::EngineConfig;
pub use geocode::GeoResolver;
pub use merge::{MergeEngine, MergeOutcome};
pub use pipeline::{BatchStats, IngestPipeline};
pub use store::{IncidentStore, MemoryIncidentStore};
pub use traits::{ExtractionClient, ExtractionResult, Geocoder, SearchProvider};
