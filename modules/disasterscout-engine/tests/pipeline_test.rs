//! End-to-end pipeline tests with mock collaborators.
//!
//! No network, no API keys: search, classification, and geocoding are all
//! in-memory fakes, and incidents land in `MemoryIncidentStore`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use disasterscout_common::{
    BoundingBox, CanonicalIncident, GeoPoint, IncidentState, IncidentType, IngestError,
    IngestResult, Severity,
};
use disasterscout_engine::query::incidents_near;
use disasterscout_engine::store::TimeWindow;
use disasterscout_engine::traits::{GeocodedPlace, RawExtraction, RawSnippet};
use disasterscout_engine::{
    EngineConfig, ExtractionClient, ExtractionResult, Geocoder, IncidentStore, IngestPipeline,
    MemoryIncidentStore, SearchProvider,
};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

struct MockSearch {
    snippets: Vec<RawSnippet>,
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, _query: &str) -> Result<Vec<RawSnippet>> {
        Ok(self.snippets.clone())
    }
}

struct FailingSearch;

#[async_trait]
impl SearchProvider for FailingSearch {
    async fn search(&self, _query: &str) -> Result<Vec<RawSnippet>> {
        anyhow::bail!("provider 502")
    }
}

/// Classification keyed by exact snippet text; everything else is
/// not-disaster-related.
struct MockExtractor {
    by_text: HashMap<String, ExtractionResult>,
}

#[async_trait]
impl ExtractionClient for MockExtractor {
    async fn classify(&self, snippet_text: &str) -> Result<ExtractionResult> {
        Ok(self
            .by_text
            .get(snippet_text)
            .cloned()
            .unwrap_or(ExtractionResult::NotDisasterRelated))
    }
}

/// Geocoder matching on lowercase substring of the query.
struct MockGeocoder {
    places: Vec<(&'static str, GeocodedPlace)>,
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeocodedPlace>> {
        let query = query.to_lowercase();
        Ok(self
            .places
            .iter()
            .find(|(key, _)| query.contains(key))
            .map(|(_, place)| *place))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn snippet(text: &str, url: &str) -> RawSnippet {
    RawSnippet {
        text: text.into(),
        url: url.into(),
        published_at: Some(Utc::now()),
    }
}

fn flood_extraction(location: &str, confidence: f64) -> ExtractionResult {
    ExtractionResult::Valid(RawExtraction {
        incident_type: Some("flood".into()),
        raw_location_text: Some(location.into()),
        severity_hint: Some("high".into()),
        extraction_confidence: confidence,
    })
}

fn pipeline(
    snippets: Vec<RawSnippet>,
    extractions: Vec<(&str, ExtractionResult)>,
    places: Vec<(&'static str, GeocodedPlace)>,
    store: Arc<MemoryIncidentStore>,
) -> IngestPipeline {
    init_tracing();
    let by_text = extractions
        .into_iter()
        .map(|(text, result)| (text.to_string(), result))
        .collect();
    IngestPipeline::new(
        Arc::new(MockSearch { snippets }),
        Arc::new(MockExtractor { by_text }),
        Arc::new(MockGeocoder { places }),
        store,
        EngineConfig::default(),
    )
}

const BROOKLYN: GeocodedPlace = GeocodedPlace {
    lat: 40.678,
    lng: -73.944,
    confidence: 0.9,
};

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn beyond_radius_reports_become_two_incidents() {
    let store = Arc::new(MemoryIncidentStore::new());
    let p = pipeline(
        vec![
            snippet("Flood in Brooklyn, NY", "https://news.example/a"),
            snippet("Flooding near Bay Ridge, Brooklyn", "https://news.example/b"),
        ],
        vec![
            ("Flood in Brooklyn, NY", flood_extraction("Brooklyn, NY", 0.9)),
            (
                "Flooding near Bay Ridge, Brooklyn",
                flood_extraction("Bay Ridge, Brooklyn", 0.7),
            ),
        ],
        vec![
            // Bay Ridge is ~6.8km from Brooklyn center — outside the 5km
            // flood radius.
            (
                "bay ridge",
                GeocodedPlace {
                    lat: 40.636,
                    lng: -74.030,
                    confidence: 0.7,
                },
            ),
            ("brooklyn", BROOKLYN),
        ],
        store.clone(),
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.snippets_fetched, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.merged, 0);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn nearby_reports_merge_into_one_incident() {
    let store = Arc::new(MemoryIncidentStore::new());
    let p = pipeline(
        vec![
            snippet("Flood in Brooklyn, NY", "https://news.example/a"),
            snippet("Flooding near Bay Ridge, Brooklyn", "https://news.example/b"),
        ],
        vec![
            ("Flood in Brooklyn, NY", flood_extraction("Brooklyn, NY", 0.9)),
            (
                "Flooding near Bay Ridge, Brooklyn",
                flood_extraction("Crown Heights, Brooklyn", 0.7),
            ),
        ],
        vec![
            // ~1km from the first report.
            (
                "crown heights",
                GeocodedPlace {
                    lat: 40.670,
                    lng: -73.950,
                    confidence: 0.7,
                },
            ),
            ("brooklyn", BROOKLYN),
        ],
        store.clone(),
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.merged, 1);
    assert_eq!(store.len().await, 1);

    let results = incidents_near(
        store.as_ref(),
        &EngineConfig::default(),
        GeoPoint { lat: 40.678, lng: -73.944 },
        10.0,
        None,
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(results.len(), 1);
    let incident = &results[0];
    assert_eq!(incident.contributing_report_count, 2);
    assert_eq!(incident.severity, Severity::High);
    // Centroid sits between the two reports, pulled toward the
    // higher-confidence (0.9) geocode.
    let to_first = incident.centroid.distance_km(&GeoPoint { lat: 40.678, lng: -73.944 });
    let to_second = incident.centroid.distance_km(&GeoPoint { lat: 40.670, lng: -73.950 });
    assert!(to_first < to_second);
}

#[tokio::test]
async fn identical_snippet_counted_once() {
    let store = Arc::new(MemoryIncidentStore::new());
    let p = pipeline(
        vec![
            snippet("Flood in Brooklyn, NY", "https://news.example/a"),
            // Overlapping search queries can return the same snippet twice.
            snippet("Flood in Brooklyn, NY", "https://news.example/a"),
        ],
        vec![("Flood in Brooklyn, NY", flood_extraction("Brooklyn, NY", 0.9))],
        vec![("brooklyn", BROOKLYN)],
        store.clone(),
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.duplicates, 1);

    let incidents = store
        .list_active_near(GeoPoint { lat: 40.678, lng: -73.944 }, 5.0, None)
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].contributing_report_count, 1);
}

#[tokio::test]
async fn low_confidence_geocode_discards_candidate() {
    let store = Arc::new(MemoryIncidentStore::new());
    let p = pipeline(
        vec![snippet("Flood somewhere vague", "https://news.example/a")],
        vec![("Flood somewhere vague", flood_extraction("somewhere", 0.9))],
        vec![(
            "somewhere",
            GeocodedPlace {
                lat: 1.0,
                lng: 2.0,
                confidence: 0.1,
            },
        )],
        store.clone(),
    );

    let stats = p.run_batch("flood").await.unwrap();
    assert_eq!(stats.discarded_unresolvable, 1);
    assert_eq!(stats.created, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn off_topic_snippets_discarded_without_aborting_batch() {
    let store = Arc::new(MemoryIncidentStore::new());
    let p = pipeline(
        vec![
            snippet("Local team wins championship", "https://news.example/sports"),
            snippet("Flood in Brooklyn, NY", "https://news.example/a"),
        ],
        vec![("Flood in Brooklyn, NY", flood_extraction("Brooklyn, NY", 0.9))],
        vec![("brooklyn", BROOKLYN)],
        store.clone(),
    );

    let stats = p.run_batch("brooklyn news").await.unwrap();
    assert_eq!(stats.discarded_invalid, 1);
    assert_eq!(stats.created, 1);
}

#[tokio::test]
async fn search_failure_is_an_empty_cycle() {
    let store = Arc::new(MemoryIncidentStore::new());
    let p = IngestPipeline::new(
        Arc::new(FailingSearch),
        Arc::new(MockExtractor {
            by_text: HashMap::new(),
        }),
        Arc::new(MockGeocoder { places: vec![] }),
        store.clone(),
        EngineConfig {
            collaborator_retries: 0,
            collaborator_backoff: std::time::Duration::from_millis(1),
            ..EngineConfig::default()
        },
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.snippets_fetched, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn stale_incident_reactivated_by_new_report() {
    let store = Arc::new(MemoryIncidentStore::new());
    let now = Utc::now();

    // A canonical incident last reported 30 hours ago.
    let old_report = now - Duration::hours(30);
    let seeded = CanonicalIncident {
        id: uuid::Uuid::new_v4(),
        incident_type: IncidentType::Flood,
        centroid: GeoPoint { lat: 40.678, lng: -73.944 },
        centroid_confidence: 0.9,
        centroid_weight: 0.9,
        representative_summary: "Flood in Brooklyn, NY".into(),
        summary_confidence: 0.9,
        summary_reported_at: old_report,
        severity: Severity::High,
        contributing_report_count: 1,
        source_urls: vec!["https://news.example/a".into()],
        first_reported_at: old_report,
        last_reported_at: old_report,
        state: IncidentState::Active,
        last_evaluated_at: old_report,
        version: 0,
    };
    store.upsert(&seeded).await.unwrap();

    let p = pipeline(
        vec![snippet("Flood waters still rising in Brooklyn, NY", "https://news.example/b")],
        vec![(
            "Flood waters still rising in Brooklyn, NY",
            flood_extraction("Brooklyn, NY", 0.8),
        )],
        vec![("brooklyn", BROOKLYN)],
        store.clone(),
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    // The sweep saw it first (stale), then the merge reactivated it.
    assert_eq!(stats.merged, 1);
    let stored = store.get(seeded.id).await.unwrap().unwrap();
    assert_eq!(stored.state, IncidentState::Active);
    assert_eq!(stored.contributing_report_count, 2);
    assert!(stored.last_reported_at > old_report);
}

#[tokio::test]
async fn expired_incidents_swept_before_merge_targeting() {
    let store = Arc::new(MemoryIncidentStore::new());
    let now = Utc::now();

    // Ten days without a report: expired, never a merge target again.
    let ancient = now - Duration::days(10);
    let seeded = CanonicalIncident {
        id: uuid::Uuid::new_v4(),
        incident_type: IncidentType::Flood,
        centroid: GeoPoint { lat: 40.678, lng: -73.944 },
        centroid_confidence: 0.9,
        centroid_weight: 0.9,
        representative_summary: "Flood in Brooklyn, NY".into(),
        summary_confidence: 0.9,
        summary_reported_at: ancient,
        severity: Severity::High,
        contributing_report_count: 3,
        source_urls: vec![],
        first_reported_at: ancient,
        last_reported_at: ancient,
        state: IncidentState::Stale,
        last_evaluated_at: ancient,
        version: 0,
    };
    store.upsert(&seeded).await.unwrap();

    let p = pipeline(
        vec![snippet("Flood in Brooklyn, NY", "https://news.example/c")],
        vec![("Flood in Brooklyn, NY", flood_extraction("Brooklyn, NY", 0.9))],
        vec![("brooklyn", BROOKLYN)],
        store.clone(),
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.swept_expired, 1);
    // The identical location produced a NEW incident, not a merge into
    // the expired one.
    assert_eq!(stats.created, 1);
    assert_eq!(stats.merged, 0);
    assert_eq!(store.get(seeded.id).await.unwrap().unwrap().state, IncidentState::Expired);
}

// ---------------------------------------------------------------------------
// Requeue on merge-commit conflicts
// ---------------------------------------------------------------------------

/// Store wrapper that forces the first N upserts to conflict.
struct ConflictingStore {
    inner: Arc<MemoryIncidentStore>,
    conflicts_remaining: AtomicU32,
}

#[async_trait]
impl IncidentStore for ConflictingStore {
    async fn get(&self, id: Uuid) -> IngestResult<Option<CanonicalIncident>> {
        self.inner.get(id).await
    }

    async fn upsert(&self, incident: &CanonicalIncident) -> IngestResult<u64> {
        let remaining = self.conflicts_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::MergeConflict { id: incident.id });
        }
        self.inner.upsert(incident).await
    }

    async fn query(
        &self,
        bbox: BoundingBox,
        window: Option<TimeWindow>,
        states: &[IncidentState],
    ) -> IngestResult<Vec<CanonicalIncident>> {
        self.inner.query(bbox, window, states).await
    }

    async fn list_active_near(
        &self,
        point: GeoPoint,
        radius_km: f64,
        incident_type: Option<IncidentType>,
    ) -> IngestResult<Vec<CanonicalIncident>> {
        self.inner.list_active_near(point, radius_km, incident_type).await
    }

    async fn mark_expired(&self, ids: &[Uuid]) -> IngestResult<u32> {
        self.inner.mark_expired(ids).await
    }
}

#[tokio::test]
async fn conflict_exhausted_candidate_requeued_and_drained_next_batch() {
    init_tracing();
    let inner = Arc::new(MemoryIncidentStore::new());
    // Exactly enough conflicts to exhaust one candidate's commit attempts.
    let store = Arc::new(ConflictingStore {
        inner: inner.clone(),
        conflicts_remaining: AtomicU32::new(EngineConfig::default().merge_commit_attempts),
    });
    let p = IngestPipeline::new(
        Arc::new(MockSearch {
            snippets: vec![snippet("Flood in Brooklyn, NY", "https://news.example/a")],
        }),
        Arc::new(MockExtractor {
            by_text: [(
                "Flood in Brooklyn, NY".to_string(),
                flood_extraction("Brooklyn, NY", 0.9),
            )]
            .into_iter()
            .collect(),
        }),
        Arc::new(MockGeocoder {
            places: vec![("brooklyn", BROOKLYN)],
        }),
        store,
        EngineConfig::default(),
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.created, 0);
    assert_eq!(p.requeue_len().await, 1);
    assert!(inner.is_empty().await);

    // The next batch drains the carried candidate and commits it; the
    // identical snippet returned by search again is a batch duplicate.
    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.requeued_processed, 1);
    assert_eq!(stats.created, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(p.requeue_len().await, 0);
    assert_eq!(inner.len().await, 1);
}

// ---------------------------------------------------------------------------
// Collaborator failure accounting
// ---------------------------------------------------------------------------

struct ErrExtractor;

#[async_trait]
impl ExtractionClient for ErrExtractor {
    async fn classify(&self, _snippet_text: &str) -> Result<ExtractionResult> {
        anyhow::bail!("model returned 500")
    }
}

#[tokio::test]
async fn classification_provider_error_counted_as_failed() {
    init_tracing();
    let store = Arc::new(MemoryIncidentStore::new());
    let p = IngestPipeline::new(
        Arc::new(MockSearch {
            snippets: vec![snippet("Flood in Brooklyn, NY", "https://news.example/a")],
        }),
        Arc::new(ErrExtractor),
        Arc::new(MockGeocoder {
            places: vec![("brooklyn", BROOKLYN)],
        }),
        store.clone(),
        EngineConfig {
            collaborator_retries: 0,
            collaborator_backoff: std::time::Duration::from_millis(1),
            ..EngineConfig::default()
        },
    );

    let stats = p.run_batch("flood Brooklyn").await.unwrap();
    assert_eq!(stats.discarded_failed, 1);
    assert_eq!(stats.discarded_timeout, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn candidate_without_resolved_coordinates_rejected_by_merge_engine() {
    use disasterscout_engine::merge::BatchDedup;
    use disasterscout_engine::MergeEngine;

    let store: Arc<dyn IncidentStore> = Arc::new(MemoryIncidentStore::new());
    let engine = MergeEngine::new(store, EngineConfig::default());
    let candidate = disasterscout_common::CandidateIncident {
        source_text: "Flood in Brooklyn".into(),
        source_url: "https://news.example/a".into(),
        incident_type: IncidentType::Flood,
        raw_location_text: "Brooklyn, NY".into(),
        resolved_coordinates: None,
        severity_hint: None,
        reported_at: Utc::now(),
        extraction_confidence: 0.9,
    };
    let err = engine
        .process(&candidate, &mut BatchDedup::new(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        disasterscout_common::IngestError::InvalidCandidate { .. }
    ));
}
