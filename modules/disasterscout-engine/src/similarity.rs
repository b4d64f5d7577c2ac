//! Composite similarity between a candidate and a canonical incident.
//!
//! Two incidents are the same real-world event when they are the same kind
//! of thing, close together, and described alike. Type mismatch is a hard
//! disqualifier; distance and text blend into a weighted score.

use std::collections::HashSet;

use disasterscout_common::{CandidateIncident, CanonicalIncident};

use crate::config::EngineConfig;

/// Score plus eligibility verdict for one candidate/canonical pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub score: f64,
    pub eligible: bool,
}

impl Similarity {
    const INELIGIBLE: Similarity = Similarity {
        score: 0.0,
        eligible: false,
    };
}

/// Assess one pair. Candidates without resolved coordinates never match.
pub fn assess(
    candidate: &CandidateIncident,
    canonical: &CanonicalIncident,
    config: &EngineConfig,
) -> Similarity {
    if candidate.incident_type != canonical.incident_type {
        return Similarity::INELIGIBLE;
    }
    let Some(coords) = candidate.resolved_coordinates else {
        return Similarity::INELIGIBLE;
    };

    let radius_km = config.merge_radius_km(candidate.incident_type);
    let distance_km = coords.point.distance_km(&canonical.centroid);
    let geo = geo_term(distance_km, radius_km);
    if geo <= 0.0 {
        return Similarity::INELIGIBLE;
    }

    let text = text_similarity(&candidate.source_text, &canonical.representative_summary);
    let score = config.w_geo * geo + config.w_text * text;

    Similarity {
        score,
        eligible: score >= config.merge_threshold,
    }
}

/// Linear distance decay: 1 at zero distance, 0 at the merge radius.
pub fn geo_term(distance_km: f64, radius_km: f64) -> f64 {
    if radius_km <= 0.0 {
        return 0.0;
    }
    1.0 - (distance_km / radius_km).min(1.0)
}

/// Lexical overlap coefficient over lowercased alphanumeric tokens:
/// |A ∩ B| / min(|A|, |B|). Symmetric, deterministic, bounded [0, 1].
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    intersection as f64 / ta.len().min(tb.len()) as f64
}

fn tokens(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
