//! Turns one raw classification result into a validated candidate incident.
//!
//! Pure function of input + config. Anything malformed, off-topic, or
//! below the confidence floor is rejected with `InvalidCandidate`; the
//! caller logs and moves on.

use chrono::{DateTime, Utc};

use disasterscout_common::{
    collapse_whitespace, CandidateIncident, IncidentType, IngestError, IngestResult, Severity,
};

use crate::config::EngineConfig;
use crate::traits::{ExtractionResult, RawSnippet};

/// Validate a classification result against one snippet and produce a
/// candidate, or reject it.
pub fn normalize(
    snippet: &RawSnippet,
    result: ExtractionResult,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> IngestResult<CandidateIncident> {
    let raw = match result {
        ExtractionResult::Valid(raw) => raw,
        ExtractionResult::NotDisasterRelated => {
            return Err(IngestError::InvalidCandidate {
                reason: "not disaster-related".into(),
            })
        }
        ExtractionResult::Malformed { reason } => {
            return Err(IngestError::InvalidCandidate { reason })
        }
    };

    if raw.extraction_confidence < config.min_extraction_confidence {
        return Err(IngestError::InvalidCandidate {
            reason: format!(
                "extraction confidence {:.2} below floor {:.2}",
                raw.extraction_confidence, config.min_extraction_confidence
            ),
        });
    }

    let location = collapse_whitespace(raw.raw_location_text.as_deref().unwrap_or(""));
    if location.is_empty() {
        return Err(IngestError::InvalidCandidate {
            reason: "empty location text".into(),
        });
    }

    let source_text = collapse_whitespace(&snippet.text);

    let incident_type = match raw.incident_type.as_deref() {
        Some(s) => IncidentType::from_str_loose(s).ok_or_else(|| IngestError::InvalidCandidate {
            reason: format!("unrecognized incident type: {s}"),
        })?,
        None => classify_fallback(&source_text).ok_or_else(|| IngestError::InvalidCandidate {
            reason: "no incident type and no keyword match".into(),
        })?,
    };

    let severity_hint = raw
        .severity_hint
        .as_deref()
        .and_then(Severity::from_str_loose);

    Ok(CandidateIncident {
        source_text,
        source_url: snippet.url.clone(),
        incident_type,
        raw_location_text: location,
        resolved_coordinates: None,
        severity_hint,
        reported_at: snippet.published_at.unwrap_or(now),
        extraction_confidence: raw.extraction_confidence,
    })
}

/// Keyword fallback for classifications that arrive without a type.
/// Only unambiguous phrases map; everything else stays unclassified.
pub fn classify_fallback(text: &str) -> Option<IncidentType> {
    let text = text.to_lowercase();
    if text.contains("shelter") || text.contains("evacuation center") {
        return Some(IncidentType::Shelter);
    }
    if text.contains("trapped") || text.contains("stranded") || text.contains("rescue") {
        return Some(IncidentType::Sos);
    }
    None
}
