//! Confidence scoring and quality gating
//!
//! The scorer combines LLM and heuristic signals into a single confidence in
//! [0, 1]; the gate maps that confidence to an outcome band given the
//! effective thresholds. Both are pure functions so the persistence rules
//! stay testable in isolation.

use crate::traits::EntityVerification;
use crate::types::{
    CandidateEntity, JobExtractionConfig, PipelineMode, ProjectExtractionConfig, ThresholdSource,
    ThresholdSources,
};

/// The effective confidence bands for a job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceThresholds {
    /// Below this: rejected
    pub min: f64,
    /// At or above this (and below auto): flagged for review
    pub review: f64,
    /// At or above this: auto-accepted
    pub auto: f64,
}

/// Outcome band for a scored candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityBand {
    /// Confidence below the minimum threshold; not persisted
    Reject,
    /// Persisted with the review label
    Review,
    /// Persisted as accepted with no review label
    Auto,
}

/// Map a confidence to its outcome band.
///
/// The band edges are inclusive on the lower bound: `confidence == min`
/// lands in review, `confidence == auto` lands in auto.
pub fn apply_quality_thresholds(confidence: f64, thresholds: &ConfidenceThresholds) -> QualityBand {
    if confidence < thresholds.min {
        QualityBand::Reject
    } else if confidence >= thresholds.auto {
        QualityBand::Auto
    } else {
        QualityBand::Review
    }
}

/// Resolve each threshold from job config, then project config, then the
/// server defaults, recording where each value came from.
pub fn resolve_thresholds(
    job_config: Option<&JobExtractionConfig>,
    project_config: Option<&ProjectExtractionConfig>,
    server_defaults: ConfidenceThresholds,
) -> (ConfidenceThresholds, ThresholdSources) {
    fn pick(
        job: Option<f64>,
        project: Option<f64>,
        server: f64,
    ) -> (f64, ThresholdSource) {
        if let Some(value) = job {
            (value, ThresholdSource::JobConfig)
        } else if let Some(value) = project {
            (value, ThresholdSource::ProjectConfig)
        } else {
            (server, ThresholdSource::ServerDefault)
        }
    }

    let (min, min_source) = pick(
        job_config.and_then(|c| c.min_threshold),
        project_config.and_then(|c| c.min_threshold),
        server_defaults.min,
    );
    let (review, review_source) = pick(
        job_config.and_then(|c| c.review_threshold),
        project_config.and_then(|c| c.review_threshold),
        server_defaults.review,
    );
    let (auto, auto_source) = pick(
        job_config.and_then(|c| c.auto_threshold),
        project_config.and_then(|c| c.auto_threshold),
        server_defaults.auto,
    );

    (
        ConfidenceThresholds { min, review, auto },
        ThresholdSources {
            min: min_source,
            review: review_source,
            auto: auto_source,
        },
    )
}

/// Score a candidate entity.
///
/// Pre-verified pipelines ship a confidence that already reflects
/// verification (weighted 40% name, 30% description, 30% properties
/// upstream); it is used verbatim. Single-pass pipelines get a heuristic
/// completeness score with the same 40/30/30 weighting, blended 70/30 with
/// the LLM's own confidence when one was reported, then adjusted by the
/// verifier outcome.
pub fn score_candidate(
    candidate: &CandidateEntity,
    mode: PipelineMode,
    verification: Option<&EntityVerification>,
) -> f64 {
    if mode == PipelineMode::PreVerified {
        if let Some(confidence) = candidate.confidence {
            return confidence.clamp(0.0, 1.0);
        }
    }

    let heuristic = heuristic_score(candidate);
    let base = match candidate.confidence {
        Some(llm) => llm.clamp(0.0, 1.0) * 0.7 + heuristic * 0.3,
        None => heuristic,
    };
    let adjusted = match verification {
        Some(v) => apply_verification_adjustment(base, v),
        None => base,
    };
    adjusted.clamp(0.0, 1.0)
}

/// Completeness heuristic over name, description, and properties
fn heuristic_score(candidate: &CandidateEntity) -> f64 {
    let name_factor = if candidate.name.trim().is_empty() {
        0.0
    } else if candidate.name.trim().len() < 2 {
        0.5
    } else {
        1.0
    };
    let description_factor = (candidate.description.trim().len() as f64 / 160.0).min(1.0);
    let properties_factor = (candidate.properties.len() as f64 / 4.0).min(1.0);

    name_factor * 0.4 + description_factor * 0.3 + properties_factor * 0.3
}

/// Adjust a confidence by a verifier outcome:
/// verified adds up to 0.10, a verification confidence below 0.30 subtracts
/// up to 0.30, anything else leaves the value unchanged.
pub fn apply_verification_adjustment(confidence: f64, verification: &EntityVerification) -> f64 {
    let vc = verification.overall_confidence;
    if verification.entity_verified {
        (confidence + (vc * 0.10).min(0.10)).clamp(0.0, 1.0)
    } else if vc < 0.30 {
        (confidence - ((0.30 - vc) * 0.50).min(0.30)).clamp(0.0, 1.0)
    } else {
        confidence
    }
}
