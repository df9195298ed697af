//! Optional post-hoc entity verification
//!
//! Single-pass pipelines can run extracted entities through an external
//! verifier whose verdicts adjust confidence downstream. Pre-verified
//! pipelines embed verification into the LLM step and skip this stage.
//! Verifier failure is non-fatal; the job proceeds without adjustments.

use graphmine_core::traits::{
    EntityVerification, VerificationEntity, VerificationRequest, VerifierService,
};
use graphmine_core::types::{normalize_entity_name, CandidateEntity, JobId, PipelineMode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs the verifier and keys results by normalized entity name
pub struct VerificationStage {
    verifier: Option<Arc<dyn VerifierService>>,
    enabled: bool,
}

impl VerificationStage {
    pub fn new(verifier: Option<Arc<dyn VerifierService>>, enabled: bool) -> Self {
        Self { verifier, enabled }
    }

    /// Whether this stage will run for the given pipeline mode
    pub fn applies(&self, mode: PipelineMode) -> bool {
        self.enabled && self.verifier.is_some() && mode == PipelineMode::SinglePass
    }

    /// Verify the batch; returns a normalized-name-keyed verdict map.
    /// Empty on stage-not-applicable or verifier failure.
    pub async fn run(
        &self,
        mode: PipelineMode,
        source_text: &str,
        entities: &[CandidateEntity],
        job_id: &JobId,
    ) -> HashMap<String, EntityVerification> {
        if !self.applies(mode) || entities.is_empty() {
            return HashMap::new();
        }
        let verifier = match &self.verifier {
            Some(verifier) => verifier,
            None => return HashMap::new(),
        };

        let request = VerificationRequest {
            source_text: source_text.to_string(),
            entities: entities
                .iter()
                .map(|entity| VerificationEntity {
                    id: entity.name.clone(),
                    name: entity.name.clone(),
                    entity_type: entity.type_name.clone(),
                    properties: entity.properties.clone(),
                })
                .collect(),
            job_id: job_id.clone(),
        };

        match verifier.verify_batch(request).await {
            Ok(response) => {
                debug!(
                    results = response.results.len(),
                    processing_time_ms = response.processing_time_ms,
                    "Verification completed"
                );
                response
                    .results
                    .into_iter()
                    .map(|result| (normalize_entity_name(&result.entity_name), result))
                    .collect()
            }
            Err(e) => {
                warn!("Verification failed, proceeding without adjustments: {}", e);
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphmine_core::errors::ServiceError;
    use graphmine_core::traits::VerificationResponse;
    use serde_json::Map;

    struct EchoVerifier;

    #[async_trait]
    impl VerifierService for EchoVerifier {
        async fn verify_batch(
            &self,
            request: VerificationRequest,
        ) -> Result<VerificationResponse, ServiceError> {
            Ok(VerificationResponse {
                results: request
                    .entities
                    .iter()
                    .map(|entity| EntityVerification {
                        entity_name: entity.name.clone(),
                        entity_verified: true,
                        overall_confidence: 0.9,
                        entity_verification_tier: 1,
                    })
                    .collect(),
                summary: None,
                processing_time_ms: 5,
            })
        }
    }

    struct FailingVerifier;

    #[async_trait]
    impl VerifierService for FailingVerifier {
        async fn verify_batch(
            &self,
            _request: VerificationRequest,
        ) -> Result<VerificationResponse, ServiceError> {
            Err(ServiceError::Unavailable("offline".to_string()))
        }
    }

    fn candidate(name: &str) -> CandidateEntity {
        CandidateEntity {
            type_name: "Person".to_string(),
            name: name.to_string(),
            description: String::new(),
            properties: Map::new(),
            confidence: Some(0.8),
            verification_status: None,
        }
    }

    #[tokio::test]
    async fn test_results_are_keyed_by_normalized_name() {
        let stage = VerificationStage::new(Some(Arc::new(EchoVerifier)), true);
        let results = stage
            .run(
                PipelineMode::SinglePass,
                "text",
                &[candidate("  Ada Lovelace ")],
                &JobId::new("job-1"),
            )
            .await;
        assert!(results.contains_key("ada lovelace"));
    }

    #[tokio::test]
    async fn test_pre_verified_mode_skips_the_stage() {
        let stage = VerificationStage::new(Some(Arc::new(EchoVerifier)), true);
        assert!(!stage.applies(PipelineMode::PreVerified));
        let results = stage
            .run(
                PipelineMode::PreVerified,
                "text",
                &[candidate("Ada")],
                &JobId::new("job-1"),
            )
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_verifier_failure_is_non_fatal() {
        let stage = VerificationStage::new(Some(Arc::new(FailingVerifier)), true);
        let results = stage
            .run(
                PipelineMode::SinglePass,
                "text",
                &[candidate("Ada")],
                &JobId::new("job-1"),
            )
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_stage_never_runs() {
        let stage = VerificationStage::new(Some(Arc::new(EchoVerifier)), false);
        assert!(!stage.applies(PipelineMode::SinglePass));
    }
}
