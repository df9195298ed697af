//! LLM orchestration: prompt assembly, batching, and structured results
//!
//! The orchestrator owns the extraction prompt (the base prompt alone is
//! insufficient): it folds in the effective schemas, the allowed-type
//! constraint, the project's tags, and the existing-entity context, then
//! invokes the provider once per character-bounded batch. Partial batch
//! failures yield a partial result; only a fully failed job is fatal.

use graphmine_core::errors::LlmError;
use graphmine_core::schema::EffectiveSchema;
use graphmine_core::traits::{ExtractionOptions, LlmProvider, LogStatus, StepLog, StructuredLogger};
use graphmine_core::types::{
    CandidateEntity, CandidateRelationship, ContextEntity, ExtractionMethod, JobId, TokenUsage,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Status of one provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
}

/// Record of one provider call, kept for the raw response envelope
#[derive(Debug, Clone, Serialize)]
pub struct LlmCallRecord {
    pub batch_index: usize,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Per-call envelope written into the job's debug info
#[derive(Debug, Clone, Serialize)]
pub struct RawResponseEnvelope {
    pub provider: String,
    pub method: ExtractionMethod,
    pub batch_count: usize,
    pub llm_calls: Vec<LlmCallRecord>,
}

/// Aggregated extraction result across all batches
pub struct ExtractionResult {
    pub entities: Vec<CandidateEntity>,
    pub relationships: Vec<CandidateRelationship>,
    pub discovered_types: Vec<String>,
    pub usage: Option<TokenUsage>,
    pub raw_response: RawResponseEnvelope,
    /// Batches that failed while others succeeded
    pub failed_batches: usize,
}

/// Inputs to prompt assembly
pub struct PromptInputs<'a> {
    pub base_prompt: &'a str,
    pub schema: &'a EffectiveSchema,
    pub allowed_types: &'a [String],
    pub available_tags: &'a [String],
    pub existing_entities: &'a [ContextEntity],
}

/// Builds the extraction prompt and drives the provider
pub struct LlmOrchestrator {
    provider: Arc<dyn LlmProvider>,
    structured_logger: Arc<dyn StructuredLogger>,
}

impl LlmOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        structured_logger: Arc<dyn StructuredLogger>,
    ) -> Self {
        Self {
            provider,
            structured_logger,
        }
    }

    /// Provider name recorded in debug info
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Assemble the full extraction prompt
    pub fn build_extraction_prompt(inputs: &PromptInputs<'_>) -> String {
        let mut sections = vec![inputs.base_prompt.to_string()];

        let object_schemas = json!(inputs.schema.object_schemas);
        sections.push(format!(
            "## Object schemas\nExtract only entities conforming to these types:\n{}",
            object_schemas
        ));

        if !inputs.schema.relationship_schemas.is_empty() {
            sections.push(format!(
                "## Relationship schemas\nExtract relationships conforming to these types:\n{}",
                json!(inputs.schema.relationship_schemas)
            ));
        }

        sections.push(format!(
            "## Allowed types\nOnly emit entities of these types: {}. If the text clearly \
             contains an important entity of another type, list that type under \
             `discovered_types` instead of emitting the entity.",
            inputs.allowed_types.join(", ")
        ));

        if !inputs.available_tags.is_empty() {
            sections.push(format!(
                "## Available tags\nPrefer reusing these existing tags where applicable: {}",
                inputs.available_tags.join(", ")
            ));
        }

        if !inputs.existing_entities.is_empty() {
            sections.push(format!(
                "## Existing entities\nThese entities already exist in the graph. Do not \
                 re-extract them unless the text adds new information; refer to them by name \
                 in relationships:\n{}",
                json!(inputs.existing_entities)
            ));
        }

        sections.push(
            "## Instructions\n\
             - Extract only information stated in the document; do not infer or hallucinate.\n\
             - Assign each candidate a confidence between 0.0 and 1.0.\n\
             - Reference relationship endpoints by entity name (or an existing entity id)."
                .to_string(),
        );

        sections.join("\n\n")
    }

    /// Run extraction over the document, one provider call per batch.
    ///
    /// Fails only when every call failed; the error carries the first
    /// call's message and the failed-call count.
    pub async fn extract(
        &self,
        document: &str,
        prompt: &str,
        options: ExtractionOptions,
    ) -> Result<ExtractionResult, LlmError> {
        let job_id = options
            .context
            .job_id
            .clone()
            .unwrap_or_else(|| JobId::new("unknown"));
        let method = options.extraction_method;
        let batches = split_batches(document, options.batch_size_chars);
        let batch_count = batches.len();
        let mut calls = Vec::with_capacity(batch_count);
        let mut entities = Vec::new();
        let mut relationships = Vec::new();
        let mut discovered_types = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let mut first_error: Option<String> = None;

        for (batch_index, batch) in batches.iter().enumerate() {
            let started = Instant::now();
            let outcome = self.provider.extract_entities(batch, prompt, &options).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) => {
                    let call_usage = response.usage;
                    if let Some(u) = &call_usage {
                        usage.get_or_insert_with(TokenUsage::default).accumulate(u);
                    }
                    entities.extend(response.entities);
                    relationships.extend(response.relationships);
                    for discovered in response.discovered_types {
                        if !discovered_types.contains(&discovered) {
                            discovered_types.push(discovered);
                        }
                    }
                    calls.push(LlmCallRecord {
                        batch_index,
                        status: CallStatus::Success,
                        error: None,
                        duration_ms,
                        usage: call_usage,
                    });
                    self.log_call(&job_id, batch_index, duration_ms, &calls[calls.len() - 1])
                        .await;
                }
                Err(e) => {
                    warn!(batch_index, "LLM call failed: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                    calls.push(LlmCallRecord {
                        batch_index,
                        status: CallStatus::Error,
                        error: Some(e.to_string()),
                        duration_ms,
                        usage: None,
                    });
                    self.log_call(&job_id, batch_index, duration_ms, &calls[calls.len() - 1])
                        .await;
                }
            }
        }

        let failed_batches = calls
            .iter()
            .filter(|c| c.status == CallStatus::Error)
            .count();
        if failed_batches == batch_count {
            return Err(LlmError::AllCallsFailed {
                message: first_error.unwrap_or_else(|| "no calls were made".to_string()),
                failed_calls: failed_batches,
            });
        }

        info!(
            batches = batch_count,
            failed_batches,
            entities = entities.len(),
            relationships = relationships.len(),
            "LLM extraction finished"
        );

        Ok(ExtractionResult {
            entities,
            relationships,
            discovered_types,
            usage,
            raw_response: RawResponseEnvelope {
                provider: self.provider.name().to_string(),
                method: method.unwrap_or_default(),
                batch_count,
                llm_calls: calls,
            },
            failed_batches,
        })
    }

    async fn log_call(
        &self,
        job_id: &JobId,
        batch_index: usize,
        duration_ms: u64,
        record: &LlmCallRecord,
    ) {
        let entry = StepLog {
            job_id: job_id.clone(),
            step_index: batch_index,
            operation_type: "llm".to_string(),
            operation_name: "extract_entities".to_string(),
            status: match record.status {
                CallStatus::Success => LogStatus::Completed,
                CallStatus::Error => LogStatus::Failed,
            },
            input_data: Some(json!({"batch_index": batch_index})),
            output_data: None,
            duration_ms: Some(duration_ms),
            error_message: record.error.clone(),
            error_stack: None,
            error_details: None,
            tokens_used: record.usage.map(|u| u.total_tokens),
        };
        if let Err(e) = self.structured_logger.log_step(entry).await {
            warn!("Structured log write failed: {}", e);
        }
    }
}

/// Split a document into character-bounded batches on char boundaries.
/// `None` (or a bound covering the whole text) yields a single batch.
fn split_batches(document: &str, batch_size_chars: Option<usize>) -> Vec<String> {
    match batch_size_chars {
        Some(size) if size > 0 && document.chars().count() > size => {
            let chars: Vec<char> = document.chars().collect();
            chars
                .chunks(size)
                .map(|chunk| chunk.iter().collect())
                .collect()
        }
        _ => vec![document.to_string()],
    }
}
