//! OpenAI provider for Graphmine entity extraction

use async_trait::async_trait;
use graphmine_core::errors::LlmError;
use graphmine_core::traits::{ExtractionOptions, LlmProvider, ProviderResponse};
use graphmine_core::types::{CandidateEntity, CandidateRelationship, ExtractionMethod, TokenUsage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

mod config;
mod models;

pub use config::OpenAiConfig;
use models::*;

/// The shape the model is asked to produce
#[derive(Debug, Default, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    entities: Vec<CandidateEntity>,
    #[serde(default)]
    relationships: Vec<CandidateRelationship>,
    #[serde(default)]
    discovered_types: Vec<String>,
}

/// OpenAI implementation of [`LlmProvider`]
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// JSON Schema for the extraction payload, embedding the effective
    /// object schemas so the model sees per-type property expectations
    fn payload_schema(options: &ExtractionOptions) -> Value {
        let type_schemas: Value = options
            .object_schemas
            .iter()
            .map(|(name, merged)| {
                (
                    name.clone(),
                    json!({
                        "description": merged.schema.description,
                        "properties": merged.schema.properties,
                        "required": merged.schema.required,
                    }),
                )
            })
            .collect::<serde_json::Map<String, Value>>()
            .into();

        json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": options.allowed_types},
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "properties": {"type": "object"},
                            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                        },
                        "required": ["type", "name"]
                    }
                },
                "relationships": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string"},
                            "source": {"type": "object", "properties": {"name": {"type": "string"}, "id": {"type": "string"}}},
                            "target": {"type": "object", "properties": {"name": {"type": "string"}, "id": {"type": "string"}}},
                            "description": {"type": "string"},
                            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                        },
                        "required": ["type", "source", "target"]
                    }
                },
                "discovered_types": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["entities", "relationships"],
            "type_schemas": type_schemas
        })
    }

    /// Parse the payload from raw model text, tolerating markdown fences
    fn parse_payload(content: &str) -> Result<ExtractionPayload, LlmError> {
        let cleaned_content = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        debug!("Parsing extraction payload: {}", cleaned_content);

        serde_json::from_str(cleaned_content).map_err(|e| {
            error!("Failed to parse extraction payload: {}", e);
            LlmError::SchemaValidationError(format!(
                "Failed to parse JSON: {}. Content: '{}'",
                e, cleaned_content
            ))
        })
    }

    /// Drop candidates that violate basic invariants (empty names) and
    /// clamp reported confidences into [0, 1]
    fn sanitize(mut payload: ExtractionPayload) -> ExtractionPayload {
        let before = payload.entities.len();
        payload.entities.retain(|e| !e.name.trim().is_empty());
        if payload.entities.len() < before {
            warn!(
                "Dropped {} entity candidate(s) with empty names",
                before - payload.entities.len()
            );
        }
        for entity in &mut payload.entities {
            if let Some(c) = entity.confidence.as_mut() {
                *c = c.clamp(0.0, 1.0);
            }
        }
        for relationship in &mut payload.relationships {
            if let Some(c) = relationship.confidence.as_mut() {
                *c = c.clamp(0.0, 1.0);
            }
        }
        payload
    }

    fn build_request(
        &self,
        document: &str,
        base_prompt: &str,
        options: &ExtractionOptions,
    ) -> ChatCompletionRequest {
        let method = options.extraction_method.unwrap_or_default();
        let messages = vec![
            OpenAiMessage {
                role: "system".to_string(),
                content: base_prompt.to_string(),
            },
            OpenAiMessage {
                role: "user".to_string(),
                content: document.to_string(),
            },
        ];

        match method {
            ExtractionMethod::FunctionCalling => ChatCompletionRequest {
                model: self.config.model.clone(),
                messages,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                tools: Some(vec![Tool {
                    tool_type: "function".to_string(),
                    function: FunctionDefinition {
                        name: "record_extraction".to_string(),
                        description:
                            "Record the entities and relationships extracted from the document"
                                .to_string(),
                        parameters: Self::payload_schema(options),
                    },
                }]),
                tool_choice: Some(ToolChoice {
                    choice_type: "function".to_string(),
                    function: ToolChoiceFunction {
                        name: "record_extraction".to_string(),
                    },
                }),
                response_format: None,
            },
            ExtractionMethod::ResponseSchema => ChatCompletionRequest {
                model: self.config.model.clone(),
                messages,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                tools: None,
                tool_choice: None,
                response_format: Some(ResponseFormat {
                    format_type: "json_schema".to_string(),
                    json_schema: Some(JsonSchemaFormat {
                        name: "extraction".to_string(),
                        schema: Self::payload_schema(options),
                    }),
                }),
            },
        }
    }

    /// Pull the payload text out of the first choice, preferring a tool
    /// call when one is present
    fn extract_content(response: &ChatCompletionResponse) -> Result<String, LlmError> {
        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::ResponseParseError("No choices in response".to_string()))?;

        if let Some(tool_call) = choice.message.tool_calls.first() {
            return Ok(tool_call.function.arguments.clone());
        }
        choice
            .message
            .content
            .clone()
            .ok_or_else(|| LlmError::ResponseParseError("No content in response".to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    async fn extract_entities(
        &self,
        document: &str,
        base_prompt: &str,
        options: &ExtractionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        let request = self.build_request(document, base_prompt, options);

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.api_base))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParseError(format!("Failed to parse response: {}", e)))?;

        let content = Self::extract_content(&completion)?;
        let payload = Self::sanitize(Self::parse_payload(&content)?);

        info!(
            "OpenAI extraction returned {} entities, {} relationships",
            payload.entities.len(),
            payload.relationships.len()
        );

        Ok(ProviderResponse {
            entities: payload.entities,
            relationships: payload.relationships,
            discovered_types: payload.discovered_types,
            usage: completion.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}
