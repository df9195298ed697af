//! Anthropic provider for Graphmine entity extraction

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

pub use config::AnthropicConfig;
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

/// Anthropic implementation of [`LlmProvider`]
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Input schema for the extraction tool
    fn payload_schema(options: &ExtractionOptions) -> Value {
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
            "required": ["entities", "relationships"]
        })
    }

    fn build_request(
        &self,
        document: &str,
        base_prompt: &str,
        options: &ExtractionOptions,
    ) -> MessageRequest {
        let method = options.extraction_method.unwrap_or_default();
        match method {
            ExtractionMethod::FunctionCalling => MessageRequest {
                model: self.config.model.clone(),
                messages: vec![Message::new_user(document)],
                system: Some(base_prompt.to_string()),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                tools: Some(vec![Tool {
                    name: "record_extraction".to_string(),
                    description:
                        "Record the entities and relationships extracted from the document"
                            .to_string(),
                    input_schema: Self::payload_schema(options),
                }]),
                tool_choice: Some(ToolChoice {
                    choice_type: "tool".to_string(),
                    name: Some("record_extraction".to_string()),
                }),
            },
            // The Messages API has no native response-schema mode; the
            // prompt demands a bare JSON object and the parser tolerates
            // markdown fences
            ExtractionMethod::ResponseSchema => MessageRequest {
                model: self.config.model.clone(),
                messages: vec![Message::new_user(document)],
                system: Some(format!(
                    "{}\n\nReturn your findings strictly as a JSON object matching this schema:\n{}",
                    base_prompt,
                    Self::payload_schema(options)
                )),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                tools: None,
                tool_choice: None,
            },
        }
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

    /// Drop candidates that violate basic invariants and clamp confidences
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

    /// Pull the payload out of the response, preferring a tool_use block
    fn extract_payload(response: &MessageResponse) -> Result<ExtractionPayload, LlmError> {
        if let Some(block) = response
            .content
            .iter()
            .find(|block| block.content_type == "tool_use")
        {
            let input = block
                .input
                .clone()
                .ok_or_else(|| LlmError::ResponseParseError("tool_use without input".to_string()))?;
            return serde_json::from_value(input).map_err(|e| {
                LlmError::SchemaValidationError(format!("Invalid tool input: {}", e))
            });
        }

        let text = response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return Err(LlmError::ResponseParseError(
                "No content in response".to_string(),
            ));
        }
        Self::parse_payload(&text)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
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
            .post(format!("{}/v1/messages", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
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
                "Anthropic API error {}: {}",
                status, error_text
            )));
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParseError(format!("Failed to parse response: {}", e)))?;

        let payload = Self::sanitize(Self::extract_payload(&message)?);

        info!(
            "Anthropic extraction returned {} entities, {} relationships",
            payload.entities.len(),
            payload.relationships.len()
        );

        Ok(ProviderResponse {
            entities: payload.entities,
            relationships: payload.relationships,
            discovered_types: payload.discovered_types,
            usage: message.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> ExtractionOptions {
        ExtractionOptions {
            allowed_types: vec!["Person".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_creation_and_configuration() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("test-key")).unwrap();
        assert!(provider.is_configured());

        let unconfigured = AnthropicProvider::new(AnthropicConfig::default()).unwrap();
        assert!(!unconfigured.is_configured());
    }

    #[test]
    fn test_function_calling_request_forces_the_extraction_tool() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("test-key")).unwrap();
        let request = provider.build_request("Some text", "Extract entities.", &options());

        let tools = request.tools.expect("tool definition expected");
        assert_eq!(tools[0].name, "record_extraction");
        let choice = request.tool_choice.expect("forced tool choice expected");
        assert_eq!(choice.name.as_deref(), Some("record_extraction"));
    }

    #[test]
    fn test_response_schema_request_embeds_schema_in_system_prompt() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("test-key")).unwrap();
        let mut opts = options();
        opts.extraction_method = Some(ExtractionMethod::ResponseSchema);
        let request = provider.build_request("Some text", "Extract entities.", &opts);

        assert!(request.tools.is_none());
        assert!(request.system.unwrap().contains("entities"));
    }

    #[test]
    fn test_extract_payload_prefers_tool_use_block() {
        let response = MessageResponse {
            id: "msg_1".to_string(),
            model: "claude".to_string(),
            content: vec![ContentBlock {
                content_type: "tool_use".to_string(),
                text: None,
                input: Some(json!({
                    "entities": [{"type": "Person", "name": "Ada"}],
                    "relationships": []
                })),
            }],
            usage: None,
        };
        let payload = AnthropicProvider::extract_payload(&response).unwrap();
        assert_eq!(payload.entities[0].name, "Ada");
    }

    #[test]
    fn test_extract_payload_parses_fenced_text() {
        let response = MessageResponse {
            id: "msg_1".to_string(),
            model: "claude".to_string(),
            content: vec![ContentBlock {
                content_type: "text".to_string(),
                text: Some(
                    "```json\n{\"entities\": [], \"relationships\": []}\n```".to_string(),
                ),
                input: None,
            }],
            usage: None,
        };
        let payload = AnthropicProvider::extract_payload(&response).unwrap();
        assert!(payload.entities.is_empty());
    }

    #[tokio::test]
    async fn test_extract_entities_parses_tool_use_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-sonnet-4-20250514",
                "content": [{
                    "type": "tool_use",
                    "id": "tu_1",
                    "name": "record_extraction",
                    "input": {
                        "entities": [{"type": "Person", "name": "Ada", "confidence": 0.9}],
                        "relationships": []
                    }
                }],
                "usage": {"input_tokens": 100, "output_tokens": 20}
            })))
            .mount(&server)
            .await;

        let provider =
            AnthropicProvider::new(AnthropicConfig::new("test-key").with_api_base(server.uri()))
                .unwrap();
        let response = provider
            .extract_entities("Ada Lovelace was a mathematician.", "Extract entities.", &options())
            .await
            .unwrap();

        assert_eq!(response.entities.len(), 1);
        assert_eq!(response.entities[0].name, "Ada");
        assert_eq!(response.usage.unwrap().total_tokens, 120);
    }

    #[tokio::test]
    async fn test_extract_entities_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider =
            AnthropicProvider::new(AnthropicConfig::new("test-key").with_api_base(server.uri()))
                .unwrap();
        let err = provider
            .extract_entities("Some text", "Extract entities.", &options())
            .await
            .unwrap_err();

        match err {
            LlmError::ApiError(message) => {
                assert!(message.contains("529"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected ApiError, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_extract_entities_times_out_against_slow_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"id": "msg_1", "model": "claude", "content": []})),
            )
            .mount(&server)
            .await;

        let provider =
            AnthropicProvider::new(AnthropicConfig::new("test-key").with_api_base(server.uri()))
                .unwrap();
        let mut opts = options();
        opts.timeout = Some(Duration::from_millis(50));
        let err = provider
            .extract_entities("Some text", "Extract entities.", &opts)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Timeout));
    }
}
