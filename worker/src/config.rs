//! Configuration management for the extraction worker

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use graphmine_core::errors::CoreError;
use graphmine_core::types::{LinkingStrategy, PipelineMode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which LLM provider the factory constructs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::OpenAi
    }
}

/// Configuration for the extraction worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Gates polling loop startup
    pub enabled: bool,
    /// Tick interval of the polling loop
    pub poll_interval_ms: u64,
    /// Maximum jobs dequeued per tick
    pub batch_size: usize,
    /// Maximum attempts before a failed job is no longer retried
    pub max_retries: u32,
    /// Server-default confidence bands
    pub confidence_threshold_min: f64,
    pub confidence_threshold_review: f64,
    pub confidence_threshold_auto: f64,
    /// How candidates are linked against existing objects
    pub entity_linking_strategy: LinkingStrategy,
    /// Default similarity threshold for vector linking and context search
    pub entity_similarity_threshold: f64,
    /// Pack auto-installed when a project has none
    pub default_template_pack: Option<String>,
    /// Server-default base prompt; the settings store overrides it
    pub base_prompt: String,
    /// Gates post-hoc verification for single-pass pipelines
    pub verification_enabled: bool,
    /// Gates on-demand embedding generation
    pub embeddings_enabled: bool,
    /// Which upstream pipeline produced candidate confidences
    pub pipeline_mode: PipelineMode,
    /// Token budget refilled per minute
    pub rate_limit_tokens_per_minute: u64,
    /// Bounded wait for token budget before a job fails as rate-limited
    pub rate_limit_wait_timeout_ms: u64,
    /// Which provider connector the factory builds
    pub provider: ProviderKind,
    /// Provider API key
    pub provider_api_key: String,
    /// Provider model override
    pub provider_model: Option<String>,
    /// Provider API base URL override
    pub provider_api_base: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5_000,
            batch_size: 5,
            max_retries: 3,
            confidence_threshold_min: 0.4,
            confidence_threshold_review: 0.5,
            confidence_threshold_auto: 0.8,
            entity_linking_strategy: LinkingStrategy::KeyMatch,
            entity_similarity_threshold: 0.5,
            default_template_pack: None,
            base_prompt: "You are an expert knowledge graph extraction engine. Analyze the \
                          provided document and extract typed entities and the relationships \
                          between them, constrained to the supplied schemas."
                .to_string(),
            verification_enabled: false,
            embeddings_enabled: true,
            pipeline_mode: PipelineMode::SinglePass,
            rate_limit_tokens_per_minute: 200_000,
            rate_limit_wait_timeout_ms: 30_000,
            provider: ProviderKind::default(),
            provider_api_key: String::new(),
            provider_model: None,
            provider_api_base: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from file and environment.
    ///
    /// Defaults are merged first, then `graphmine.yaml` (or the explicit
    /// path), then `GRAPHMINE_`-prefixed environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, CoreError> {
        let mut figment = Figment::from(Serialized::defaults(WorkerConfig::default()));

        let default_config_paths = ["graphmine.yaml", "graphmine.yml", ".graphmine.yaml"];
        for path in &default_config_paths {
            if Path::new(path).exists() {
                figment = figment.merge(Yaml::file(path));
                break;
            }
        }

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            } else {
                return Err(CoreError::Configuration(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        figment = figment.merge(Env::prefixed("GRAPHMINE_"));

        figment
            .extract()
            .map_err(|e| CoreError::Configuration(format!("Failed to parse configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_retries, 3);
        assert!(config.confidence_threshold_min < config.confidence_threshold_review);
        assert!(config.confidence_threshold_review < config.confidence_threshold_auto);
        assert_eq!(config.entity_linking_strategy, LinkingStrategy::KeyMatch);
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let result = WorkerConfig::load(Some(Path::new("/nonexistent/graphmine.yaml")));
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }
}
