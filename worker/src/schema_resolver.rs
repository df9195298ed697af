//! Schema pack resolution for a job's project
//!
//! Fetches the project's active packs, auto-installing the configured
//! default pack when the project has none, merges them into the effective
//! schema, and resolves the base prompt (settings store first, worker
//! configuration as fallback).

use graphmine_core::errors::{JobError, ServiceError};
use graphmine_core::schema::EffectiveSchema;
use graphmine_core::traits::{SettingsStore, TemplatePackService};
use graphmine_core::types::ProjectId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings key consulted for the base prompt
pub const BASE_PROMPT_SETTING: &str = "extraction.basePrompt";

/// Resolution output handed to the orchestrator
pub struct ResolvedSchema {
    /// Merged schema of all active packs
    pub schema: EffectiveSchema,
    /// Names of the packs that were merged, in order
    pub pack_names: Vec<String>,
    /// Whether the default pack was installed during resolution
    pub auto_installed: bool,
    /// Base prompt for prompt assembly
    pub base_prompt: String,
}

/// Resolves a project's effective extraction schema
pub struct SchemaPackResolver {
    template_packs: Arc<dyn TemplatePackService>,
    settings: Arc<dyn SettingsStore>,
}

impl SchemaPackResolver {
    pub fn new(
        template_packs: Arc<dyn TemplatePackService>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            template_packs,
            settings,
        }
    }

    /// Resolve the effective schema for a project.
    ///
    /// The caller decides whether an empty result is fatal; extraction
    /// without object schemas is.
    pub async fn resolve(
        &self,
        project_id: &ProjectId,
        default_pack: Option<&str>,
        config_base_prompt: &str,
    ) -> Result<ResolvedSchema, JobError> {
        let mut packs = self
            .template_packs
            .list_active_packs(project_id)
            .await
            .map_err(|e| JobError::Config(format!("Failed to list template packs: {}", e)))?;

        let mut auto_installed = false;
        if packs.is_empty() {
            if let Some(pack_name) = default_pack {
                match self.template_packs.install_pack(project_id, pack_name).await {
                    Ok(()) => {
                        info!(%project_id, pack_name, "Auto-installed default template pack");
                        auto_installed = true;
                    }
                    Err(ServiceError::AlreadyExists(_)) => {
                        // Raced with another installer; the re-fetch below
                        // picks the pack up
                        info!(%project_id, pack_name, "Default pack already installed, re-fetching");
                    }
                    Err(e) => {
                        warn!(%project_id, pack_name, "Default pack install failed: {}", e);
                    }
                }
                packs = self
                    .template_packs
                    .list_active_packs(project_id)
                    .await
                    .map_err(|e| {
                        JobError::Config(format!("Failed to re-list template packs: {}", e))
                    })?;
            }
        }

        let pack_names: Vec<String> = packs.iter().map(|p| p.name.clone()).collect();
        let schema = EffectiveSchema::merge(&packs);
        debug!(
            %project_id,
            packs = pack_names.len(),
            object_types = schema.object_schemas.len(),
            "Resolved effective schema"
        );

        let base_prompt = self.resolve_base_prompt(config_base_prompt).await;

        Ok(ResolvedSchema {
            schema,
            pack_names,
            auto_installed,
            base_prompt,
        })
    }

    /// Settings store first, configuration default as fallback. Settings
    /// failures are non-fatal.
    async fn resolve_base_prompt(&self, config_base_prompt: &str) -> String {
        match self.settings.get(BASE_PROMPT_SETTING).await {
            Ok(Some(prompt)) if !prompt.trim().is_empty() => prompt,
            Ok(_) => config_base_prompt.to_string(),
            Err(e) => {
                warn!("Settings lookup for base prompt failed: {}", e);
                config_base_prompt.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphmine_core::schema::{ObjectTypeSchema, SchemaPack};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    struct FakePacks {
        /// Registered pack returned once installed
        pack: SchemaPack,
        installed: RwLock<bool>,
        install_calls: AtomicUsize,
        conflict: bool,
    }

    #[async_trait]
    impl TemplatePackService for FakePacks {
        async fn list_active_packs(
            &self,
            _project_id: &ProjectId,
        ) -> Result<Vec<SchemaPack>, ServiceError> {
            if *self.installed.read().await {
                Ok(vec![self.pack.clone()])
            } else {
                Ok(vec![])
            }
        }

        async fn install_pack(
            &self,
            _project_id: &ProjectId,
            _pack_name: &str,
        ) -> Result<(), ServiceError> {
            self.install_calls.fetch_add(1, Ordering::SeqCst);
            if self.conflict {
                *self.installed.write().await = true;
                return Err(ServiceError::AlreadyExists("default".to_string()));
            }
            *self.installed.write().await = true;
            Ok(())
        }
    }

    struct FakeSettings {
        value: Option<String>,
    }

    #[async_trait]
    impl SettingsStore for FakeSettings {
        async fn get(&self, _key: &str) -> Result<Option<String>, ServiceError> {
            Ok(self.value.clone())
        }
    }

    fn pack() -> SchemaPack {
        SchemaPack::new("default", "1.0.0")
            .with_object_schema("Person", ObjectTypeSchema::default())
    }

    #[tokio::test]
    async fn test_auto_install_when_project_has_no_packs() {
        let packs = Arc::new(FakePacks {
            pack: pack(),
            installed: RwLock::new(false),
            install_calls: AtomicUsize::new(0),
            conflict: false,
        });
        let resolver = SchemaPackResolver::new(
            packs.clone(),
            Arc::new(FakeSettings { value: None }),
        );

        let resolved = resolver
            .resolve(&ProjectId::new("proj-1"), Some("default"), "fallback prompt")
            .await
            .unwrap();
        assert!(resolved.auto_installed);
        assert!(resolved.schema.has_object_schemas());
        assert_eq!(packs.install_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_install_conflict_refetches() {
        let packs = Arc::new(FakePacks {
            pack: pack(),
            installed: RwLock::new(false),
            install_calls: AtomicUsize::new(0),
            conflict: true,
        });
        let resolver = SchemaPackResolver::new(
            packs,
            Arc::new(FakeSettings { value: None }),
        );

        let resolved = resolver
            .resolve(&ProjectId::new("proj-1"), Some("default"), "fallback prompt")
            .await
            .unwrap();
        assert!(!resolved.auto_installed);
        assert!(resolved.schema.has_object_schemas());
    }

    #[tokio::test]
    async fn test_no_default_pack_yields_empty_schema() {
        let packs = Arc::new(FakePacks {
            pack: pack(),
            installed: RwLock::new(false),
            install_calls: AtomicUsize::new(0),
            conflict: false,
        });
        let resolver = SchemaPackResolver::new(
            packs,
            Arc::new(FakeSettings { value: None }),
        );

        let resolved = resolver
            .resolve(&ProjectId::new("proj-1"), None, "fallback prompt")
            .await
            .unwrap();
        assert!(!resolved.schema.has_object_schemas());
    }

    #[tokio::test]
    async fn test_settings_store_overrides_base_prompt() {
        let packs = Arc::new(FakePacks {
            pack: pack(),
            installed: RwLock::new(true),
            install_calls: AtomicUsize::new(0),
            conflict: false,
        });
        let resolver = SchemaPackResolver::new(
            packs,
            Arc::new(FakeSettings {
                value: Some("settings prompt".to_string()),
            }),
        );

        let resolved = resolver
            .resolve(&ProjectId::new("proj-1"), None, "fallback prompt")
            .await
            .unwrap();
        assert_eq!(resolved.base_prompt, "settings prompt");
    }
}
