//! In-memory implementations of the auxiliary extraction services

use async_trait::async_trait;
use chrono::Utc;
use graphmine_core::errors::ServiceError;
use graphmine_core::schema::SchemaPack;
use graphmine_core::traits::{
    ChunkerService, CompletionNotification, DocumentsService, EmbeddingsService,
    EntityVerification, FailureNotification, Notifier, ProjectsService, SettingsStore, StepLog,
    StructuredLogger, TemplatePackService, VerificationRequest, VerificationResponse,
    VerifierService,
};
use graphmine_core::types::{
    Chunk, ChunkDraft, ChunkingConfig, DocumentRecord, Job, Project, ProjectId,
};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory project registry
#[derive(Default)]
pub struct InMemoryProjects {
    projects: RwLock<HashMap<ProjectId, Project>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project
    pub async fn insert(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
    }
}

#[async_trait]
impl ProjectsService for InMemoryProjects {
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, ServiceError> {
        Ok(self.projects.read().await.get(id).cloned())
    }
}

#[derive(Default)]
struct DocumentState {
    documents: HashMap<String, DocumentRecord>,
    /// Chunks per document, ordered by index
    chunks: HashMap<String, Vec<Chunk>>,
}

/// In-memory document and chunk storage
#[derive(Default)]
pub struct InMemoryDocuments {
    state: RwLock<DocumentState>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document
    pub async fn insert_document(&self, document: DocumentRecord) {
        self.state
            .write()
            .await
            .documents
            .insert(document.id.clone(), document);
    }

    /// Convenience constructor for tests
    pub async fn insert_text(&self, id: &str, project_id: ProjectId, content: &str) {
        self.insert_document(DocumentRecord {
            id: id.to_string(),
            project_id,
            content: content.to_string(),
            created_at: Utc::now(),
        })
        .await;
    }
}

#[async_trait]
impl DocumentsService for InMemoryDocuments {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, ServiceError> {
        Ok(self.state.read().await.documents.get(id).cloned())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, ServiceError> {
        Ok(self
            .state
            .read()
            .await
            .chunks
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_chunks(
        &self,
        document_id: &str,
        drafts: Vec<ChunkDraft>,
    ) -> Result<Vec<Chunk>, ServiceError> {
        let mut state = self.state.write().await;
        let existing = state.chunks.entry(document_id.to_string()).or_default();
        let base_index = existing.len() as u32;
        let mut created = Vec::with_capacity(drafts.len());
        for (offset, draft) in drafts.into_iter().enumerate() {
            let chunk = Chunk {
                id: Uuid::new_v4(),
                document_id: document_id.to_string(),
                index: base_index + offset as u32,
                text: draft.text,
                metadata: draft.metadata,
                embedding: None,
            };
            existing.push(chunk.clone());
            created.push(chunk);
        }
        Ok(created)
    }

    async fn set_chunk_embedding(
        &self,
        chunk_id: Uuid,
        embedding: Vec<f32>,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        for chunks in state.chunks.values_mut() {
            if let Some(chunk) = chunks.iter_mut().find(|c| c.id == chunk_id) {
                chunk.embedding = Some(embedding);
                return Ok(());
            }
        }
        Err(ServiceError::NotFound(chunk_id.to_string()))
    }
}

/// Paragraph chunker: splits on blank lines, slicing oversized paragraphs
/// to the configured maximum
pub struct InMemoryChunker {
    default_max_chunk_size: usize,
}

impl InMemoryChunker {
    pub fn new() -> Self {
        Self {
            default_max_chunk_size: 2_000,
        }
    }
}

impl Default for InMemoryChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkerService for InMemoryChunker {
    async fn chunk_with_metadata(
        &self,
        text: &str,
        config: Option<&ChunkingConfig>,
    ) -> Result<Vec<ChunkDraft>, ServiceError> {
        let max_size = config
            .and_then(|c| c.max_chunk_size)
            .unwrap_or(self.default_max_chunk_size);
        let mut drafts = Vec::new();
        for paragraph in text.split("\n\n") {
            let trimmed = paragraph.trim();
            if trimmed.is_empty() {
                continue;
            }
            let chars: Vec<char> = trimmed.chars().collect();
            for slice in chars.chunks(max_size.max(1)) {
                drafts.push(ChunkDraft {
                    text: slice.iter().collect(),
                    metadata: json!({"strategy": "paragraph"}),
                });
            }
        }
        Ok(drafts)
    }
}

/// Deterministic embeddings: identical texts embed identically, so tests
/// can rely on exact vector matches without a model
pub struct InMemoryEmbeddings {
    dimensions: usize,
}

impl InMemoryEmbeddings {
    pub fn new() -> Self {
        Self { dimensions: 8 }
    }

    /// Embed one text with the same function `embed_documents` uses
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimensions] += byte as f32 / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for InMemoryEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingsService for InMemoryEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Default)]
struct TemplatePackState {
    /// Registry of installable packs by name
    registry: HashMap<String, SchemaPack>,
    /// Pack names assigned per project, in installation order
    assignments: HashMap<ProjectId, Vec<String>>,
}

/// In-memory template pack registry and per-project assignments
#[derive(Default)]
pub struct InMemoryTemplatePacks {
    state: RwLock<TemplatePackState>,
}

impl InMemoryTemplatePacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an installable pack
    pub async fn register(&self, pack: SchemaPack) {
        self.state
            .write()
            .await
            .registry
            .insert(pack.name.clone(), pack);
    }

    /// Assign a pack to a project directly (test setup)
    pub async fn assign(&self, project_id: &ProjectId, pack_name: &str) {
        self.state
            .write()
            .await
            .assignments
            .entry(project_id.clone())
            .or_default()
            .push(pack_name.to_string());
    }
}

#[async_trait]
impl TemplatePackService for InMemoryTemplatePacks {
    async fn list_active_packs(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<SchemaPack>, ServiceError> {
        let state = self.state.read().await;
        let names = state.assignments.get(project_id).cloned().unwrap_or_default();
        Ok(names
            .iter()
            .filter_map(|name| state.registry.get(name))
            .filter(|pack| pack.active)
            .cloned()
            .collect())
    }

    async fn install_pack(
        &self,
        project_id: &ProjectId,
        pack_name: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        if !state.registry.contains_key(pack_name) {
            return Err(ServiceError::NotFound(pack_name.to_string()));
        }
        let assigned = state.assignments.entry(project_id.clone()).or_default();
        if assigned.iter().any(|name| name == pack_name) {
            return Err(ServiceError::AlreadyExists(pack_name.to_string()));
        }
        assigned.push(pack_name.to_string());
        Ok(())
    }
}

/// In-memory key-value settings
#[derive(Default)]
pub struct InMemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value
    pub async fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.values.read().await.get(key).cloned())
    }
}

/// Verifier with preprogrammed per-name results; names without a result
/// come back uncertain with a neutral confidence
#[derive(Default)]
pub struct StaticVerifier {
    results: RwLock<HashMap<String, EntityVerification>>,
    fail: RwLock<bool>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preprogram a verdict for an entity name
    pub async fn program(&self, verification: EntityVerification) {
        self.results
            .write()
            .await
            .insert(verification.entity_name.to_lowercase(), verification);
    }

    /// Make subsequent calls fail, to exercise the non-fatal path
    pub async fn set_failing(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl VerifierService for StaticVerifier {
    async fn verify_batch(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationResponse, ServiceError> {
        if *self.fail.read().await {
            return Err(ServiceError::Unavailable("verifier offline".to_string()));
        }
        let programmed = self.results.read().await;
        let results = request
            .entities
            .iter()
            .map(|entity| {
                programmed
                    .get(&entity.name.to_lowercase())
                    .cloned()
                    .unwrap_or(EntityVerification {
                        entity_name: entity.name.clone(),
                        entity_verified: false,
                        overall_confidence: 0.5,
                        entity_verification_tier: 2,
                    })
            })
            .collect();
        Ok(VerificationResponse {
            results,
            summary: None,
            processing_time_ms: 1,
        })
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone)]
pub enum RecordedNotification {
    Completed {
        job: Job,
        summary: CompletionNotification,
    },
    Failed {
        job: Job,
        failure: FailureNotification,
    },
}

/// Notifier that records every dispatch for test assertions
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: RwLock<Vec<RecordedNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications dispatched so far
    pub async fn recorded(&self) -> Vec<RecordedNotification> {
        self.notifications.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_extraction_completed(
        &self,
        job: &Job,
        summary: &CompletionNotification,
    ) -> Result<(), ServiceError> {
        self.notifications
            .write()
            .await
            .push(RecordedNotification::Completed {
                job: job.clone(),
                summary: summary.clone(),
            });
        Ok(())
    }

    async fn notify_extraction_failed(
        &self,
        job: &Job,
        failure: &FailureNotification,
    ) -> Result<(), ServiceError> {
        self.notifications
            .write()
            .await
            .push(RecordedNotification::Failed {
                job: job.clone(),
                failure: failure.clone(),
            });
        Ok(())
    }
}

/// Structured logger that keeps entries in memory
#[derive(Default)]
pub struct RecordingLogger {
    entries: RwLock<Vec<StepLog>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries logged so far
    pub async fn entries(&self) -> Vec<StepLog> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl StructuredLogger for RecordingLogger {
    async fn log_step(&self, entry: StepLog) -> Result<(), ServiceError> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}
