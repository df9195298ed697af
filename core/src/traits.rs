//! Service contracts the extraction worker consumes
//!
//! The worker composes these traits; everything behind them (SQL queue,
//! graph database, embeddings provider, notification fan-out) is an
//! external collaborator. The in-memory adapter crate implements all of
//! them for tests and development.

use crate::errors::{GraphError, LlmError, ServiceError, StoreError};
use crate::schema::{MergedObjectSchema, MergedRelationshipSchema, SchemaPack};
use crate::tenant::TenantContext;
use crate::types::{
    CandidateEntity, CandidateRelationship, Chunk, ChunkDraft, ChunkingConfig, ContextEntity,
    DocumentRecord, ExtractionMethod, GraphObject, Job, JobId, JobResult, JobStatus,
    NeighborSummary, NewObject, NewRelationship, Project, ProjectId, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Marker appended to `error_message` when orphan recovery re-queues a job.
/// Recovery checks for it before appending, so running twice is idempotent.
pub const ORPHAN_RECOVERY_MARKER: &str =
    "Job was interrupted by server restart and has been reset to queued.";

/// A `running` job whose `updated_at` is older than this is an orphan.
pub const ORPHAN_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Default maximum attempts before a job is no longer retried
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Durable queue operations for extraction jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically reserve up to `n` queued jobs: transition each to
    /// `running`, set `started_at`, and return them. No two workers may
    /// observe the same job.
    async fn dequeue_batch(&self, n: usize) -> Result<Vec<Job>, StoreError>;

    /// Best-effort progress update; concurrent writers may race and the
    /// last write wins.
    async fn update_progress(
        &self,
        job_id: &JobId,
        processed: usize,
        total: usize,
    ) -> Result<(), StoreError>;

    /// Record outputs and move the job to a successful terminal status
    /// (`completed` or `requires_review`).
    async fn mark_completed(
        &self,
        job_id: &JobId,
        result: JobResult,
        debug_info: crate::types::JobDebugInfo,
        final_status: JobStatus,
    ) -> Result<(), StoreError>;

    /// Move the job to `failed` with a message and debug snapshot
    async fn mark_failed(
        &self,
        job_id: &JobId,
        message: &str,
        details: Value,
        debug_info: Option<crate::types::JobDebugInfo>,
    ) -> Result<(), StoreError>;

    /// Number of attempts recorded for the job
    async fn get_retry_count(&self, job_id: &JobId) -> Result<u32, StoreError>;

    /// Reset stale `running` jobs back to `queued`, clearing `started_at`
    /// and appending [`ORPHAN_RECOVERY_MARKER`] to `error_message` once.
    /// Jobs whose tenant context cannot be resolved are skipped with a
    /// warning. Returns the number of jobs recovered.
    async fn recover_orphans(&self) -> Result<usize, StoreError>;
}

/// Project lookups; resolves the tenant pair a job runs under
#[async_trait]
pub trait ProjectsService: Send + Sync {
    /// Fetch a project by id
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, ServiceError>;
}

/// Call context threaded through provider invocations for tracing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallContext {
    pub job_id: Option<JobId>,
    pub project_id: Option<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<String>,
}

/// Options for one extraction call
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    /// Effective object schemas the model must conform to
    pub object_schemas: BTreeMap<String, MergedObjectSchema>,
    /// Effective relationship schemas
    pub relationship_schemas: BTreeMap<String, MergedRelationshipSchema>,
    /// Type names the model may emit
    pub allowed_types: Vec<String>,
    /// Existing project tags the model should prefer reusing
    pub available_tags: Vec<String>,
    /// Existing entities surfaced for deduplication
    pub existing_entities: Vec<ContextEntity>,
    /// Chunk texts of the source document
    pub document_chunks: Vec<String>,
    /// Structured-output method
    pub extraction_method: Option<ExtractionMethod>,
    /// Per-call timeout
    pub timeout: Option<Duration>,
    /// Character-bounded batch size, when the caller batches
    pub batch_size_chars: Option<usize>,
    /// Entity-similarity threshold, for providers that dedupe internally
    pub similarity_threshold: Option<f64>,
    /// Tracing context
    pub context: CallContext,
}

/// Structured output of one provider call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Extracted entity candidates
    pub entities: Vec<CandidateEntity>,
    /// Extracted relationship candidates
    pub relationships: Vec<CandidateRelationship>,
    /// Type names the model proposed outside the allowed set
    #[serde(default)]
    pub discovered_types: Vec<String>,
    /// Token usage, when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// A Large Language Model extraction provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name recorded in debug info (e.g. "openai")
    fn name(&self) -> &'static str;

    /// Whether the provider has the configuration it needs to be called
    fn is_configured(&self) -> bool;

    /// Extract entities and relationships from one document (or batch
    /// slice). The assembled extraction prompt is authoritative; providers
    /// add wire-format framing only.
    async fn extract_entities(
        &self,
        document: &str,
        base_prompt: &str,
        options: &ExtractionOptions,
    ) -> Result<ProviderResponse, LlmError>;
}

/// Embedding generation for chunk and entity text
#[async_trait]
pub trait EmbeddingsService: Send + Sync {
    /// Embed each text; the result preserves input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Source document access and chunk persistence
#[async_trait]
pub trait DocumentsService: Send + Sync {
    /// Fetch a document by id
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, ServiceError>;

    /// List a document's chunks ordered by index
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, ServiceError>;

    /// Persist chunks for a document, assigning ids and indexes
    async fn create_chunks(
        &self,
        document_id: &str,
        drafts: Vec<ChunkDraft>,
    ) -> Result<Vec<Chunk>, ServiceError>;

    /// Store an embedding for a chunk
    async fn set_chunk_embedding(
        &self,
        chunk_id: Uuid,
        embedding: Vec<f32>,
    ) -> Result<(), ServiceError>;
}

/// Text chunking
#[async_trait]
pub trait ChunkerService: Send + Sync {
    /// Split text into chunk drafts with positional metadata
    async fn chunk_with_metadata(
        &self,
        text: &str,
        config: Option<&ChunkingConfig>,
    ) -> Result<Vec<ChunkDraft>, ServiceError>;
}

/// A vector-search match over existing graph objects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub object_id: Uuid,
    /// Cosine distance; similarity is `1 - distance`
    pub distance: f64,
}

/// Tenant-scoped property graph operations
///
/// Every read and write takes the [`TenantContext`] established by the
/// job's [`crate::tenant::TenantScope`]; implementations must refuse
/// records owned by a different tenant pair.
#[async_trait]
pub trait GraphService: Send + Sync {
    /// Establish per-connection session scope for the tenant pair
    async fn enter_scope(&self, ctx: &TenantContext) -> Result<(), GraphError>;

    /// Release the session scope
    async fn exit_scope(&self, ctx: &TenantContext) -> Result<(), GraphError>;

    /// Create an object and return it with its assigned id
    async fn create_object(
        &self,
        ctx: &TenantContext,
        object: NewObject,
    ) -> Result<GraphObject, GraphError>;

    /// Fold the given properties into an existing object
    async fn merge_object_properties(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        properties: Map<String, Value>,
    ) -> Result<(), GraphError>;

    /// Fetch an object by id; soft-deleted objects are returned with
    /// `deleted_at` set
    async fn get_object(
        &self,
        ctx: &TenantContext,
        id: Uuid,
    ) -> Result<Option<GraphObject>, GraphError>;

    /// Case-insensitive `name` property lookup; returns the most recently
    /// created non-deleted match
    async fn find_object_by_name(
        &self,
        ctx: &TenantContext,
        name: &str,
    ) -> Result<Option<GraphObject>, GraphError>;

    /// Exact `(type, normalized name)` lookup for key-match linking
    async fn find_object_by_key(
        &self,
        ctx: &TenantContext,
        object_type: &str,
        normalized_name: &str,
    ) -> Result<Option<GraphObject>, GraphError>;

    /// Create a relationship; duplicate `(type, source, target)` edges
    /// fail with [`GraphError::DuplicateRelationship`]
    async fn create_relationship(
        &self,
        ctx: &TenantContext,
        relationship: NewRelationship,
    ) -> Result<Uuid, GraphError>;

    /// All tags in use within the project
    async fn list_tags(&self, ctx: &TenantContext) -> Result<Vec<String>, GraphError>;

    /// Write a provenance link from an object to a source chunk
    async fn link_object_to_chunk(
        &self,
        ctx: &TenantContext,
        object_id: Uuid,
        chunk_id: Uuid,
        weight: f64,
        job_id: &JobId,
    ) -> Result<(), GraphError>;

    /// Vector search over existing objects within the project
    async fn search_by_vector(
        &self,
        ctx: &TenantContext,
        vector: &[f32],
        limit: usize,
        max_distance: f64,
    ) -> Result<Vec<VectorMatch>, GraphError>;

    /// Up to `limit` one-hop neighbors of an object
    async fn list_neighbors(
        &self,
        ctx: &TenantContext,
        object_id: Uuid,
        limit: usize,
    ) -> Result<Vec<NeighborSummary>, GraphError>;
}

/// Template pack installation and lookup
#[async_trait]
pub trait TemplatePackService: Send + Sync {
    /// The project's active packs, in installation order
    async fn list_active_packs(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<SchemaPack>, ServiceError>;

    /// Assign a pack to the project. Installing a pack that is already
    /// assigned fails with [`ServiceError::AlreadyExists`].
    async fn install_pack(
        &self,
        project_id: &ProjectId,
        pack_name: &str,
    ) -> Result<(), ServiceError>;
}

/// Key-value settings store consulted before configuration defaults
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Fetch a setting value by key
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError>;
}

/// One entity sent for verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationEntity {
    /// Name used as the correlation id in the response
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub properties: Map<String, Value>,
}

/// Batch verification request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub source_text: String,
    pub entities: Vec<VerificationEntity>,
    pub job_id: JobId,
}

/// Per-entity verification verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityVerification {
    pub entity_name: String,
    pub entity_verified: bool,
    /// Verifier confidence in [0, 1]
    pub overall_confidence: f64,
    /// Verification tier (1 strongest, 3 weakest)
    pub entity_verification_tier: u8,
}

/// Batch verification response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub results: Vec<EntityVerification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub processing_time_ms: u64,
}

/// Post-hoc entity verification
#[async_trait]
pub trait VerifierService: Send + Sync {
    /// Verify a batch of extracted entities against the source text
    async fn verify_batch(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationResponse, ServiceError>;
}

/// Summary attached to a completion notification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionNotification {
    pub created_count: usize,
    /// Created objects per type name
    pub per_type_counts: BTreeMap<String, usize>,
    /// Mean final confidence of persisted candidates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f64>,
    pub review_required_count: usize,
}

/// Summary attached to a failure notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureNotification {
    pub message: String,
    pub retry_count: u32,
    pub will_retry: bool,
}

/// Terminal-transition notification dispatch; only jobs with a subject
/// trigger notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_extraction_completed(
        &self,
        job: &Job,
        summary: &CompletionNotification,
    ) -> Result<(), ServiceError>;

    async fn notify_extraction_failed(
        &self,
        job: &Job,
        failure: &FailureNotification,
    ) -> Result<(), ServiceError>;
}

/// Status of a structured log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Queued,
    Completed,
    Failed,
}

/// One structured per-step log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub job_id: JobId,
    pub step_index: usize,
    /// Operation category, e.g. "llm" or "persistence"
    pub operation_type: String,
    /// Concrete operation, e.g. "extract_entities"
    pub operation_name: String,
    pub status: LogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

/// Sink for structured per-call logs (LLM calls, persistence operations)
#[async_trait]
pub trait StructuredLogger: Send + Sync {
    async fn log_step(&self, entry: StepLog) -> Result<(), ServiceError>;
}
