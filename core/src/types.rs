//! Core data types for the Graphmine extraction pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Reserved property key recording the final (gated) confidence.
pub const EXTRACTION_CONFIDENCE_KEY: &str = "_extraction_confidence";
/// Reserved property key recording the raw LLM confidence.
pub const EXTRACTION_LLM_CONFIDENCE_KEY: &str = "_extraction_llm_confidence";
/// Reserved property key recording the extraction source kind.
pub const EXTRACTION_SOURCE_KEY: &str = "_extraction_source";
/// Reserved property key recording the source identifier (document id etc.).
pub const EXTRACTION_SOURCE_ID_KEY: &str = "_extraction_source_id";
/// Reserved property key recording the job that created the object.
pub const EXTRACTION_JOB_ID_KEY: &str = "_extraction_job_id";
/// Reserved property key accumulating jobs that merged into the object.
pub const EXTRACTION_JOB_IDS_KEY: &str = "_extraction_job_ids";

/// Label applied to objects that landed in the review confidence band.
pub const REQUIRES_REVIEW_LABEL: &str = "requires_review";

/// Prefix marking internal properties that are stripped from LLM context.
pub const INTERNAL_PROPERTY_PREFIX: &str = "_";

/// Unique identifier for an extraction job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random JobId
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a project (the tenant-local scope)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Create a new ProjectId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an organization (the tenant root)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(pub String);

impl OrganizationId {
    /// Create a new OrganizationId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the source text of a job comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A stored document referenced by `source_id`
    Document,
    /// Inline text carried in the job's source metadata
    Manual,
    /// Pushed through an API integration (not processed by this worker)
    Api,
    /// Part of a bulk import (not processed by this worker)
    BulkImport,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Document => write!(f, "document"),
            SourceType::Manual => write!(f, "manual"),
            SourceType::Api => write!(f, "api"),
            SourceType::BulkImport => write!(f, "bulk_import"),
        }
    }
}

/// Lifecycle state of an extraction job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be picked up by a worker
    Queued,
    /// Claimed by a worker and in flight
    Running,
    /// Finished with all outcomes resolved
    Completed,
    /// Finished, but at least one object needs human review
    RequiresReview,
    /// Aborted with an error
    Failed,
}

impl JobStatus {
    /// Terminal states accept no further transitions (except retry re-enqueue)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::RequiresReview | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::RequiresReview => write!(f, "requires_review"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How the LLM is asked for structured output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Tool-call style extraction
    FunctionCalling,
    /// Native structured output with a response schema
    ResponseSchema,
}

impl Default for ExtractionMethod {
    fn default() -> Self {
        ExtractionMethod::FunctionCalling
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::FunctionCalling => write!(f, "function_calling"),
            ExtractionMethod::ResponseSchema => write!(f, "response_schema"),
        }
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "function_calling" => Ok(ExtractionMethod::FunctionCalling),
            "response_schema" | "responseschema" => Ok(ExtractionMethod::ResponseSchema),
            _ => Err(format!("Unknown extraction method: {}", s)),
        }
    }
}

/// Strategy used to link candidate entities to existing graph objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkingStrategy {
    /// Match on `(type, normalized name)` equality
    KeyMatch,
    /// Match on embedding similarity over existing objects
    VectorSimilarity,
    /// Never merge; every candidate creates a new object
    AlwaysNew,
}

impl Default for LinkingStrategy {
    fn default() -> Self {
        LinkingStrategy::KeyMatch
    }
}

impl std::fmt::Display for LinkingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkingStrategy::KeyMatch => write!(f, "key_match"),
            LinkingStrategy::VectorSimilarity => write!(f, "vector_similarity"),
            LinkingStrategy::AlwaysNew => write!(f, "always_new"),
        }
    }
}

impl std::str::FromStr for LinkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "key_match" => Ok(LinkingStrategy::KeyMatch),
            "vector_similarity" => Ok(LinkingStrategy::VectorSimilarity),
            "always_new" => Ok(LinkingStrategy::AlwaysNew),
            _ => Err(format!("Unknown linking strategy: {}", s)),
        }
    }
}

/// Which upstream pipeline produced the candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Raw LLM confidences; the verifier and scorer chain runs
    SinglePass,
    /// Confidences already reflect verification; scorer uses them verbatim
    PreVerified,
}

impl Default for PipelineMode {
    fn default() -> Self {
        PipelineMode::SinglePass
    }
}

/// Per-job overrides for the extraction pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobExtractionConfig {
    /// Restrict extraction to these type names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<String>>,
    /// Confidence below this is rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f64>,
    /// Confidence at or above this (and below auto) needs review
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_threshold: Option<f64>,
    /// Confidence at or above this is auto-accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_threshold: Option<f64>,
    /// Structured-output method override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    /// LLM call timeout override, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Split the document into character-bounded batches of this size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size_chars: Option<usize>,
    /// Similarity threshold override for entity linking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
}

/// One scheduled unit of extraction work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job identifier
    pub id: JobId,
    /// Where the source text comes from
    pub source_type: SourceType,
    /// Identifier of the source (document id for `document` jobs)
    pub source_id: Option<String>,
    /// Free-form metadata; `manual` jobs carry inline text under `"text"`
    pub source_metadata: Value,
    /// Project the job belongs to
    pub project_id: ProjectId,
    /// Requester to notify on terminal transitions; system jobs leave it unset
    pub subject_id: Option<String>,
    /// Current lifecycle state
    pub status: JobStatus,
    /// When the current run started
    pub started_at: Option<DateTime<Utc>>,
    /// Last mutation timestamp; monotonically increasing
    pub updated_at: DateTime<Utc>,
    /// Number of runs attempted so far
    pub attempts: u32,
    /// Per-job pipeline overrides
    pub extraction_config: Option<JobExtractionConfig>,
    /// Terminal output summary
    pub result: Option<JobResult>,
    /// Structured debug trace written on terminal transition
    pub debug_info: Option<JobDebugInfo>,
    /// Human-readable error description
    pub error_message: Option<String>,
}

impl Job {
    /// Create a queued job for the given project and source
    pub fn new(source_type: SourceType, project_id: ProjectId) -> Self {
        Self {
            id: JobId::generate(),
            source_type,
            source_id: None,
            source_metadata: Value::Object(Default::default()),
            project_id,
            subject_id: None,
            status: JobStatus::Queued,
            started_at: None,
            updated_at: Utc::now(),
            attempts: 0,
            extraction_config: None,
            result: None,
            debug_info: None,
            error_message: None,
        }
    }

    /// Set the source identifier
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Set the source metadata
    pub fn with_source_metadata(mut self, metadata: Value) -> Self {
        self.source_metadata = metadata;
        self
    }

    /// Set the requesting subject
    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Set per-job extraction overrides
    pub fn with_extraction_config(mut self, config: JobExtractionConfig) -> Self {
        self.extraction_config = Some(config);
        self
    }

    /// Inline text for `manual` jobs, if present in the metadata
    pub fn inline_text(&self) -> Option<&str> {
        self.source_metadata.get("text").and_then(Value::as_str)
    }
}

/// Project-level extraction defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectExtractionConfig {
    /// Target chunk size in characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    /// Default structured-output method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    /// LLM call timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Similarity threshold for entity linking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_similarity_threshold: Option<f64>,
    /// Confidence band defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_threshold: Option<f64>,
}

/// Chunking configuration carried by a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_size: Option<usize>,
    /// Named chunking strategy understood by the chunker service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Automatic extraction behavior for newly ingested documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoExtractConfig {
    /// Whether documents are queued for extraction on ingest
    pub enabled: bool,
}

/// A tenant-scoped project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier
    pub id: ProjectId,
    /// Owning organization
    pub organization_id: OrganizationId,
    /// Extraction defaults
    pub extraction_config: Option<ProjectExtractionConfig>,
    /// Chunking defaults
    pub chunking_config: Option<ChunkingConfig>,
    /// Auto-extraction behavior
    pub auto_extract_config: Option<AutoExtractConfig>,
}

impl Project {
    /// Create a project with no configuration overrides
    pub fn new(id: ProjectId, organization_id: OrganizationId) -> Self {
        Self {
            id,
            organization_id,
            extraction_config: None,
            chunking_config: None,
            auto_extract_config: None,
        }
    }

    /// Set the extraction defaults
    pub fn with_extraction_config(mut self, config: ProjectExtractionConfig) -> Self {
        self.extraction_config = Some(config);
        self
    }
}

/// A stored source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Document identifier
    pub id: String,
    /// Owning project
    pub project_id: ProjectId,
    /// Full text content
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A persisted chunk of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk identifier
    pub id: Uuid,
    /// Parent document
    pub document_id: String,
    /// 0-based position within the document; unique per document
    pub index: u32,
    /// Chunk text
    pub text: String,
    /// Chunker-provided metadata
    pub metadata: Value,
    /// Fixed-dimension embedding, generated on demand
    pub embedding: Option<Vec<f32>>,
}

/// Chunker output prior to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDraft {
    /// Chunk text
    pub text: String,
    /// Chunker-provided metadata
    pub metadata: Value,
}

/// Verification verdict for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Rejected,
    Uncertain,
}

/// An entity produced by the LLM, prior to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Type name; must appear in the effective object schemas
    #[serde(rename = "type")]
    pub type_name: String,
    /// Entity name; non-empty
    pub name: String,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Extracted properties
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// LLM-reported confidence in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Verification verdict, when a verifier has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<VerificationStatus>,
}

/// One endpoint of a candidate relationship
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointRef {
    /// Entity name as referenced by the LLM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Existing object id, when the LLM referenced one directly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EndpointRef {
    /// Reference by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: None,
        }
    }

    /// Reference by existing object id
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            name: None,
            id: Some(id.into()),
        }
    }
}

/// A relationship produced by the LLM, prior to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRelationship {
    /// Relationship type name
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Source endpoint
    pub source: EndpointRef,
    /// Target endpoint
    pub target: EndpointRef,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// LLM-reported confidence in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Verification verdict, when a verifier has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<VerificationStatus>,
}

/// Persistence state of a graph object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    /// Visible and embedded by downstream systems
    Accepted,
    /// Held back from downstream embedding until promoted
    Draft,
}

/// A persisted entity in the property graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphObject {
    /// System identifier
    pub id: Uuid,
    /// Owning project
    pub project_id: ProjectId,
    /// Owning organization
    pub organization_id: OrganizationId,
    /// Type name
    #[serde(rename = "type")]
    pub object_type: String,
    /// Persistence state
    pub status: ObjectStatus,
    /// Property map, including reserved `_extraction_*` keys
    pub properties: Map<String, Value>,
    /// Labels such as `requires_review`
    pub labels: BTreeSet<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp
    pub deleted_at: Option<DateTime<Utc>>,
}

impl GraphObject {
    /// The object's `name` property, if set
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }

    /// The object's `description` property, if set
    pub fn description(&self) -> Option<&str> {
        self.properties.get("description").and_then(Value::as_str)
    }

    /// Whether the object has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Payload for creating a graph object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObject {
    /// Type name
    #[serde(rename = "type")]
    pub object_type: String,
    /// Initial properties
    pub properties: Map<String, Value>,
    /// Initial labels
    pub labels: BTreeSet<String>,
    /// Initial persistence state
    pub status: ObjectStatus,
}

/// A directed typed edge between two objects in the same project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    /// System identifier
    pub id: Uuid,
    /// Owning project
    pub project_id: ProjectId,
    /// Owning organization
    pub organization_id: OrganizationId,
    /// Relationship type name
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Source object id
    pub source_id: Uuid,
    /// Target object id
    pub target_id: Uuid,
    /// Property map
    pub properties: Map<String, Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelationship {
    /// Relationship type name
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Source object id
    pub source_id: Uuid,
    /// Target object id
    pub target_id: Uuid,
    /// Property map
    pub properties: Map<String, Value>,
}

/// Provenance edge from an object to a source chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectChunkLink {
    /// Linked object
    pub object_id: Uuid,
    /// Source chunk
    pub chunk_id: Uuid,
    /// Link weight in [0, 1]
    pub weight: f64,
    /// Job that wrote the link
    pub job_id: JobId,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// An existing entity surfaced to the LLM as deduplication context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntity {
    /// Object id
    pub id: Uuid,
    /// Entity name
    pub name: String,
    /// Type name
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Description, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Non-internal properties
    pub properties: Map<String, Value>,
    /// Up to a bounded number of one-hop neighbors
    pub neighbors: Vec<NeighborSummary>,
}

/// Direction of a neighbor edge relative to the context entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
}

/// A one-hop neighbor of a context entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborSummary {
    /// Relationship type name
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Edge direction relative to the context entity
    pub direction: EdgeDirection,
    /// Name of the related entity
    pub related_name: String,
    /// Type of the related entity
    pub related_type: String,
}

/// Token consumption reported by the LLM provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Sum two usage records
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Where a resolved threshold value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    JobConfig,
    ProjectConfig,
    ServerDefault,
}

/// Per-threshold source audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSources {
    pub min: ThresholdSource,
    pub review: ThresholdSource,
    pub auto: ThresholdSource,
}

/// Human-readable explanation of the configured bands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdInterpretation {
    pub rejected: String,
    pub draft: String,
    pub accepted: String,
}

/// The effective thresholds for a job, with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAudit {
    pub min: f64,
    pub review: f64,
    pub auto: f64,
    pub sources: ThresholdSources,
    pub interpretation: ThresholdInterpretation,
}

impl ThresholdAudit {
    /// Build the audit record with the standard band interpretation
    pub fn new(min: f64, review: f64, auto: f64, sources: ThresholdSources) -> Self {
        Self {
            min,
            review,
            auto,
            sources,
            interpretation: ThresholdInterpretation {
                rejected: format!("confidence < {}", min),
                draft: format!("{} <= confidence < {}", min, auto),
                accepted: format!("confidence >= {}", auto),
            },
        }
    }
}

/// Outcome counts over a job's candidate set
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EntityOutcomes {
    pub created: usize,
    pub merged: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Terminal output summary of a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    /// Ids of every object created by this job
    pub created_objects: Vec<Uuid>,
    /// Type names the LLM proposed outside the allowed set
    pub discovered_types: Vec<String>,
    /// Candidates that were created or merged
    pub successful_items: usize,
    /// Total candidates returned by the LLM
    pub total_items: usize,
    /// Candidates rejected below the minimum threshold
    pub rejected_items: usize,
    /// Objects that carry the review label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_required_count: Option<usize>,
}

/// Structured debug trace written on terminal transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDebugInfo {
    /// Ordered timeline of pipeline events
    pub timeline: Vec<crate::timeline::TimelineEvent>,
    /// LLM provider name
    pub provider: String,
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub organization_id: OrganizationId,
    pub job_started_at: DateTime<Utc>,
    pub job_completed_at: DateTime<Utc>,
    pub job_duration_ms: u64,
    /// Total candidates returned by the LLM
    pub total_entities: usize,
    /// Distinct type names that were processed
    pub types_processed: Vec<String>,
    /// Aggregate token usage, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Outcome counts over the candidate set
    pub entity_outcomes: EntityOutcomes,
    pub created_object_count: usize,
    pub rejected_count: usize,
    pub review_required_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Effective thresholds and their provenance
    pub confidence_thresholds: ThresholdAudit,
    /// Raw per-call response envelope from the orchestrator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

/// Lowercase and trim an entity name for batch-local map keys
pub fn normalize_entity_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Drop a leading English article from an already-normalized name
pub fn strip_leading_article(normalized: &str) -> Option<String> {
    for article in ["the ", "a ", "an "] {
        if let Some(rest) = normalized.strip_prefix(article) {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entity_name() {
        assert_eq!(normalize_entity_name("  Ada Lovelace "), "ada lovelace");
        assert_eq!(normalize_entity_name("MATHEMATICS"), "mathematics");
    }

    #[test]
    fn test_strip_leading_article() {
        assert_eq!(
            strip_leading_article("the acme corporation").as_deref(),
            Some("acme corporation")
        );
        assert_eq!(strip_leading_article("an engineer").as_deref(), Some("engineer"));
        assert_eq!(strip_leading_article("ada lovelace"), None);
        // A bare article never maps to an empty key
        assert_eq!(strip_leading_article("the "), None);
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::RequiresReview.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_inline_text() {
        let job = Job::new(SourceType::Manual, ProjectId::new("p1"))
            .with_source_metadata(serde_json::json!({"text": "inline body"}));
        assert_eq!(job.inline_text(), Some("inline body"));
    }
}
