//! End-to-end extraction pipeline scenarios over the in-memory adapters

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use graphmine_adapter_in_memory::{
    InMemoryChunker, InMemoryDocuments, InMemoryEmbeddings, InMemoryGraph, InMemoryJobStore,
    InMemoryProjects, InMemorySettings, InMemoryTemplatePacks, RecordedNotification,
    RecordingLogger, RecordingNotifier, StaticVerifier,
};
use graphmine_core::errors::LlmError;
use graphmine_core::schema::{ObjectTypeSchema, RelationshipTypeSchema, SchemaPack};
use graphmine_core::tenant::TenantContext;
use graphmine_core::traits::{
    ExtractionOptions, GraphService, JobStore, LlmProvider, ProviderResponse,
};
use graphmine_core::types::{
    CandidateEntity, CandidateRelationship, EndpointRef, Job, JobStatus, NewObject, ObjectStatus,
    OrganizationId, PipelineMode, Project, ProjectId, SourceType, EXTRACTION_JOB_IDS_KEY,
    EXTRACTION_JOB_ID_KEY, REQUIRES_REVIEW_LABEL,
};
use graphmine_worker::coordinator::{JobCoordinator, WorkerServices};
use graphmine_worker::WorkerConfig;
use serde_json::{json, Map};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

const ORG: &str = "org-1";
const PROJECT: &str = "proj-1";
const DOCUMENT: &str = "doc-1";
const DOCUMENT_TEXT: &str = "Ada Lovelace was a mathematician.";

/// Provider returning preprogrammed responses in order; further calls
/// return an empty extraction
struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, LlmError>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<ProviderResponse, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn extract_entities(
        &self,
        _document: &str,
        _base_prompt: &str,
        _options: &ExtractionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(ProviderResponse::default()))
    }
}

struct Harness {
    store: Arc<InMemoryJobStore>,
    graph: Arc<InMemoryGraph>,
    notifier: Arc<RecordingNotifier>,
    logger: Arc<RecordingLogger>,
    coordinator: JobCoordinator,
}

impl Harness {
    fn tenant() -> TenantContext {
        TenantContext::new(OrganizationId::new(ORG), ProjectId::new(PROJECT))
    }

    async fn finished_job(&self, job_id: &graphmine_core::types::JobId) -> Job {
        self.store.get_job(job_id).await.expect("job row")
    }
}

fn base_config() -> WorkerConfig {
    WorkerConfig {
        // Scenario confidences are pre-verified values used verbatim
        pipeline_mode: PipelineMode::PreVerified,
        embeddings_enabled: false,
        verification_enabled: false,
        rate_limit_tokens_per_minute: 200_000,
        rate_limit_wait_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn starter_pack() -> SchemaPack {
    SchemaPack::new("starter", "1.0.0")
        .with_object_schema(
            "Person",
            ObjectTypeSchema {
                description: "A person".to_string(),
                properties: json!({"role": {"type": "string"}}),
                required: vec!["name".to_string()],
                examples: vec![],
            },
        )
        .with_object_schema(
            "Field",
            ObjectTypeSchema {
                description: "A field of study".to_string(),
                ..Default::default()
            },
        )
        .with_object_schema(
            "Machine",
            ObjectTypeSchema {
                description: "A machine or invention".to_string(),
                ..Default::default()
            },
        )
        .with_relationship_schema(
            "WORKED_IN",
            RelationshipTypeSchema {
                description: "Worked or practiced in a field".to_string(),
                source_types: vec!["Person".to_string()],
                target_types: vec!["Field".to_string()],
            },
        )
        .with_relationship_schema(
            "DESIGNED",
            RelationshipTypeSchema {
                description: "Designed a machine".to_string(),
                source_types: vec!["Person".to_string()],
                target_types: vec!["Machine".to_string()],
            },
        )
}

async fn harness(
    config: WorkerConfig,
    responses: Vec<Result<ProviderResponse, LlmError>>,
) -> Harness {
    let store = Arc::new(InMemoryJobStore::new());
    let graph = Arc::new(InMemoryGraph::new());
    let documents = Arc::new(InMemoryDocuments::new());
    let projects = Arc::new(InMemoryProjects::new());
    let packs = Arc::new(InMemoryTemplatePacks::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let logger = Arc::new(RecordingLogger::new());

    projects
        .insert(Project::new(
            ProjectId::new(PROJECT),
            OrganizationId::new(ORG),
        ))
        .await;
    documents
        .insert_text(DOCUMENT, ProjectId::new(PROJECT), DOCUMENT_TEXT)
        .await;
    packs.register(starter_pack()).await;
    packs.assign(&ProjectId::new(PROJECT), "starter").await;

    let services = WorkerServices {
        job_store: store.clone(),
        projects,
        graph: graph.clone(),
        documents,
        chunker: Arc::new(InMemoryChunker::new()),
        embeddings: Arc::new(InMemoryEmbeddings::new()),
        template_packs: packs,
        settings: Arc::new(InMemorySettings::new()),
        verifier: Some(Arc::new(StaticVerifier::new())),
        notifier: notifier.clone(),
        structured_logger: logger.clone(),
        provider: Arc::new(ScriptedProvider::new(responses)),
    };
    let coordinator = JobCoordinator::new(config, services);

    Harness {
        store,
        graph,
        notifier,
        logger,
        coordinator,
    }
}

fn entity(type_name: &str, name: &str, confidence: f64) -> CandidateEntity {
    let mut properties = Map::new();
    if type_name == "Person" {
        properties.insert("role".to_string(), json!("mathematician"));
    }
    CandidateEntity {
        type_name: type_name.to_string(),
        name: name.to_string(),
        description: format!("{} from the source text", name),
        properties,
        confidence: Some(confidence),
        verification_status: None,
    }
}

fn relationship(rel_type: &str, source: &str, target: &str) -> CandidateRelationship {
    CandidateRelationship {
        relationship_type: rel_type.to_string(),
        source: EndpointRef::by_name(source),
        target: EndpointRef::by_name(target),
        description: format!("{} {} {}", source, rel_type, target),
        confidence: Some(0.85),
        verification_status: None,
    }
}

fn document_job() -> Job {
    Job::new(SourceType::Document, ProjectId::new(PROJECT)).with_source_id(DOCUMENT)
}

fn response(
    entities: Vec<CandidateEntity>,
    relationships: Vec<CandidateRelationship>,
) -> Result<ProviderResponse, LlmError> {
    Ok(ProviderResponse {
        entities,
        relationships,
        discovered_types: vec![],
        usage: None,
    })
}

#[tokio::test]
async fn test_happy_path_single_entity_high_confidence() {
    let harness = harness(
        base_config(),
        vec![response(vec![entity("Person", "Ada Lovelace", 0.92)], vec![])],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;

    assert_eq!(harness.coordinator.process_batch().await, 1);

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    let result = finished.result.expect("result");
    assert_eq!(result.total_items, 1);
    assert_eq!(result.successful_items, 1);
    assert_eq!(result.rejected_items, 0);
    assert_eq!(result.created_objects.len(), 1);

    let object = harness
        .graph
        .raw_object(result.created_objects[0])
        .await
        .expect("created object");
    assert_eq!(object.status, ObjectStatus::Accepted);
    assert!(!object.labels.contains(REQUIRES_REVIEW_LABEL));
    assert_eq!(object.properties[EXTRACTION_JOB_ID_KEY], json!(job_id));

    // Provenance: one created object linked to the single source chunk
    let links = harness.graph.chunk_links().await;
    assert_eq!(links.len(), 1);
    assert!((links[0].weight - 0.8).abs() < 1e-9);
    assert_eq!(links[0].job_id, job_id);
}

#[tokio::test]
async fn test_low_confidence_candidate_is_rejected() {
    let harness = harness(
        base_config(),
        vec![response(vec![entity("Person", "Ada Lovelace", 0.30)], vec![])],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    let result = finished.result.expect("result");
    assert_eq!(result.rejected_items, 1);
    assert!(result.created_objects.is_empty());

    let debug_info = finished.debug_info.expect("debug info");
    let rejected_event = debug_info
        .timeline
        .iter()
        .find(|event| event.step == "entity_rejected")
        .expect("rejection event");
    assert_eq!(
        rejected_event.metadata.as_ref().unwrap()["reason"],
        json!("low_confidence")
    );
}

#[tokio::test]
async fn test_review_band_labels_and_terminal_status() {
    let harness = harness(
        base_config(),
        vec![response(vec![entity("Person", "Ada Lovelace", 0.65)], vec![])],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::RequiresReview);
    let result = finished.result.expect("result");
    assert_eq!(result.review_required_count, Some(1));

    let object = harness
        .graph
        .raw_object(result.created_objects[0])
        .await
        .expect("created object");
    assert!(object.labels.contains(REQUIRES_REVIEW_LABEL));
    // Below the auto threshold the object is held back as a draft
    assert_eq!(object.status, ObjectStatus::Draft);
}

#[tokio::test]
async fn test_band_boundary_at_min_is_not_rejected() {
    let harness = harness(
        base_config(),
        vec![response(vec![entity("Person", "Ada Lovelace", 0.4)], vec![])],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    let result = finished.result.expect("result");
    assert_eq!(result.rejected_items, 0);
    assert_eq!(result.created_objects.len(), 1);
}

#[tokio::test]
async fn test_relationship_resolution_across_batch() {
    let harness = harness(
        base_config(),
        vec![response(
            vec![
                entity("Person", "Ada", 0.9),
                entity("Field", "Mathematics", 0.9),
            ],
            vec![relationship("WORKED_IN", "Ada", "Mathematics")],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    let result = finished.result.expect("result");
    assert_eq!(result.created_objects.len(), 2);

    let relationships = harness.graph.relationships().await;
    assert_eq!(relationships.len(), 1);
    let edge = &relationships[0];
    assert_eq!(edge.relationship_type, "WORKED_IN");

    let source = harness.graph.raw_object(edge.source_id).await.unwrap();
    let target = harness.graph.raw_object(edge.target_id).await.unwrap();
    assert_eq!(source.name(), Some("Ada"));
    assert_eq!(target.name(), Some("Mathematics"));
}

#[tokio::test]
async fn test_batch_map_resolves_article_stripped_names() {
    let harness = harness(
        base_config(),
        vec![response(
            vec![
                entity("Person", "Charles Babbage", 0.9),
                entity("Machine", "The Analytical Engine", 0.9),
            ],
            // The endpoint reference drops the leading article
            vec![relationship("DESIGNED", "Charles Babbage", "Analytical Engine")],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(harness.graph.relationships().await.len(), 1);
}

#[tokio::test]
async fn test_unresolved_endpoint_skips_relationship() {
    let harness = harness(
        base_config(),
        vec![response(
            vec![entity("Person", "Ada", 0.9)],
            vec![relationship("WORKED_IN", "Ada", "Astronomy")],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(harness.graph.relationships().await.is_empty());

    let debug_info = finished.debug_info.expect("debug info");
    let step = debug_info
        .timeline
        .iter()
        .find(|event| event.step == "persist_relationships")
        .expect("relationship step");
    let details = &step.metadata.as_ref().unwrap()["details"];
    assert_eq!(details[0]["reason"], json!("target_not_resolved"));
}

#[tokio::test]
async fn test_endpoint_type_mismatch_skips_relationship() {
    let harness = harness(
        base_config(),
        vec![response(
            vec![
                entity("Person", "Ada", 0.9),
                entity("Machine", "The Analytical Engine", 0.9),
            ],
            // WORKED_IN requires a Field target
            vec![relationship("WORKED_IN", "Ada", "The Analytical Engine")],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    let debug_info = finished.debug_info.expect("debug info");
    let step = debug_info
        .timeline
        .iter()
        .find(|event| event.step == "persist_relationships")
        .expect("relationship step");
    let details = &step.metadata.as_ref().unwrap()["details"];
    assert_eq!(details[0]["reason"], json!("type_mismatch"));
    assert!(harness.graph.relationships().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_relationship_is_swallowed_as_skipped() {
    let harness = harness(
        base_config(),
        vec![response(
            vec![
                entity("Person", "Ada", 0.9),
                entity("Field", "Mathematics", 0.9),
            ],
            vec![
                relationship("WORKED_IN", "Ada", "Mathematics"),
                relationship("WORKED_IN", "Ada", "Mathematics"),
            ],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(harness.graph.relationships().await.len(), 1);

    let debug_info = finished.debug_info.expect("debug info");
    let step = debug_info
        .timeline
        .iter()
        .find(|event| event.step == "persist_relationships")
        .expect("relationship step");
    let metadata = step.metadata.as_ref().unwrap();
    assert_eq!(metadata["created"], json!(1));
    assert_eq!(metadata["skipped"], json!(1));
}

#[tokio::test]
async fn test_key_match_merges_into_existing_object() {
    let harness = harness(
        base_config(),
        vec![response(vec![entity("Person", "Ada Lovelace", 0.9)], vec![])],
    )
    .await;

    // Seed an existing Ada with no role property so the candidate merges
    let tenant = Harness::tenant();
    harness.graph.enter_scope(&tenant).await.unwrap();
    let mut properties = Map::new();
    properties.insert("name".to_string(), json!("Ada Lovelace"));
    let existing = harness
        .graph
        .create_object(
            &tenant,
            NewObject {
                object_type: "Person".to_string(),
                properties,
                labels: Default::default(),
                status: ObjectStatus::Accepted,
            },
        )
        .await
        .unwrap();
    harness.graph.exit_scope(&tenant).await.unwrap();

    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    let result = finished.result.expect("result");
    // Merged, not created
    assert!(result.created_objects.is_empty());
    assert_eq!(result.successful_items, 1);
    let debug_info = finished.debug_info.expect("debug info");
    assert_eq!(debug_info.entity_outcomes.merged, 1);

    let merged = harness.graph.raw_object(existing.id).await.unwrap();
    assert_eq!(merged.properties["role"], json!("mathematician"));
    let job_ids = merged.properties[EXTRACTION_JOB_IDS_KEY]
        .as_array()
        .expect("merge audit list");
    assert!(job_ids.contains(&json!(job_id)));
}

#[tokio::test]
async fn test_constraint_violation_is_counted_and_logged_with_code() {
    // A candidate property named "name" overrides the writer's name
    // string; the store rejects the non-string value with a coded
    // constraint violation
    let mut bad = entity("Person", "Ada Lovelace", 0.92);
    bad.properties.insert("name".to_string(), json!(42));
    let harness = harness(
        base_config(),
        vec![response(
            vec![bad, entity("Field", "Mathematics", 0.92)],
            vec![],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    // The per-entity failure never aborts the job
    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    let result = finished.result.expect("result");
    assert_eq!(result.total_items, 2);
    assert_eq!(result.created_objects.len(), 1);

    let debug_info = finished.debug_info.expect("debug info");
    assert_eq!(debug_info.entity_outcomes.failed, 1);
    assert!(debug_info
        .timeline
        .iter()
        .any(|event| event.step == "entity_persist_failed"));

    // The structured log records the validation code and the offending
    // properties
    let entries = harness.logger.entries().await;
    let failure = entries
        .iter()
        .find(|entry| entry.operation_type == "persistence")
        .expect("persistence log entry");
    assert_eq!(failure.operation_name, "create_object");
    assert_eq!(
        failure.error_details.as_ref().unwrap()["code"],
        json!("invalid_name")
    );
    assert_eq!(failure.input_data.as_ref().unwrap()["name"], json!(42));
}

#[tokio::test]
async fn test_orphan_recovery_then_reprocessing() {
    let harness = harness(
        base_config(),
        vec![response(vec![entity("Person", "Ada Lovelace", 0.92)], vec![])],
    )
    .await;

    let mut job = document_job();
    job.status = JobStatus::Running;
    job.started_at = Some(Utc::now() - ChronoDuration::minutes(10));
    job.updated_at = Utc::now() - ChronoDuration::minutes(10);
    let job_id = job.id.clone();
    harness.store.inject(job).await;

    // Nothing is queued before recovery, so a tick is a no-op
    assert_eq!(harness.coordinator.process_batch().await, 0);

    assert_eq!(harness.store.recover_orphans().await.unwrap(), 1);
    let recovered = harness.store.get_job(&job_id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Queued);
    assert!(recovered.started_at.is_none());

    assert_eq!(harness.coordinator.process_batch().await, 1);
    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_rate_limit_starvation_fails_with_retry_hint() {
    let config = WorkerConfig {
        rate_limit_tokens_per_minute: 10,
        rate_limit_wait_timeout_ms: 100,
        ..base_config()
    };
    let harness = harness(config, vec![]).await;

    let job = document_job().with_subject("user-1");
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error_message.unwrap().contains("Rate limited"));

    let debug_info = finished.debug_info.expect("debug info");
    assert!(debug_info
        .timeline
        .iter()
        .any(|event| event.step == "rate_limit"));

    let notifications = harness.notifier.recorded().await;
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        RecordedNotification::Failed { failure, .. } => {
            assert!(failure.will_retry);
            assert_eq!(failure.retry_count, 1);
        }
        other => panic!("expected failure notification, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_extraction_completes_without_progress() {
    let harness = harness(base_config(), vec![response(vec![], vec![])]).await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    let result = finished.result.expect("result");
    assert_eq!(result.total_items, 0);
    assert!(result.created_objects.is_empty());
    // No progress updates were attempted
    assert!(finished.source_metadata.get("progress_total").is_none());
}

#[tokio::test]
async fn test_off_schema_entities_become_discovered_types() {
    let harness = harness(
        base_config(),
        vec![response(
            vec![
                entity("Person", "Ada Lovelace", 0.9),
                entity("Comet", "Halley", 0.9),
            ],
            vec![],
        )],
    )
    .await;
    let job = document_job();
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    let result = finished.result.expect("result");
    assert_eq!(result.total_items, 1);
    assert_eq!(result.created_objects.len(), 1);
    assert_eq!(result.discovered_types, vec!["Comet".to_string()]);
}

#[tokio::test]
async fn test_all_llm_calls_failed_marks_job_failed() {
    let harness = harness(
        base_config(),
        vec![Err(LlmError::ApiError("boom".to_string()))],
    )
    .await;
    let job = document_job().with_subject("user-1");
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error_message.unwrap().contains("boom"));

    let details = harness.store.failure_details(&job_id).await.unwrap();
    assert_eq!(details["kind"], json!("llm"));
    assert_eq!(details["will_retry"], json!(true));
}

#[tokio::test]
async fn test_completion_notification_only_with_subject() {
    let harness = harness(
        base_config(),
        vec![
            response(vec![entity("Person", "Ada Lovelace", 0.92)], vec![]),
            response(vec![entity("Person", "Charles Babbage", 0.92)], vec![]),
        ],
    )
    .await;

    // System job without a subject is silent
    let silent_job = document_job();
    harness.store.enqueue(silent_job).await;
    harness.coordinator.process_batch().await;
    assert!(harness.notifier.recorded().await.is_empty());

    // Subject-bearing job notifies with per-type counts
    let job = document_job().with_subject("user-1");
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let notifications = harness.notifier.recorded().await;
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        RecordedNotification::Completed { summary, .. } => {
            assert_eq!(summary.created_count, 1);
            assert_eq!(summary.per_type_counts.get("Person"), Some(&1));
            assert!(summary.average_confidence.unwrap() > 0.9);
        }
        other => panic!("expected completion notification, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_project_fails_with_tenant_error() {
    let harness = harness(base_config(), vec![]).await;
    let job = Job::new(SourceType::Document, ProjectId::new("unknown-project"))
        .with_source_id(DOCUMENT);
    let job_id = job.id.clone();
    harness.store.enqueue(job).await;
    harness.coordinator.process_batch().await;

    let finished = harness.finished_job(&job_id).await;
    assert_eq!(finished.status, JobStatus::Failed);
    let details = harness.store.failure_details(&job_id).await.unwrap();
    assert_eq!(details["kind"], json!("tenant"));
    assert_eq!(details["will_retry"], json!(false));
}
