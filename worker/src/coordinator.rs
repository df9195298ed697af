//! Job coordination: the polling worker and the per-job pipeline
//!
//! The worker ticks on a configured interval, dequeues a batch of jobs, and
//! processes them sequentially. Each job runs the full pipeline (tenant
//! scope, document preparation, schema resolution, token budget, context
//! loading, LLM extraction, optional verification, then scoring, gating,
//! linking, and persistence per candidate) and ends in exactly one terminal
//! transition with a structured timeline in its debug info.

use crate::config::WorkerConfig;
use crate::context_loader::{ContextLoader, DEFAULT_CONTEXT_LIMIT};
use crate::document::{DocumentPreparer, PreparedDocument};
use crate::linker::EntityLinker;
use crate::orchestrator::{ExtractionResult, LlmOrchestrator, PromptInputs};
use crate::rate_limit::TokenBudgetLimiter;
use crate::resolver::{BatchNameMap, RelationshipResolver, RelationshipSkip};
use crate::schema_resolver::{ResolvedSchema, SchemaPackResolver};
use crate::verify::VerificationStage;
use crate::writer::{EntityPersistOutcome, EntityWrite, GraphWriter, RelationshipPersistOutcome};
use graphmine_core::errors::{CoreError, GraphError, JobError};
use graphmine_core::quality::{
    apply_quality_thresholds, resolve_thresholds, score_candidate, ConfidenceThresholds,
    QualityBand,
};
use graphmine_core::tenant::{TenantContext, TenantScope};
use graphmine_core::timeline::{StepStatus, Timeline};
use graphmine_core::traits::{
    CallContext, ChunkerService, CompletionNotification, DocumentsService, EmbeddingsService,
    EntityVerification, ExtractionOptions, FailureNotification, GraphService, JobStore,
    LlmProvider, LogStatus, Notifier, ProjectsService, SettingsStore, StepLog, StructuredLogger,
    TemplatePackService, VerifierService,
};
use graphmine_core::types::{
    normalize_entity_name, CandidateEntity, CandidateRelationship, EntityOutcomes, Job,
    JobDebugInfo, JobResult, JobStatus, OrganizationId, Project, ThresholdAudit, ThresholdSource,
    ThresholdSources, TokenUsage, VerificationStatus,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Every external collaborator the coordinator composes
pub struct WorkerServices {
    pub job_store: Arc<dyn JobStore>,
    pub projects: Arc<dyn ProjectsService>,
    pub graph: Arc<dyn GraphService>,
    pub documents: Arc<dyn DocumentsService>,
    pub chunker: Arc<dyn ChunkerService>,
    pub embeddings: Arc<dyn EmbeddingsService>,
    pub template_packs: Arc<dyn TemplatePackService>,
    pub settings: Arc<dyn SettingsStore>,
    pub verifier: Option<Arc<dyn VerifierService>>,
    pub notifier: Arc<dyn Notifier>,
    pub structured_logger: Arc<dyn StructuredLogger>,
    pub provider: Arc<dyn LlmProvider>,
}

/// Process-local worker counters
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Mutable accumulation across a job's pipeline run; read by finalization
/// whether the run succeeded or failed partway
#[derive(Default)]
struct RunState {
    organization_id: Option<OrganizationId>,
    thresholds: Option<ThresholdAudit>,
    total_entities: usize,
    outcomes: EntityOutcomes,
    created_objects: Vec<Uuid>,
    review_required: Vec<Uuid>,
    discovered_types: Vec<String>,
    types_processed: BTreeSet<String>,
    per_type_counts: BTreeMap<String, usize>,
    usage: Option<TokenUsage>,
    raw_response: Option<Value>,
    confidence_sum: f64,
    persisted_count: usize,
}

/// Per-job pipeline driver
pub struct JobCoordinator {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    projects: Arc<dyn ProjectsService>,
    graph: Arc<dyn GraphService>,
    notifier: Arc<dyn Notifier>,
    structured_logger: Arc<dyn StructuredLogger>,
    preparer: DocumentPreparer,
    schema_resolver: SchemaPackResolver,
    context_loader: ContextLoader,
    orchestrator: LlmOrchestrator,
    verification: VerificationStage,
    linker: EntityLinker,
    resolver: RelationshipResolver,
    writer: GraphWriter,
    rate_limiter: TokenBudgetLimiter,
    counters: Counters,
}

impl JobCoordinator {
    pub fn new(config: WorkerConfig, services: WorkerServices) -> Self {
        let preparer = DocumentPreparer::new(
            services.documents.clone(),
            services.chunker.clone(),
            services.embeddings.clone(),
            config.embeddings_enabled,
        );
        let schema_resolver =
            SchemaPackResolver::new(services.template_packs.clone(), services.settings.clone());
        let context_loader = ContextLoader::new(services.graph.clone());
        let orchestrator =
            LlmOrchestrator::new(services.provider.clone(), services.structured_logger.clone());
        let verification =
            VerificationStage::new(services.verifier.clone(), config.verification_enabled);
        let linker = EntityLinker::new(services.graph.clone(), services.embeddings.clone());
        let resolver = RelationshipResolver::new(services.graph.clone());
        let writer = GraphWriter::new(services.graph.clone());
        let rate_limiter = TokenBudgetLimiter::new(config.rate_limit_tokens_per_minute);

        Self {
            store: services.job_store,
            projects: services.projects,
            graph: services.graph,
            notifier: services.notifier,
            structured_logger: services.structured_logger,
            preparer,
            schema_resolver,
            context_loader,
            orchestrator,
            verification,
            linker,
            resolver,
            writer,
            rate_limiter,
            counters: Counters::default(),
            config,
        }
    }

    /// Snapshot of the process-local counters
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Dequeue up to the configured batch size and process each job
    /// sequentially. Returns the number of jobs processed.
    pub async fn process_batch(&self) -> usize {
        let span = info_span!("process_batch");
        async {
            let jobs = match self.store.dequeue_batch(self.config.batch_size).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("Dequeue failed: {}", e);
                    return 0;
                }
            };
            if jobs.is_empty() {
                return 0;
            }
            info!(count = jobs.len(), "Dequeued extraction jobs");
            let count = jobs.len();
            for job in jobs {
                self.process_job(job).await;
            }
            count
        }
        .instrument(span)
        .await
    }

    /// Run one job to a terminal transition
    pub async fn process_job(&self, job: Job) {
        let span = info_span!("process_job", job_id = %job.id);
        async {
            let started_at = Utc::now();
            let started = std::time::Instant::now();
            let mut timeline = Timeline::new();
            let mut state = RunState::default();
            timeline.event(
                StepStatus::Info,
                "job_started",
                Some(format!("attempt {}", job.attempts)),
            );

            self.counters.processed.fetch_add(1, Ordering::Relaxed);
            let outcome = self.run_pipeline(&job, &mut state, &mut timeline).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    timeline.event(StepStatus::Success, "job_completed", None);
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    self.finalize_success(&job, state, timeline, started_at, duration_ms)
                        .await;
                }
                Err(err) => {
                    timeline.event(StepStatus::Error, "job_failed", Some(err.to_string()));
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.finalize_failure(&job, err, state, timeline, started_at, duration_ms)
                        .await;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        state: &mut RunState,
        timeline: &mut Timeline,
    ) -> Result<(), JobError> {
        // Tenant resolution comes first; without it nothing may touch data
        timeline.begin_step("resolve_project", None);
        let project = match self.projects.get_project(&job.project_id).await {
            Ok(Some(project)) => {
                timeline.end_step(StepStatus::Success, None, None);
                project
            }
            Ok(None) => {
                timeline.end_step(
                    StepStatus::Error,
                    Some(format!("project not found: {}", job.project_id)),
                    None,
                );
                return Err(JobError::Tenant(format!(
                    "Project not found: {}",
                    job.project_id
                )));
            }
            Err(e) => {
                timeline.end_step(StepStatus::Error, Some(e.to_string()), None);
                return Err(JobError::Tenant(format!("Project lookup failed: {}", e)));
            }
        };
        state.organization_id = Some(project.organization_id.clone());

        let (thresholds, sources) = resolve_thresholds(
            job.extraction_config.as_ref(),
            project.extraction_config.as_ref(),
            self.server_default_thresholds(),
        );
        let audit = ThresholdAudit::new(thresholds.min, thresholds.review, thresholds.auto, sources);
        timeline.event_with_metadata(
            StepStatus::Info,
            "thresholds_resolved",
            None,
            json!(audit),
        );
        state.thresholds = Some(audit);

        let ctx = TenantContext::new(project.organization_id.clone(), job.project_id.clone());
        let scope = TenantScope::enter(self.graph.clone(), ctx.clone())
            .await
            .map_err(JobError::Graph)?;
        let result = self
            .run_scoped(job, &project, &ctx, thresholds, state, timeline)
            .await;
        if let Err(e) = scope.release().await {
            warn!("Tenant scope release failed: {}", e);
        }
        result
    }

    async fn run_scoped(
        &self,
        job: &Job,
        project: &Project,
        ctx: &TenantContext,
        thresholds: ConfidenceThresholds,
        state: &mut RunState,
        timeline: &mut Timeline,
    ) -> Result<(), JobError> {
        // Source preparation
        timeline.begin_step("prepare_document", Some(json!({"source_type": job.source_type})));
        let prepared = match self.preparer.prepare(job, project).await {
            Ok(prepared) => {
                timeline.end_step(
                    StepStatus::Success,
                    None,
                    Some(json!({
                        "chunks": prepared.chunk_ids.len().max(prepared.chunk_texts.len()),
                        "chunks_created": prepared.chunks_created,
                        "embeddings_generated": prepared.embeddings_generated,
                    })),
                );
                prepared
            }
            Err(e) => {
                timeline.end_step(StepStatus::Error, Some(e.to_string()), None);
                return Err(e);
            }
        };

        // Effective schema
        timeline.begin_step("resolve_schema", None);
        let resolved = match self
            .schema_resolver
            .resolve(
                &job.project_id,
                self.config.default_template_pack.as_deref(),
                &self.config.base_prompt,
            )
            .await
        {
            Ok(resolved) => {
                timeline.end_step(
                    StepStatus::Success,
                    None,
                    Some(json!({
                        "packs": resolved.pack_names,
                        "auto_installed": resolved.auto_installed,
                        "object_types": resolved.schema.object_schemas.len(),
                    })),
                );
                resolved
            }
            Err(e) => {
                timeline.end_step(StepStatus::Error, Some(e.to_string()), None);
                return Err(e);
            }
        };
        if !resolved.schema.has_object_schemas() {
            timeline.event(
                StepStatus::Error,
                "no_schemas",
                Some("no object schemas available after auto-install attempt".to_string()),
            );
            return Err(JobError::Config("no-schemas".to_string()));
        }

        let allowed_types: Vec<String> = job
            .extraction_config
            .as_ref()
            .and_then(|c| c.allowed_types.clone())
            .unwrap_or_else(|| resolved.schema.object_type_names());

        // Context and tags are best-effort; extraction runs without them
        let similarity_threshold = self.similarity_threshold(job, project);
        timeline.begin_step("load_context", None);
        let existing_entities = self
            .context_loader
            .load(
                ctx,
                &prepared.chunk_embeddings,
                similarity_threshold,
                DEFAULT_CONTEXT_LIMIT,
            )
            .await;
        timeline.end_step(
            StepStatus::Success,
            None,
            Some(json!({"existing_entities": existing_entities.len()})),
        );

        let available_tags = match self.graph.list_tags(ctx).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Tag listing failed: {}", e);
                timeline.event(StepStatus::Warning, "list_tags", Some(e.to_string()));
                Vec::new()
            }
        };

        let prompt = LlmOrchestrator::build_extraction_prompt(&PromptInputs {
            base_prompt: &resolved.base_prompt,
            schema: &resolved.schema,
            allowed_types: &allowed_types,
            available_tags: &available_tags,
            existing_entities: &existing_entities,
        });

        // Token budget must be granted before the provider is called
        let estimate = TokenBudgetLimiter::estimate_tokens(prepared.content.len(), prompt.len());
        let wait_timeout = Duration::from_millis(self.config.rate_limit_wait_timeout_ms);
        if !self.rate_limiter.wait_for_capacity(estimate, wait_timeout).await {
            timeline.event_with_metadata(
                StepStatus::Warning,
                "rate_limit",
                Some("token budget not granted within timeout".to_string()),
                json!({"estimated_tokens": estimate}),
            );
            return Err(JobError::RateLimited {
                waited_ms: self.config.rate_limit_wait_timeout_ms,
            });
        }

        // LLM extraction
        let extraction = self
            .run_llm(job, project, &prepared, &resolved, &prompt, &allowed_types,
                &available_tags, &existing_entities, similarity_threshold, estimate, timeline)
            .await?;

        let (mut entities, relationships) = (extraction.entities, extraction.relationships);
        state.usage = extraction.usage;
        state.raw_response = serde_json::to_value(&extraction.raw_response).ok();
        state.discovered_types = extraction.discovered_types;

        // Entities outside the allowed set are surfaced as discovered
        // types, not persisted
        let allowed: BTreeSet<&str> = allowed_types.iter().map(String::as_str).collect();
        let mut off_schema = 0usize;
        entities.retain(|entity| {
            if allowed.contains(entity.type_name.as_str()) {
                true
            } else {
                if !state.discovered_types.contains(&entity.type_name) {
                    state.discovered_types.push(entity.type_name.clone());
                }
                off_schema += 1;
                false
            }
        });
        if off_schema > 0 {
            timeline.event_with_metadata(
                StepStatus::Warning,
                "off_schema_entities",
                Some(format!("{} entities outside the allowed types", off_schema)),
                json!({"discovered_types": state.discovered_types}),
            );
        }

        state.total_entities = entities.len();

        // Optional verification
        let verifications = self
            .verification
            .run(self.config.pipeline_mode, &prepared.content, &entities, &job.id)
            .await;
        if self.verification.applies(self.config.pipeline_mode) {
            timeline.event(
                StepStatus::Info,
                "verification",
                Some(format!("{} verdicts", verifications.len())),
            );
        }

        // Score, gate, link, persist
        let mut name_map = BatchNameMap::new();
        self.process_entities(
            job, ctx, thresholds, &entities, &verifications, similarity_threshold, &mut name_map,
            state, timeline,
        )
        .await;

        // Relationships resolve against the batch map and the database
        self.process_relationships(
            job, ctx, &resolved, &relationships, &mut name_map, state, timeline,
        )
        .await;

        // Provenance links
        if !state.created_objects.is_empty() && !prepared.chunk_ids.is_empty() {
            timeline.begin_step("link_chunks", None);
            let linked = self
                .writer
                .link_chunks(ctx, &state.created_objects, &prepared.chunk_ids, &job.id)
                .await;
            timeline.end_step(
                StepStatus::Success,
                None,
                Some(json!({"links": linked})),
            );
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_llm(
        &self,
        job: &Job,
        project: &Project,
        prepared: &PreparedDocument,
        resolved: &ResolvedSchema,
        prompt: &str,
        allowed_types: &[String],
        available_tags: &[String],
        existing_entities: &[graphmine_core::types::ContextEntity],
        similarity_threshold: f64,
        estimate: u64,
        timeline: &mut Timeline,
    ) -> Result<ExtractionResult, JobError> {
        let job_config = job.extraction_config.as_ref();
        let project_config = project.extraction_config.as_ref();
        // Job override, then project config, then the provider default
        let method = job_config
            .and_then(|c| c.extraction_method)
            .or_else(|| project_config.and_then(|c| c.extraction_method));
        let timeout_seconds = job_config
            .and_then(|c| c.timeout_seconds)
            .or_else(|| project_config.and_then(|c| c.timeout_seconds));
        let batch_size_chars = job_config.and_then(|c| c.batch_size_chars);

        let options = ExtractionOptions {
            object_schemas: resolved.schema.object_schemas.clone(),
            relationship_schemas: resolved.schema.relationship_schemas.clone(),
            allowed_types: allowed_types.to_vec(),
            available_tags: available_tags.to_vec(),
            existing_entities: existing_entities.to_vec(),
            document_chunks: prepared.chunk_texts.clone(),
            extraction_method: method,
            timeout: timeout_seconds.map(Duration::from_secs),
            batch_size_chars,
            similarity_threshold: Some(similarity_threshold),
            context: CallContext {
                job_id: Some(job.id.clone()),
                project_id: Some(job.project_id.clone()),
                trace_id: None,
                parent_observation_id: None,
            },
        };

        timeline.begin_step("llm_extraction", Some(json!({"estimated_tokens": estimate})));
        let outcome = self
            .orchestrator
            .extract(&prepared.content, prompt, options)
            .await;

        // Reconcile the reservation with what the provider actually burned
        let actual = outcome
            .as_ref()
            .ok()
            .and_then(|r| r.usage.map(|u| u.total_tokens))
            .unwrap_or(estimate);
        self.rate_limiter.report_actual_usage(estimate, actual).await;

        match outcome {
            Ok(result) => {
                timeline.end_step(
                    StepStatus::Success,
                    None,
                    Some(json!({
                        "entities": result.entities.len(),
                        "relationships": result.relationships.len(),
                        "batches": result.raw_response.batch_count,
                        "failed_batches": result.failed_batches,
                    })),
                );
                if result.failed_batches > 0 {
                    timeline.event_with_metadata(
                        StepStatus::Warning,
                        "llm_partial",
                        Some(format!("{} batch(es) failed", result.failed_batches)),
                        json!({"failed_calls": result.failed_batches}),
                    );
                }
                Ok(result)
            }
            Err(e) => {
                timeline.end_step(StepStatus::Error, Some(e.to_string()), None);
                Err(JobError::Llm(e))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_entities(
        &self,
        job: &Job,
        ctx: &TenantContext,
        thresholds: ConfidenceThresholds,
        entities: &[CandidateEntity],
        verifications: &HashMap<String, EntityVerification>,
        similarity_threshold: f64,
        name_map: &mut BatchNameMap,
        state: &mut RunState,
        timeline: &mut Timeline,
    ) {
        let total = entities.len();
        if total == 0 {
            return;
        }
        if let Err(e) = self.store.update_progress(&job.id, 0, total).await {
            warn!("Progress init failed: {}", e);
        }

        for (index, candidate) in entities.iter().enumerate() {
            state.types_processed.insert(candidate.type_name.clone());
            let verification = verifications.get(&normalize_entity_name(&candidate.name));
            let final_confidence =
                score_candidate(candidate, self.config.pipeline_mode, verification);
            let band = apply_quality_thresholds(final_confidence, &thresholds);

            match band {
                QualityBand::Reject => {
                    state.outcomes.rejected += 1;
                    timeline.event_with_metadata(
                        StepStatus::Info,
                        "entity_rejected",
                        Some(candidate.name.clone()),
                        json!({
                            "reason": "low_confidence",
                            "name": candidate.name,
                            "confidence": final_confidence,
                        }),
                    );
                }
                band => {
                    self.persist_candidate(
                        job, ctx, candidate, band, final_confidence, similarity_threshold,
                        name_map, state, timeline,
                    )
                    .await;
                }
            }

            let processed = index + 1;
            if should_log_progress(processed, total) {
                if let Err(e) = self.store.update_progress(&job.id, processed, total).await {
                    warn!("Progress update failed: {}", e);
                }
                timeline.event(
                    StepStatus::Info,
                    "progress",
                    Some(format!("[PROGRESS] {}/{}", processed, total)),
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_candidate(
        &self,
        job: &Job,
        ctx: &TenantContext,
        candidate: &CandidateEntity,
        band: QualityBand,
        final_confidence: f64,
        similarity_threshold: f64,
        name_map: &mut BatchNameMap,
        state: &mut RunState,
        timeline: &mut Timeline,
    ) {
        let decision = self
            .linker
            .decide(
                ctx,
                self.config.entity_linking_strategy,
                candidate,
                similarity_threshold,
            )
            .await;

        let write = EntityWrite {
            candidate,
            band,
            final_confidence,
            job,
        };
        match self.writer.persist_entity(ctx, &decision, write).await {
            Ok(EntityPersistOutcome::Created(object)) => {
                state.outcomes.created += 1;
                state.created_objects.push(object.id);
                *state
                    .per_type_counts
                    .entry(candidate.type_name.clone())
                    .or_insert(0) += 1;
                if band == QualityBand::Review {
                    state.review_required.push(object.id);
                }
                state.confidence_sum += final_confidence;
                state.persisted_count += 1;
                name_map.register(&candidate.name, object.id);
            }
            Ok(EntityPersistOutcome::Merged(id)) => {
                state.outcomes.merged += 1;
                state.confidence_sum += final_confidence;
                state.persisted_count += 1;
                name_map.register(&candidate.name, id);
            }
            Ok(EntityPersistOutcome::Skipped(existing)) => {
                state.outcomes.skipped += 1;
                if let Some(id) = existing {
                    name_map.register(&candidate.name, id);
                }
            }
            Err(e) => {
                state.outcomes.failed += 1;
                timeline.event_with_metadata(
                    StepStatus::Error,
                    "entity_persist_failed",
                    Some(e.to_string()),
                    json!({"name": candidate.name, "type": candidate.type_name}),
                );
                if let GraphError::ConstraintViolation { code, message } = &e {
                    let entry = StepLog {
                        job_id: job.id.clone(),
                        step_index: state.outcomes.failed,
                        operation_type: "persistence".to_string(),
                        operation_name: "create_object".to_string(),
                        status: LogStatus::Failed,
                        input_data: Some(json!(candidate.properties)),
                        output_data: None,
                        duration_ms: None,
                        error_message: Some(message.clone()),
                        error_stack: None,
                        error_details: Some(json!({"code": code})),
                        tokens_used: None,
                    };
                    if let Err(log_err) = self.structured_logger.log_step(entry).await {
                        warn!("Structured log write failed: {}", log_err);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_relationships(
        &self,
        job: &Job,
        ctx: &TenantContext,
        resolved: &ResolvedSchema,
        relationships: &[CandidateRelationship],
        name_map: &mut BatchNameMap,
        state: &mut RunState,
        timeline: &mut Timeline,
    ) {
        if relationships.is_empty() {
            return;
        }
        timeline.begin_step("persist_relationships", None);
        let mut created = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;
        let mut details: Vec<Value> = Vec::new();
        let skip = |details: &mut Vec<Value>,
                        skipped: &mut usize,
                        candidate: &CandidateRelationship,
                        reason: RelationshipSkip| {
            *skipped += 1;
            details.push(json!({
                "type": candidate.relationship_type,
                "outcome": "skipped",
                "reason": reason.as_str(),
            }));
        };

        for candidate in relationships {
            if candidate.verification_status == Some(VerificationStatus::Rejected) {
                skip(&mut details, &mut skipped, candidate, RelationshipSkip::RejectedVerification);
                continue;
            }

            let source_id = self
                .resolver
                .resolve_endpoint(ctx, &candidate.source, name_map)
                .await;
            let Some(source_id) = source_id else {
                skip(&mut details, &mut skipped, candidate, RelationshipSkip::SourceNotResolved);
                continue;
            };
            let target_id = self
                .resolver
                .resolve_endpoint(ctx, &candidate.target, name_map)
                .await;
            let Some(target_id) = target_id else {
                skip(&mut details, &mut skipped, candidate, RelationshipSkip::TargetNotResolved);
                continue;
            };

            if let Some(reason) = self
                .validate_relationship_type(ctx, resolved, candidate, source_id, target_id)
                .await
            {
                skip(&mut details, &mut skipped, candidate, reason);
                continue;
            }

            match self
                .writer
                .persist_relationship(ctx, candidate, source_id, target_id, &job.id)
                .await
            {
                Ok(RelationshipPersistOutcome::Created(id)) => {
                    created += 1;
                    details.push(json!({
                        "type": candidate.relationship_type,
                        "outcome": "created",
                        "id": id,
                    }));
                }
                Ok(RelationshipPersistOutcome::Duplicate) => {
                    skip(&mut details, &mut skipped, candidate, RelationshipSkip::Duplicate);
                }
                Err(e) => {
                    failed += 1;
                    details.push(json!({
                        "type": candidate.relationship_type,
                        "outcome": "failed",
                        "error": e.to_string(),
                    }));
                }
            }
        }

        timeline.end_step(
            StepStatus::Success,
            Some(format!(
                "{} created, {} skipped, {} failed",
                created, skipped, failed
            )),
            Some(json!({
                "created": created,
                "skipped": skipped,
                "failed": failed,
                "details": details,
            })),
        );
    }

    /// Validate the relationship type against the schemas when any are
    /// defined. Endpoint types are enforced when the schema declares them.
    async fn validate_relationship_type(
        &self,
        ctx: &TenantContext,
        resolved: &ResolvedSchema,
        candidate: &CandidateRelationship,
        source_id: Uuid,
        target_id: Uuid,
    ) -> Option<RelationshipSkip> {
        if resolved.schema.relationship_schemas.is_empty() {
            return None;
        }
        let Some(schema) = resolved.schema.relationship_schema(&candidate.relationship_type)
        else {
            return Some(RelationshipSkip::UnknownType);
        };

        if schema.schema.source_types.is_empty() && schema.schema.target_types.is_empty() {
            return None;
        }
        let source_type = self.object_type(ctx, source_id).await;
        let target_type = self.object_type(ctx, target_id).await;
        if !schema.schema.source_types.is_empty() {
            match &source_type {
                Some(t) if schema.schema.source_types.contains(t) => {}
                _ => return Some(RelationshipSkip::TypeMismatch),
            }
        }
        if !schema.schema.target_types.is_empty() {
            match &target_type {
                Some(t) if schema.schema.target_types.contains(t) => {}
                _ => return Some(RelationshipSkip::TypeMismatch),
            }
        }
        None
    }

    async fn object_type(&self, ctx: &TenantContext, id: Uuid) -> Option<String> {
        match self.graph.get_object(ctx, id).await {
            Ok(Some(object)) => Some(object.object_type),
            Ok(None) => None,
            Err(e) => {
                warn!(%id, "Endpoint type fetch failed: {}", e);
                None
            }
        }
    }

    async fn finalize_success(
        &self,
        job: &Job,
        state: RunState,
        timeline: Timeline,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        let final_status = if state.review_required.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::RequiresReview
        };
        let average_confidence = (state.persisted_count > 0)
            .then(|| state.confidence_sum / state.persisted_count as f64);
        let result = JobResult {
            created_objects: state.created_objects.clone(),
            discovered_types: state.discovered_types.clone(),
            successful_items: state.outcomes.created + state.outcomes.merged,
            total_items: state.total_entities,
            rejected_items: state.outcomes.rejected,
            review_required_count: Some(state.review_required.len()),
        };
        let summary = CompletionNotification {
            created_count: state.outcomes.created,
            per_type_counts: state.per_type_counts.clone(),
            average_confidence,
            review_required_count: state.review_required.len(),
        };
        let debug_info = self.build_debug_info(job, state, timeline, started_at, duration_ms, None);

        if let Err(e) = self
            .store
            .mark_completed(&job.id, result, debug_info, final_status)
            .await
        {
            error!("Failed to record completion: {}", e);
        }
        info!(status = %final_status, "Job finished");

        if job.subject_id.is_some() {
            if let Err(e) = self.notifier.notify_extraction_completed(job, &summary).await {
                warn!("Completion notification failed: {}", e);
            }
        }
    }

    async fn finalize_failure(
        &self,
        job: &Job,
        err: JobError,
        state: RunState,
        timeline: Timeline,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        let attempts = self
            .store
            .get_retry_count(&job.id)
            .await
            .unwrap_or(job.attempts);
        let will_retry = err.retryable() && attempts < self.config.max_retries;
        let message = err.to_string();
        error!(kind = err.kind(), will_retry, "Job failed: {}", message);

        let debug_info = self.build_debug_info(
            job,
            state,
            timeline,
            started_at,
            duration_ms,
            Some(message.clone()),
        );
        let details = json!({
            "kind": err.kind(),
            "will_retry": will_retry,
            "attempts": job.attempts,
        });
        if let Err(e) = self
            .store
            .mark_failed(&job.id, &message, details, Some(debug_info))
            .await
        {
            error!("Failed to record failure: {}", e);
        }

        if job.subject_id.is_some() {
            let failure = FailureNotification {
                message,
                retry_count: attempts,
                will_retry,
            };
            if let Err(e) = self.notifier.notify_extraction_failed(job, &failure).await {
                warn!("Failure notification failed: {}", e);
            }
        }
    }

    fn build_debug_info(
        &self,
        job: &Job,
        state: RunState,
        timeline: Timeline,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        error_message: Option<String>,
    ) -> JobDebugInfo {
        let thresholds = state.thresholds.unwrap_or_else(|| {
            let defaults = self.server_default_thresholds();
            ThresholdAudit::new(
                defaults.min,
                defaults.review,
                defaults.auto,
                ThresholdSources {
                    min: ThresholdSource::ServerDefault,
                    review: ThresholdSource::ServerDefault,
                    auto: ThresholdSource::ServerDefault,
                },
            )
        });
        JobDebugInfo {
            timeline: timeline.into_events(),
            provider: self.orchestrator.provider_name().to_string(),
            job_id: job.id.clone(),
            project_id: job.project_id.clone(),
            organization_id: state
                .organization_id
                .unwrap_or_else(|| OrganizationId::new("")),
            job_started_at: started_at,
            job_completed_at: Utc::now(),
            job_duration_ms: duration_ms,
            total_entities: state.total_entities,
            types_processed: state.types_processed.into_iter().collect(),
            usage: state.usage,
            entity_outcomes: state.outcomes,
            created_object_count: state.created_objects.len(),
            rejected_count: state.outcomes.rejected,
            review_required_count: state.review_required.len(),
            error_message,
            confidence_thresholds: thresholds,
            raw_response: state.raw_response,
        }
    }

    fn server_default_thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            min: self.config.confidence_threshold_min,
            review: self.config.confidence_threshold_review,
            auto: self.config.confidence_threshold_auto,
        }
    }

    fn similarity_threshold(&self, job: &Job, project: &Project) -> f64 {
        job.extraction_config
            .as_ref()
            .and_then(|c| c.similarity_threshold)
            .or_else(|| {
                project
                    .extraction_config
                    .as_ref()
                    .and_then(|c| c.entity_similarity_threshold)
            })
            .unwrap_or(self.config.entity_similarity_threshold)
    }
}

/// Progress is logged at every 10% boundary and always at 1/N and N/N
fn should_log_progress(processed: usize, total: usize) -> bool {
    if total == 0 {
        return false;
    }
    if processed == 1 || processed == total {
        return true;
    }
    (processed * 10 / total) != ((processed - 1) * 10 / total)
}

/// The polling worker: owns the timer loop and cooperative shutdown
pub struct ExtractionWorker {
    coordinator: Arc<JobCoordinator>,
    store: Arc<dyn JobStore>,
    enabled: bool,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExtractionWorker {
    pub fn new(coordinator: Arc<JobCoordinator>, store: Arc<dyn JobStore>, config: &WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            coordinator,
            store,
            enabled: config.enabled,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Recover orphans, then start the polling loop
    pub async fn start(&self) -> Result<(), CoreError> {
        if !self.enabled {
            info!("Extraction worker disabled by configuration");
            return Ok(());
        }

        match self.store.recover_orphans().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Recovered orphaned jobs on startup"),
            Err(e) => warn!("Orphan recovery failed: {}", e),
        }

        let coordinator = self.coordinator.clone();
        let poll_interval = self.poll_interval;
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let processed = coordinator.process_batch().await;
                        if processed > 0 {
                            debug!(processed, "Batch tick finished");
                        }
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Extraction worker loop stopped");
        });
        *self.handle.lock().await = Some(handle);
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Extraction worker started");
        Ok(())
    }

    /// Clear the polling timer and await the in-flight batch
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Worker task join failed: {}", e);
            }
        }
    }

    /// Process-local counters
    pub fn stats(&self) -> WorkerStats {
        self.coordinator.stats()
    }
}
