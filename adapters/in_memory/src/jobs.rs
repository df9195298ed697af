//! In-memory durable job queue

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use graphmine_core::errors::StoreError;
use graphmine_core::traits::{JobStore, ORPHAN_RECOVERY_MARKER, ORPHAN_STALE_AFTER};
use graphmine_core::types::{Job, JobDebugInfo, JobId, JobResult, JobStatus};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Insertion order, used for FIFO dequeue
    order: Vec<JobId>,
    /// Details recorded by `mark_failed`, keyed by job
    failure_details: HashMap<JobId, Value>,
}

/// In-memory implementation of [`JobStore`].
///
/// Claims happen under a single write lock, which gives the at-most-once
/// hand-off guarantee the contract requires; a SQL-backed store would use
/// `FOR UPDATE SKIP LOCKED` for the same effect.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: RwLock<QueueState>,
}

impl InMemoryJobStore {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job (test and enqueuer-side helper)
    pub async fn enqueue(&self, job: Job) {
        let mut state = self.state.write().await;
        let id = job.id.clone();
        state.jobs.insert(id.clone(), job);
        state.order.push(id);
    }

    /// Insert a job row verbatim, preserving its status and timestamps.
    /// Used by tests to stage orphaned `running` jobs.
    pub async fn inject(&self, job: Job) {
        self.enqueue(job).await;
    }

    /// Fetch a job row (test inspection)
    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        self.state.read().await.jobs.get(id).cloned()
    }

    /// Details recorded by the last `mark_failed` for a job
    pub async fn failure_details(&self, id: &JobId) -> Option<Value> {
        self.state.read().await.failure_details.get(id).cloned()
    }

    /// Number of jobs currently queued
    pub async fn queued_count(&self) -> usize {
        let state = self.state.read().await;
        state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .count()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn dequeue_batch(&self, n: usize) -> Result<Vec<Job>, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut claimed = Vec::new();

        let order = state.order.clone();
        for id in order {
            if claimed.len() >= n {
                break;
            }
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.updated_at = now;
            job.attempts += 1;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        processed: usize,
        total: usize,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.updated_at = Utc::now();
        if let Some(metadata) = job.source_metadata.as_object_mut() {
            metadata.insert("progress_processed".to_string(), processed.into());
            metadata.insert("progress_total".to_string(), total.into());
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        job_id: &JobId,
        result: JobResult,
        debug_info: JobDebugInfo,
        final_status: JobStatus,
    ) -> Result<(), StoreError> {
        if !matches!(final_status, JobStatus::Completed | JobStatus::RequiresReview) {
            return Err(StoreError::InvalidTransition(format!(
                "mark_completed cannot set status {}",
                final_status
            )));
        }
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.status = final_status;
        job.result = Some(result);
        job.debug_info = Some(debug_info);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: &JobId,
        message: &str,
        details: Value,
        debug_info: Option<JobDebugInfo>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(message.to_string());
        job.debug_info = debug_info;
        job.updated_at = Utc::now();
        state.failure_details.insert(job_id.clone(), details);
        Ok(())
    }

    async fn get_retry_count(&self, job_id: &JobId) -> Result<u32, StoreError> {
        let state = self.state.read().await;
        state
            .jobs
            .get(job_id)
            .map(|job| job.attempts)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn recover_orphans(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let stale_before = Utc::now()
            - ChronoDuration::from_std(ORPHAN_STALE_AFTER)
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let mut recovered = 0;

        for job in state.jobs.values_mut() {
            if job.status != JobStatus::Running || job.updated_at >= stale_before {
                continue;
            }
            if job.project_id.as_str().is_empty() {
                warn!(job_id = %job.id, "Skipping orphan with missing tenant context");
                continue;
            }
            job.status = JobStatus::Queued;
            job.started_at = None;
            job.updated_at = Utc::now();
            let already_marked = job
                .error_message
                .as_deref()
                .map(|m| m.contains(ORPHAN_RECOVERY_MARKER))
                .unwrap_or(false);
            if !already_marked {
                job.error_message = Some(match job.error_message.take() {
                    Some(existing) => format!("{} {}", existing, ORPHAN_RECOVERY_MARKER),
                    None => ORPHAN_RECOVERY_MARKER.to_string(),
                });
            }
            info!(job_id = %job.id, "Recovered orphaned job");
            recovered += 1;
        }
        Ok(recovered)
    }
}
