//! Quality-gated persistence into the property graph
//!
//! Creation stamps the reserved `_extraction_*` audit keys, sets status
//! from the auto threshold, and labels review-band objects. Merging folds
//! candidate properties into an existing object without clobbering curated
//! values: scalars fill only absent-or-null fields, lists append with
//! deduplication, and the merging job's id is appended to the
//! `_extraction_job_ids` audit list.

use crate::linker::{property_present, LinkDecision};
use graphmine_core::quality::QualityBand;
use graphmine_core::tenant::TenantContext;
use graphmine_core::traits::GraphService;
use graphmine_core::types::{
    CandidateEntity, CandidateRelationship, GraphObject, Job, JobId, NewObject, NewRelationship,
    ObjectStatus, EXTRACTION_CONFIDENCE_KEY, EXTRACTION_JOB_IDS_KEY, EXTRACTION_JOB_ID_KEY,
    EXTRACTION_LLM_CONFIDENCE_KEY, EXTRACTION_SOURCE_ID_KEY, EXTRACTION_SOURCE_KEY,
    REQUIRES_REVIEW_LABEL,
};
use graphmine_core::errors::GraphError;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Provenance link weight for object-to-chunk edges
pub const CHUNK_LINK_WEIGHT: f64 = 0.8;

/// What happened to one candidate entity at persistence time
pub enum EntityPersistOutcome {
    Created(GraphObject),
    Merged(Uuid),
    Skipped(Option<Uuid>),
}

/// What happened to one candidate relationship at persistence time
pub enum RelationshipPersistOutcome {
    Created(Uuid),
    /// A unique-constraint collision; swallowed and counted as skipped
    Duplicate,
}

/// Inputs for persisting one gated candidate
pub struct EntityWrite<'a> {
    pub candidate: &'a CandidateEntity,
    pub band: QualityBand,
    pub final_confidence: f64,
    pub job: &'a Job,
}

/// Writes gated candidates into the tenant-scoped graph
pub struct GraphWriter {
    graph: Arc<dyn GraphService>,
}

impl GraphWriter {
    pub fn new(graph: Arc<dyn GraphService>) -> Self {
        Self { graph }
    }

    /// Apply a linking decision for a candidate that passed the gate
    pub async fn persist_entity(
        &self,
        ctx: &TenantContext,
        decision: &LinkDecision,
        write: EntityWrite<'_>,
    ) -> Result<EntityPersistOutcome, GraphError> {
        match decision {
            LinkDecision::Create => {
                let object = self
                    .graph
                    .create_object(ctx, self.build_new_object(&write))
                    .await?;
                debug!(id = %object.id, name = %write.candidate.name, "Created object");
                Ok(EntityPersistOutcome::Created(object))
            }
            LinkDecision::Merge { existing } => {
                self.merge_into(ctx, *existing, &write).await?;
                debug!(id = %existing, name = %write.candidate.name, "Merged into existing object");
                Ok(EntityPersistOutcome::Merged(*existing))
            }
            LinkDecision::Skip { existing } => Ok(EntityPersistOutcome::Skipped(*existing)),
        }
    }

    fn build_new_object(&self, write: &EntityWrite<'_>) -> NewObject {
        let candidate = write.candidate;
        let job = write.job;

        let mut properties = Map::new();
        properties.insert("name".to_string(), json!(candidate.name));
        properties.insert("description".to_string(), json!(candidate.description));
        for (key, value) in &candidate.properties {
            properties.insert(key.clone(), value.clone());
        }
        properties.insert(
            EXTRACTION_CONFIDENCE_KEY.to_string(),
            json!(write.final_confidence),
        );
        properties.insert(
            EXTRACTION_LLM_CONFIDENCE_KEY.to_string(),
            json!(candidate.confidence),
        );
        properties.insert(
            EXTRACTION_SOURCE_KEY.to_string(),
            json!(job.source_type.to_string()),
        );
        properties.insert(
            EXTRACTION_SOURCE_ID_KEY.to_string(),
            json!(job.source_id.clone().unwrap_or_default()),
        );
        properties.insert(EXTRACTION_JOB_ID_KEY.to_string(), json!(job.id));

        let mut labels = BTreeSet::new();
        if write.band == QualityBand::Review {
            labels.insert(REQUIRES_REVIEW_LABEL.to_string());
        }

        NewObject {
            object_type: candidate.type_name.clone(),
            properties,
            labels,
            status: if write.band == QualityBand::Auto {
                ObjectStatus::Accepted
            } else {
                ObjectStatus::Draft
            },
        }
    }

    /// Fold candidate properties into an existing object. Scalars fill
    /// only absent-or-null fields; lists append with deduplication. The
    /// creating job's `_extraction_job_id` is untouched and the merging
    /// job's id is appended to `_extraction_job_ids`.
    async fn merge_into(
        &self,
        ctx: &TenantContext,
        existing_id: Uuid,
        write: &EntityWrite<'_>,
    ) -> Result<(), GraphError> {
        let existing = self
            .graph
            .get_object(ctx, existing_id)
            .await?
            .ok_or_else(|| GraphError::ObjectNotFound(existing_id.to_string()))?;

        let mut delta = Map::new();
        let mut merge_source = write.candidate.properties.clone();
        if !write.candidate.description.trim().is_empty() {
            merge_source.insert(
                "description".to_string(),
                json!(write.candidate.description),
            );
        }

        for (key, incoming) in merge_source {
            match existing.properties.get(&key) {
                Some(Value::Array(current)) => {
                    if let Value::Array(new_items) = incoming {
                        let mut combined = current.clone();
                        for item in new_items {
                            if !combined.contains(&item) {
                                combined.push(item);
                            }
                        }
                        if combined.len() != current.len() {
                            delta.insert(key, Value::Array(combined));
                        }
                    }
                }
                current if !property_present(current) => {
                    delta.insert(key, incoming);
                }
                _ => {}
            }
        }

        let mut job_ids = match existing.properties.get(EXTRACTION_JOB_IDS_KEY) {
            Some(Value::Array(ids)) => ids.clone(),
            _ => Vec::new(),
        };
        let job_id_value = json!(write.job.id);
        if !job_ids.contains(&job_id_value) {
            job_ids.push(job_id_value);
        }
        delta.insert(EXTRACTION_JOB_IDS_KEY.to_string(), Value::Array(job_ids));

        self.graph
            .merge_object_properties(ctx, existing_id, delta)
            .await
    }

    /// Create a relationship edge; duplicate-key collisions are swallowed
    pub async fn persist_relationship(
        &self,
        ctx: &TenantContext,
        candidate: &CandidateRelationship,
        source_id: Uuid,
        target_id: Uuid,
        job_id: &JobId,
    ) -> Result<RelationshipPersistOutcome, GraphError> {
        let mut properties = Map::new();
        properties.insert("description".to_string(), json!(candidate.description));
        properties.insert(
            EXTRACTION_CONFIDENCE_KEY.to_string(),
            json!(candidate.confidence),
        );
        properties.insert(EXTRACTION_JOB_ID_KEY.to_string(), json!(job_id));
        properties.insert(EXTRACTION_SOURCE_KEY.to_string(), json!("llm"));

        let result = self
            .graph
            .create_relationship(
                ctx,
                NewRelationship {
                    relationship_type: candidate.relationship_type.clone(),
                    source_id,
                    target_id,
                    properties,
                },
            )
            .await;

        match result {
            Ok(id) => Ok(RelationshipPersistOutcome::Created(id)),
            Err(GraphError::DuplicateRelationship(_)) => {
                debug!(
                    relationship_type = %candidate.relationship_type,
                    "Duplicate relationship skipped"
                );
                Ok(RelationshipPersistOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Link each created object to every source chunk. Non-fatal: failures
    /// are warned and the successful link count is returned.
    pub async fn link_chunks(
        &self,
        ctx: &TenantContext,
        object_ids: &[Uuid],
        chunk_ids: &[Uuid],
        job_id: &JobId,
    ) -> usize {
        let mut linked = 0;
        for &object_id in object_ids {
            for &chunk_id in chunk_ids {
                match self
                    .graph
                    .link_object_to_chunk(ctx, object_id, chunk_id, CHUNK_LINK_WEIGHT, job_id)
                    .await
                {
                    Ok(()) => linked += 1,
                    Err(e) => {
                        warn!(%object_id, %chunk_id, "Chunk link failed: {}", e);
                    }
                }
            }
        }
        linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmine_core::types::{ProjectId, SourceType};

    fn job() -> Job {
        Job::new(SourceType::Document, ProjectId::new("proj-1")).with_source_id("doc-1")
    }

    fn candidate(confidence: Option<f64>) -> CandidateEntity {
        let mut properties = Map::new();
        properties.insert("role".to_string(), json!("mathematician"));
        CandidateEntity {
            type_name: "Person".to_string(),
            name: "Ada Lovelace".to_string(),
            description: "English mathematician".to_string(),
            properties,
            confidence,
            verification_status: None,
        }
    }

    #[test]
    fn test_created_object_carries_reserved_keys_and_status() {
        let writer = GraphWriter::new(Arc::new(NullGraph));
        let job = job();
        let candidate = candidate(Some(0.92));
        let new_object = writer.build_new_object(&EntityWrite {
            candidate: &candidate,
            band: QualityBand::Auto,
            final_confidence: 0.92,
            job: &job,
        });

        assert_eq!(new_object.status, ObjectStatus::Accepted);
        assert!(new_object.labels.is_empty());
        assert_eq!(new_object.properties["name"], json!("Ada Lovelace"));
        assert_eq!(new_object.properties["role"], json!("mathematician"));
        assert_eq!(new_object.properties[EXTRACTION_CONFIDENCE_KEY], json!(0.92));
        assert_eq!(new_object.properties[EXTRACTION_LLM_CONFIDENCE_KEY], json!(0.92));
        assert_eq!(new_object.properties[EXTRACTION_SOURCE_KEY], json!("document"));
        assert_eq!(new_object.properties[EXTRACTION_SOURCE_ID_KEY], json!("doc-1"));
        assert_eq!(new_object.properties[EXTRACTION_JOB_ID_KEY], json!(job.id));
    }

    #[test]
    fn test_review_band_writes_draft_with_review_label() {
        let writer = GraphWriter::new(Arc::new(NullGraph));
        let job = job();
        let candidate = candidate(Some(0.65));
        let new_object = writer.build_new_object(&EntityWrite {
            candidate: &candidate,
            band: QualityBand::Review,
            final_confidence: 0.65,
            job: &job,
        });

        assert_eq!(new_object.status, ObjectStatus::Draft);
        assert!(new_object.labels.contains(REQUIRES_REVIEW_LABEL));
    }

    /// GraphService double for pure construction tests
    struct NullGraph;

    #[async_trait::async_trait]
    impl GraphService for NullGraph {
        async fn enter_scope(&self, _ctx: &TenantContext) -> Result<(), GraphError> {
            Ok(())
        }
        async fn exit_scope(&self, _ctx: &TenantContext) -> Result<(), GraphError> {
            Ok(())
        }
        async fn create_object(
            &self,
            _ctx: &TenantContext,
            _object: NewObject,
        ) -> Result<GraphObject, GraphError> {
            unimplemented!()
        }
        async fn merge_object_properties(
            &self,
            _ctx: &TenantContext,
            _id: Uuid,
            _properties: Map<String, Value>,
        ) -> Result<(), GraphError> {
            Ok(())
        }
        async fn get_object(
            &self,
            _ctx: &TenantContext,
            _id: Uuid,
        ) -> Result<Option<GraphObject>, GraphError> {
            Ok(None)
        }
        async fn find_object_by_name(
            &self,
            _ctx: &TenantContext,
            _name: &str,
        ) -> Result<Option<GraphObject>, GraphError> {
            Ok(None)
        }
        async fn find_object_by_key(
            &self,
            _ctx: &TenantContext,
            _object_type: &str,
            _normalized_name: &str,
        ) -> Result<Option<GraphObject>, GraphError> {
            Ok(None)
        }
        async fn create_relationship(
            &self,
            _ctx: &TenantContext,
            _relationship: NewRelationship,
        ) -> Result<Uuid, GraphError> {
            unimplemented!()
        }
        async fn list_tags(&self, _ctx: &TenantContext) -> Result<Vec<String>, GraphError> {
            Ok(vec![])
        }
        async fn link_object_to_chunk(
            &self,
            _ctx: &TenantContext,
            _object_id: Uuid,
            _chunk_id: Uuid,
            _weight: f64,
            _job_id: &JobId,
        ) -> Result<(), GraphError> {
            Ok(())
        }
        async fn search_by_vector(
            &self,
            _ctx: &TenantContext,
            _vector: &[f32],
            _limit: usize,
            _max_distance: f64,
        ) -> Result<Vec<graphmine_core::traits::VectorMatch>, GraphError> {
            Ok(vec![])
        }
        async fn list_neighbors(
            &self,
            _ctx: &TenantContext,
            _object_id: Uuid,
            _limit: usize,
        ) -> Result<Vec<graphmine_core::types::NeighborSummary>, GraphError> {
            Ok(vec![])
        }
    }
}
