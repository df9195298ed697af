//! Existing-entity context for deduplication
//!
//! Loads a bounded set of existing entities semantically related to the
//! document, with non-internal properties and a handful of one-hop
//! neighbors, so the LLM can avoid re-extracting what the graph already
//! knows. Failure is non-fatal; extraction proceeds without context.

use graphmine_core::tenant::TenantContext;
use graphmine_core::traits::GraphService;
use graphmine_core::types::{ContextEntity, INTERNAL_PROPERTY_PREFIX};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum context entities returned
pub const DEFAULT_CONTEXT_LIMIT: usize = 30;
/// Default similarity threshold for the vector search
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;
/// How many chunk embeddings seed the search
const SEED_EMBEDDINGS: usize = 3;
/// One-hop neighbors fetched per entity
const NEIGHBOR_LIMIT: usize = 10;

/// Loads bounded deduplication context from the graph
pub struct ContextLoader {
    graph: Arc<dyn GraphService>,
}

impl ContextLoader {
    pub fn new(graph: Arc<dyn GraphService>) -> Self {
        Self { graph }
    }

    /// Load up to `limit` related entities using the document's first few
    /// chunk embeddings. Errors are swallowed with a warning and whatever
    /// was collected so far is returned.
    pub async fn load(
        &self,
        ctx: &TenantContext,
        chunk_embeddings: &[Vec<f32>],
        similarity_threshold: f64,
        limit: usize,
    ) -> Vec<ContextEntity> {
        let max_distance = 1.0 - similarity_threshold;
        let mut seen: HashSet<uuid::Uuid> = HashSet::new();
        let mut entities = Vec::new();

        for embedding in chunk_embeddings.iter().take(SEED_EMBEDDINGS) {
            if entities.len() >= limit {
                break;
            }
            let matches = match self
                .graph
                .search_by_vector(ctx, embedding, limit, max_distance)
                .await
            {
                Ok(matches) => matches,
                Err(e) => {
                    warn!("Context vector search failed: {}", e);
                    return entities;
                }
            };

            for vector_match in matches {
                if entities.len() >= limit {
                    break;
                }
                if !seen.insert(vector_match.object_id) {
                    continue;
                }
                match self.build_entry(ctx, vector_match.object_id).await {
                    Some(entity) => entities.push(entity),
                    None => continue,
                }
            }
        }

        debug!(count = entities.len(), "Loaded existing-entity context");
        entities
    }

    async fn build_entry(
        &self,
        ctx: &TenantContext,
        object_id: uuid::Uuid,
    ) -> Option<ContextEntity> {
        let object = match self.graph.get_object(ctx, object_id).await {
            Ok(Some(object)) if !object.is_deleted() => object,
            Ok(_) => return None,
            Err(e) => {
                warn!(%object_id, "Context object fetch failed: {}", e);
                return None;
            }
        };

        let neighbors = match self.graph.list_neighbors(ctx, object_id, NEIGHBOR_LIMIT).await {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!(%object_id, "Neighbor fetch failed: {}", e);
                Vec::new()
            }
        };

        let properties = object
            .properties
            .iter()
            .filter(|(key, _)| !key.starts_with(INTERNAL_PROPERTY_PREFIX))
            .filter(|(key, _)| *key != "name" && *key != "description")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(ContextEntity {
            id: object.id,
            name: object.name().unwrap_or_default().to_string(),
            entity_type: object.object_type.clone(),
            description: object.description().map(str::to_string),
            properties,
            neighbors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmine_core::errors::GraphError;
    use graphmine_core::traits::VectorMatch;
    use graphmine_core::types::{
        GraphObject, JobId, NeighborSummary, NewObject, NewRelationship, ObjectStatus,
        OrganizationId, ProjectId,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Map, Value};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    struct FixedGraph {
        object: GraphObject,
    }

    #[async_trait]
    impl GraphService for FixedGraph {
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
            id: Uuid,
        ) -> Result<Option<GraphObject>, GraphError> {
            Ok((id == self.object.id).then(|| self.object.clone()))
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
        ) -> Result<Vec<VectorMatch>, GraphError> {
            Ok(vec![
                VectorMatch {
                    object_id: self.object.id,
                    distance: 0.1,
                },
                // Duplicate match from a second seed chunk
                VectorMatch {
                    object_id: self.object.id,
                    distance: 0.2,
                },
            ])
        }
        async fn list_neighbors(
            &self,
            _ctx: &TenantContext,
            _object_id: Uuid,
            _limit: usize,
        ) -> Result<Vec<NeighborSummary>, GraphError> {
            Ok(vec![])
        }
    }

    fn ctx() -> TenantContext {
        TenantContext::new(OrganizationId::new("org-1"), ProjectId::new("proj-1"))
    }

    fn stored_object() -> GraphObject {
        let mut properties = Map::new();
        properties.insert("name".to_string(), json!("Ada Lovelace"));
        properties.insert("description".to_string(), json!("Mathematician"));
        properties.insert("role".to_string(), json!("mathematician"));
        properties.insert("_extraction_confidence".to_string(), json!(0.9));
        GraphObject {
            id: Uuid::new_v4(),
            project_id: ProjectId::new("proj-1"),
            organization_id: OrganizationId::new("org-1"),
            object_type: "Person".to_string(),
            status: ObjectStatus::Accepted,
            properties,
            labels: BTreeSet::new(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_context_strips_internal_properties_and_dedupes_matches() {
        let object = stored_object();
        let loader = ContextLoader::new(Arc::new(FixedGraph { object }));

        let entities = loader
            .load(&ctx(), &[vec![1.0, 0.0], vec![0.0, 1.0]], 0.5, 30)
            .await;
        assert_eq!(entities.len(), 1);
        let entity = &entities[0];
        assert_eq!(entity.name, "Ada Lovelace");
        assert_eq!(entity.description.as_deref(), Some("Mathematician"));
        assert!(entity.properties.contains_key("role"));
        assert!(!entity.properties.contains_key("_extraction_confidence"));
        assert!(!entity.properties.contains_key("name"));
    }

    #[tokio::test]
    async fn test_no_embeddings_yields_empty_context() {
        let loader = ContextLoader::new(Arc::new(FixedGraph {
            object: stored_object(),
        }));
        let entities = loader.load(&ctx(), &[], 0.5, 30).await;
        assert!(entities.is_empty());
    }
}
