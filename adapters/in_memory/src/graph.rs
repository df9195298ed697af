//! In-memory property graph with tenant-pair isolation

use async_trait::async_trait;
use chrono::Utc;
use graphmine_core::errors::GraphError;
use graphmine_core::tenant::TenantContext;
use graphmine_core::traits::{GraphService, VectorMatch};
use graphmine_core::types::{
    normalize_entity_name, EdgeDirection, GraphObject, GraphRelationship, JobId, NeighborSummary,
    NewObject, NewRelationship, ObjectChunkLink,
};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Internal graph state
#[derive(Default)]
struct GraphState {
    /// Objects indexed by system id
    objects: HashMap<Uuid, GraphObject>,
    /// Relationships indexed by system id
    relationships: HashMap<Uuid, GraphRelationship>,
    /// Unique index: (tenant, type, source, target)
    relationship_keys: HashSet<(TenantContext, String, Uuid, Uuid)>,
    /// Provenance links in insertion order
    chunk_links: Vec<ObjectChunkLink>,
    /// Embeddings for vector search, keyed by object id
    object_embeddings: HashMap<Uuid, Vec<f32>>,
    /// Tags per tenant
    tags: HashMap<TenantContext, BTreeSet<String>>,
    /// Session scopes currently established
    active_scopes: HashSet<TenantContext>,
}

/// In-memory implementation of [`GraphService`].
///
/// Isolation follows the property model: every record carries its tenant
/// pair, every operation re-checks it against the caller's context, and
/// operations outside an established scope are refused. This mirrors the
/// session-variable row-level security a SQL-backed store would apply.
#[derive(Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an embedding for an object, enabling vector-search matches
    pub async fn put_object_embedding(&self, object_id: Uuid, embedding: Vec<f32>) {
        let mut state = self.state.write().await;
        state.object_embeddings.insert(object_id, embedding);
    }

    /// Seed a tag for a tenant
    pub async fn add_tag(&self, ctx: &TenantContext, tag: impl Into<String>) {
        let mut state = self.state.write().await;
        state.tags.entry(ctx.clone()).or_default().insert(tag.into());
    }

    /// All provenance links written so far (test inspection)
    pub async fn chunk_links(&self) -> Vec<ObjectChunkLink> {
        self.state.read().await.chunk_links.clone()
    }

    /// All relationships written so far (test inspection)
    pub async fn relationships(&self) -> Vec<GraphRelationship> {
        self.state.read().await.relationships.values().cloned().collect()
    }

    /// Fetch an object without tenant checks (test inspection)
    pub async fn raw_object(&self, id: Uuid) -> Option<GraphObject> {
        self.state.read().await.objects.get(&id).cloned()
    }

    fn check_scope(state: &GraphState, ctx: &TenantContext) -> Result<(), GraphError> {
        if state.active_scopes.contains(ctx) {
            Ok(())
        } else {
            Err(GraphError::TenantIsolationViolation(format!(
                "no active scope for {}",
                ctx
            )))
        }
    }

    fn check_owner(object: &GraphObject, ctx: &TenantContext) -> Result<(), GraphError> {
        if object.project_id == ctx.project_id && object.organization_id == ctx.organization_id {
            Ok(())
        } else {
            Err(GraphError::TenantIsolationViolation(format!(
                "object {} belongs to {}/{}",
                object.id, object.organization_id, object.project_id
            )))
        }
    }

    /// The `name` property must be a non-empty string. Enforced on create,
    /// and on merge when the delta touches `name`.
    fn check_name_property(
        properties: &Map<String, Value>,
        required: bool,
    ) -> Result<(), GraphError> {
        match properties.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(()),
            Some(value) => Err(GraphError::ConstraintViolation {
                code: "invalid_name".to_string(),
                message: format!("name must be a non-empty string, got {}", value),
            }),
            None if required => Err(GraphError::ConstraintViolation {
                code: "invalid_name".to_string(),
                message: "name property is required".to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl GraphService for InMemoryGraph {
    async fn enter_scope(&self, ctx: &TenantContext) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        state.active_scopes.insert(ctx.clone());
        debug!("Scope established for {}", ctx);
        Ok(())
    }

    async fn exit_scope(&self, ctx: &TenantContext) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        state.active_scopes.remove(ctx);
        debug!("Scope released for {}", ctx);
        Ok(())
    }

    async fn create_object(
        &self,
        ctx: &TenantContext,
        object: NewObject,
    ) -> Result<GraphObject, GraphError> {
        let mut state = self.state.write().await;
        Self::check_scope(&state, ctx)?;
        Self::check_name_property(&object.properties, true)?;

        let stored = GraphObject {
            id: Uuid::new_v4(),
            project_id: ctx.project_id.clone(),
            organization_id: ctx.organization_id.clone(),
            object_type: object.object_type,
            status: object.status,
            properties: object.properties,
            labels: object.labels,
            created_at: Utc::now(),
            deleted_at: None,
        };
        state.objects.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn merge_object_properties(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        properties: Map<String, Value>,
    ) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        Self::check_scope(&state, ctx)?;
        Self::check_name_property(&properties, false)?;
        let object = state
            .objects
            .get_mut(&id)
            .ok_or_else(|| GraphError::ObjectNotFound(id.to_string()))?;
        Self::check_owner(object, ctx)?;
        object.properties.extend(properties);
        Ok(())
    }

    async fn get_object(
        &self,
        ctx: &TenantContext,
        id: Uuid,
    ) -> Result<Option<GraphObject>, GraphError> {
        let state = self.state.read().await;
        Self::check_scope(&state, ctx)?;
        match state.objects.get(&id) {
            Some(object) => {
                Self::check_owner(object, ctx)?;
                Ok(Some(object.clone()))
            }
            None => Ok(None),
        }
    }

    async fn find_object_by_name(
        &self,
        ctx: &TenantContext,
        name: &str,
    ) -> Result<Option<GraphObject>, GraphError> {
        let state = self.state.read().await;
        Self::check_scope(&state, ctx)?;
        let wanted = normalize_entity_name(name);
        let mut best: Option<&GraphObject> = None;
        for object in state.objects.values() {
            if object.is_deleted()
                || object.project_id != ctx.project_id
                || object.organization_id != ctx.organization_id
            {
                continue;
            }
            let matches = object
                .name()
                .map(|n| normalize_entity_name(n) == wanted)
                .unwrap_or(false);
            if matches && best.map_or(true, |b| object.created_at > b.created_at) {
                best = Some(object);
            }
        }
        Ok(best.cloned())
    }

    async fn find_object_by_key(
        &self,
        ctx: &TenantContext,
        object_type: &str,
        normalized_name: &str,
    ) -> Result<Option<GraphObject>, GraphError> {
        let state = self.state.read().await;
        Self::check_scope(&state, ctx)?;
        let mut best: Option<&GraphObject> = None;
        for object in state.objects.values() {
            if object.is_deleted()
                || object.project_id != ctx.project_id
                || object.organization_id != ctx.organization_id
                || object.object_type != object_type
            {
                continue;
            }
            let matches = object
                .name()
                .map(|n| normalize_entity_name(n) == normalized_name)
                .unwrap_or(false);
            if matches && best.map_or(true, |b| object.created_at > b.created_at) {
                best = Some(object);
            }
        }
        Ok(best.cloned())
    }

    async fn create_relationship(
        &self,
        ctx: &TenantContext,
        relationship: NewRelationship,
    ) -> Result<Uuid, GraphError> {
        let mut state = self.state.write().await;
        Self::check_scope(&state, ctx)?;

        for endpoint in [relationship.source_id, relationship.target_id] {
            let object = state
                .objects
                .get(&endpoint)
                .ok_or_else(|| GraphError::ObjectNotFound(endpoint.to_string()))?;
            Self::check_owner(object, ctx)?;
        }

        let key = (
            ctx.clone(),
            relationship.relationship_type.clone(),
            relationship.source_id,
            relationship.target_id,
        );
        if !state.relationship_keys.insert(key) {
            return Err(GraphError::DuplicateRelationship(format!(
                "{} {} -> {}",
                relationship.relationship_type, relationship.source_id, relationship.target_id
            )));
        }

        let stored = GraphRelationship {
            id: Uuid::new_v4(),
            project_id: ctx.project_id.clone(),
            organization_id: ctx.organization_id.clone(),
            relationship_type: relationship.relationship_type,
            source_id: relationship.source_id,
            target_id: relationship.target_id,
            properties: relationship.properties,
            created_at: Utc::now(),
        };
        let id = stored.id;
        state.relationships.insert(id, stored);
        Ok(id)
    }

    async fn list_tags(&self, ctx: &TenantContext) -> Result<Vec<String>, GraphError> {
        let state = self.state.read().await;
        Self::check_scope(&state, ctx)?;
        Ok(state
            .tags
            .get(ctx)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn link_object_to_chunk(
        &self,
        ctx: &TenantContext,
        object_id: Uuid,
        chunk_id: Uuid,
        weight: f64,
        job_id: &JobId,
    ) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        Self::check_scope(&state, ctx)?;
        let object = state
            .objects
            .get(&object_id)
            .ok_or_else(|| GraphError::ObjectNotFound(object_id.to_string()))?;
        Self::check_owner(object, ctx)?;
        state.chunk_links.push(ObjectChunkLink {
            object_id,
            chunk_id,
            weight,
            job_id: job_id.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn search_by_vector(
        &self,
        ctx: &TenantContext,
        vector: &[f32],
        limit: usize,
        max_distance: f64,
    ) -> Result<Vec<VectorMatch>, GraphError> {
        let state = self.state.read().await;
        Self::check_scope(&state, ctx)?;
        let mut matches: Vec<VectorMatch> = state
            .object_embeddings
            .iter()
            .filter_map(|(id, embedding)| {
                let object = state.objects.get(id)?;
                if object.is_deleted()
                    || object.project_id != ctx.project_id
                    || object.organization_id != ctx.organization_id
                {
                    return None;
                }
                let distance = cosine_distance(vector, embedding);
                (distance <= max_distance).then_some(VectorMatch {
                    object_id: *id,
                    distance,
                })
            })
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn list_neighbors(
        &self,
        ctx: &TenantContext,
        object_id: Uuid,
        limit: usize,
    ) -> Result<Vec<NeighborSummary>, GraphError> {
        let state = self.state.read().await;
        Self::check_scope(&state, ctx)?;
        let mut neighbors = Vec::new();
        for relationship in state.relationships.values() {
            if neighbors.len() >= limit {
                break;
            }
            if relationship.project_id != ctx.project_id {
                continue;
            }
            let (direction, related_id) = if relationship.source_id == object_id {
                (EdgeDirection::Outgoing, relationship.target_id)
            } else if relationship.target_id == object_id {
                (EdgeDirection::Incoming, relationship.source_id)
            } else {
                continue;
            };
            let Some(related) = state.objects.get(&related_id) else {
                continue;
            };
            neighbors.push(NeighborSummary {
                relationship_type: relationship.relationship_type.clone(),
                direction,
                related_name: related.name().unwrap_or_default().to_string(),
                related_type: related.object_type.clone(),
            });
        }
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmine_core::types::{ObjectStatus, OrganizationId, ProjectId};
    use serde_json::json;

    fn ctx(org: &str, project: &str) -> TenantContext {
        TenantContext::new(OrganizationId::new(org), ProjectId::new(project))
    }

    fn object(name: &str, object_type: &str) -> NewObject {
        let mut properties = Map::new();
        properties.insert("name".to_string(), json!(name));
        NewObject {
            object_type: object_type.to_string(),
            properties,
            labels: BTreeSet::new(),
            status: ObjectStatus::Accepted,
        }
    }

    #[tokio::test]
    async fn test_operations_require_an_active_scope() {
        let graph = InMemoryGraph::new();
        let tenant = ctx("org-1", "proj-1");

        let err = graph
            .create_object(&tenant, object("Ada", "Person"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::TenantIsolationViolation(_)));
    }

    #[tokio::test]
    async fn test_name_constraint_is_enforced_on_create_and_merge() {
        let graph = InMemoryGraph::new();
        let tenant = ctx("org-1", "proj-1");
        graph.enter_scope(&tenant).await.unwrap();

        let mut bad = object("Ada", "Person");
        bad.properties.insert("name".to_string(), json!(42));
        let err = graph.create_object(&tenant, bad).await.unwrap_err();
        match err {
            GraphError::ConstraintViolation { code, .. } => assert_eq!(code, "invalid_name"),
            other => panic!("expected constraint violation, got {}", other),
        }

        let err = graph
            .create_object(
                &tenant,
                NewObject {
                    object_type: "Person".to_string(),
                    properties: Map::new(),
                    labels: BTreeSet::new(),
                    status: ObjectStatus::Accepted,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ConstraintViolation { .. }));

        let created = graph
            .create_object(&tenant, object("Ada", "Person"))
            .await
            .unwrap();
        let mut delta = Map::new();
        delta.insert("name".to_string(), json!(""));
        let err = graph
            .merge_object_properties(&tenant, created.id, delta)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_cross_tenant_reads_are_refused() {
        let graph = InMemoryGraph::new();
        let tenant_a = ctx("org-1", "proj-1");
        let tenant_b = ctx("org-2", "proj-2");
        graph.enter_scope(&tenant_a).await.unwrap();
        graph.enter_scope(&tenant_b).await.unwrap();

        let created = graph
            .create_object(&tenant_a, object("Ada", "Person"))
            .await
            .unwrap();

        let err = graph.get_object(&tenant_b, created.id).await.unwrap_err();
        assert!(matches!(err, GraphError::TenantIsolationViolation(_)));
    }

    #[tokio::test]
    async fn test_name_lookup_is_case_insensitive_and_recency_ordered() {
        let graph = InMemoryGraph::new();
        let tenant = ctx("org-1", "proj-1");
        graph.enter_scope(&tenant).await.unwrap();

        graph
            .create_object(&tenant, object("Ada Lovelace", "Person"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let newer = graph
            .create_object(&tenant, object("ADA LOVELACE", "Person"))
            .await
            .unwrap();

        let found = graph
            .find_object_by_name(&tenant, "ada lovelace")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn test_duplicate_relationship_is_rejected() {
        let graph = InMemoryGraph::new();
        let tenant = ctx("org-1", "proj-1");
        graph.enter_scope(&tenant).await.unwrap();

        let a = graph.create_object(&tenant, object("Ada", "Person")).await.unwrap();
        let b = graph.create_object(&tenant, object("Math", "Field")).await.unwrap();

        let edge = NewRelationship {
            relationship_type: "WORKED_IN".to_string(),
            source_id: a.id,
            target_id: b.id,
            properties: Map::new(),
        };
        graph.create_relationship(&tenant, edge.clone()).await.unwrap();
        let err = graph.create_relationship(&tenant, edge).await.unwrap_err();
        assert!(matches!(err, GraphError::DuplicateRelationship(_)));
    }

    #[tokio::test]
    async fn test_vector_search_filters_by_distance_and_tenant() {
        let graph = InMemoryGraph::new();
        let tenant = ctx("org-1", "proj-1");
        graph.enter_scope(&tenant).await.unwrap();

        let near = graph.create_object(&tenant, object("Ada", "Person")).await.unwrap();
        let far = graph.create_object(&tenant, object("Planet", "Thing")).await.unwrap();
        graph.put_object_embedding(near.id, vec![1.0, 0.0, 0.0]).await;
        graph.put_object_embedding(far.id, vec![0.0, 1.0, 0.0]).await;

        let matches = graph
            .search_by_vector(&tenant, &[1.0, 0.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].object_id, near.id);
        assert!(matches[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn test_neighbor_listing_reports_direction() {
        let graph = InMemoryGraph::new();
        let tenant = ctx("org-1", "proj-1");
        graph.enter_scope(&tenant).await.unwrap();

        let ada = graph.create_object(&tenant, object("Ada", "Person")).await.unwrap();
        let math = graph.create_object(&tenant, object("Math", "Field")).await.unwrap();
        graph
            .create_relationship(
                &tenant,
                NewRelationship {
                    relationship_type: "WORKED_IN".to_string(),
                    source_id: ada.id,
                    target_id: math.id,
                    properties: Map::new(),
                },
            )
            .await
            .unwrap();

        let from_ada = graph.list_neighbors(&tenant, ada.id, 10).await.unwrap();
        assert_eq!(from_ada.len(), 1);
        assert_eq!(from_ada[0].direction, EdgeDirection::Outgoing);
        assert_eq!(from_ada[0].related_name, "Math");

        let from_math = graph.list_neighbors(&tenant, math.id, 10).await.unwrap();
        assert_eq!(from_math[0].direction, EdgeDirection::Incoming);
    }
}
