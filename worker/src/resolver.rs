//! Relationship endpoint resolution
//!
//! The LLM references relationship endpoints by name or by existing object
//! id. Names resolve first against the batch-local map (entities persisted
//! or merged earlier in the same job), then against a case-insensitive
//! project-wide lookup whose hits are cached back into the map. An id that
//! is supplied but malformed or unknown leaves the endpoint unresolved; it
//! never falls back to the name.

use graphmine_core::tenant::TenantContext;
use graphmine_core::traits::GraphService;
use graphmine_core::types::{
    normalize_entity_name, strip_leading_article, EndpointRef,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a candidate relationship was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipSkip {
    RejectedVerification,
    SourceNotResolved,
    TargetNotResolved,
    UnknownType,
    TypeMismatch,
    Duplicate,
}

impl RelationshipSkip {
    /// Reason tag recorded in timeline metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipSkip::RejectedVerification => "rejected_verification",
            RelationshipSkip::SourceNotResolved => "source_not_resolved",
            RelationshipSkip::TargetNotResolved => "target_not_resolved",
            RelationshipSkip::UnknownType => "unknown_type",
            RelationshipSkip::TypeMismatch => "type_mismatch",
            RelationshipSkip::Duplicate => "duplicate",
        }
    }
}

/// Per-job map from normalized entity names to the ids they produced (or
/// merged into) during this extraction
#[derive(Default)]
pub struct BatchNameMap {
    map: HashMap<String, Uuid>,
}

impl BatchNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name under its normalized form and, when applicable,
    /// under the form with a leading article removed
    pub fn register(&mut self, name: &str, id: Uuid) {
        let normalized = normalize_entity_name(name);
        if normalized.is_empty() {
            return;
        }
        if let Some(stripped) = strip_leading_article(&normalized) {
            self.map.entry(stripped).or_insert(id);
        }
        self.map.insert(normalized, id);
    }

    /// Look up a name by its normalized form
    pub fn resolve(&self, name: &str) -> Option<Uuid> {
        self.map.get(&normalize_entity_name(name)).copied()
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Resolves candidate relationship endpoints to canonical object ids
pub struct RelationshipResolver {
    graph: Arc<dyn GraphService>,
}

impl RelationshipResolver {
    pub fn new(graph: Arc<dyn GraphService>) -> Self {
        Self { graph }
    }

    /// Resolve one endpoint. Returns `None` when unresolved.
    pub async fn resolve_endpoint(
        &self,
        ctx: &TenantContext,
        endpoint: &EndpointRef,
        batch_map: &mut BatchNameMap,
    ) -> Option<Uuid> {
        if let Some(id_str) = endpoint.id.as_deref() {
            return self.resolve_by_id(ctx, id_str).await;
        }

        let name = endpoint.name.as_deref()?;
        if let Some(id) = batch_map.resolve(name) {
            return Some(id);
        }

        match self.graph.find_object_by_name(ctx, name).await {
            Ok(Some(object)) => {
                debug!(name, id = %object.id, "Endpoint resolved from database");
                batch_map.register(name, object.id);
                Some(object.id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(name, "Endpoint name lookup failed: {}", e);
                None
            }
        }
    }

    /// A supplied id must be a well-formed UUID naming a live object in the
    /// project; anything else is unresolved
    async fn resolve_by_id(&self, ctx: &TenantContext, id_str: &str) -> Option<Uuid> {
        let id = match Uuid::parse_str(id_str) {
            Ok(id) => id,
            Err(_) => {
                warn!(id = id_str, "Endpoint id is not a well-formed UUID");
                return None;
            }
        };
        match self.graph.get_object(ctx, id).await {
            Ok(Some(object)) if !object.is_deleted() => Some(id),
            Ok(_) => None,
            Err(e) => {
                warn!(%id, "Endpoint id lookup failed: {}", e);
                None
            }
        }
    }
}
