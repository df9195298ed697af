//! Tenant scoping for all data access
//!
//! Every graph read and write during a job happens within exactly one
//! `(organization, project)` pair. [`TenantScope`] is a scoped acquisition:
//! entering it establishes per-connection session scope on the graph
//! service, and it must be released on every exit path. Dropping an
//! unreleased scope logs a warning; Drop cannot await, so the session-side
//! release is the caller's responsibility.

use crate::errors::GraphError;
use crate::traits::GraphService;
use crate::types::{OrganizationId, ProjectId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// The tenant pair under which all data access occurs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
}

impl TenantContext {
    /// Create a tenant context
    pub fn new(organization_id: OrganizationId, project_id: ProjectId) -> Self {
        Self {
            organization_id,
            project_id,
        }
    }
}

impl std::fmt::Display for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.project_id)
    }
}

/// Scoped tenant acquisition around a job's data access
pub struct TenantScope {
    ctx: TenantContext,
    graph: Arc<dyn GraphService>,
    released: bool,
}

impl TenantScope {
    /// Establish session scope for the tenant pair
    pub async fn enter(
        graph: Arc<dyn GraphService>,
        ctx: TenantContext,
    ) -> Result<Self, GraphError> {
        graph.enter_scope(&ctx).await?;
        debug!("Entered tenant scope {}", ctx);
        Ok(Self {
            ctx,
            graph,
            released: false,
        })
    }

    /// The tenant pair this scope was entered with
    pub fn context(&self) -> &TenantContext {
        &self.ctx
    }

    /// Release the session scope. Must be called on every exit path.
    pub async fn release(mut self) -> Result<(), GraphError> {
        self.released = true;
        let result = self.graph.exit_scope(&self.ctx).await;
        debug!("Released tenant scope {}", self.ctx);
        result
    }
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        if !self.released {
            warn!("Tenant scope {} dropped without release", self.ctx);
        }
    }
}
