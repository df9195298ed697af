//! # Graphmine Core
//!
//! Core types, traits, and business logic for the Graphmine extraction
//! pipeline. This crate defines the data model for extraction jobs and
//! graph records, the service contracts the worker consumes, and the pure
//! pieces of the pipeline (schema merging, confidence scoring, quality
//! gating, timeline recording).

pub mod errors;
pub mod quality;
pub mod schema;
pub mod tenant;
pub mod timeline;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use errors::{CoreError, GraphError, JobError, LlmError, StoreError};
pub use tenant::{TenantContext, TenantScope};
pub use timeline::{StepStatus, Timeline, TimelineEvent};
pub use traits::{GraphService, JobStore, LlmProvider};
pub use types::{Job, JobId, JobStatus, OrganizationId, ProjectId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::quality::*;
    pub use crate::schema::*;
    pub use crate::tenant::*;
    pub use crate::timeline::*;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
