//! # Graphmine Worker
//!
//! The extraction pipeline worker: polls the durable job queue, prepares
//! source documents, drives the LLM provider under a token budget, applies
//! confidence-based quality gates, links candidates against existing graph
//! content, and persists the survivors with provenance links back to the
//! source chunks.

pub mod config;
pub mod context_loader;
pub mod coordinator;
pub mod document;
pub mod linker;
pub mod orchestrator;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod schema_resolver;
pub mod verify;
pub mod writer;

pub use config::WorkerConfig;
pub use coordinator::{ExtractionWorker, JobCoordinator, WorkerServices};
pub use rate_limit::TokenBudgetLimiter;
