//! In-memory implementations of the Graphmine service traits
//!
//! Everything the extraction worker consumes (the job queue, the property
//! graph, documents and chunks, embeddings, template packs, settings,
//! verification, notifications, structured logs) implemented over
//! `RwLock`-guarded maps. Used by the worker's integration tests and the
//! development binary; a production deployment swaps these for real
//! adapters.

mod graph;
mod jobs;
mod services;

pub use graph::InMemoryGraph;
pub use jobs::InMemoryJobStore;
pub use services::{
    InMemoryChunker, InMemoryDocuments, InMemoryEmbeddings, InMemoryProjects, InMemorySettings,
    InMemoryTemplatePacks, RecordedNotification, RecordingLogger, RecordingNotifier,
    StaticVerifier,
};
