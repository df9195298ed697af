//! Graphmine extraction worker service binary
//!
//! Loads configuration (YAML file plus `GRAPHMINE_` environment
//! variables), wires the in-memory service adapters for development runs,
//! and polls the job queue until interrupted. Production deployments
//! replace the in-memory wiring with real adapters.

use clap::Parser;
use graphmine_adapter_in_memory::{
    InMemoryChunker, InMemoryDocuments, InMemoryEmbeddings, InMemoryGraph, InMemoryJobStore,
    InMemoryProjects, InMemorySettings, InMemoryTemplatePacks, RecordingLogger, RecordingNotifier,
    StaticVerifier,
};
use graphmine_worker::coordinator::{ExtractionWorker, JobCoordinator, WorkerServices};
use graphmine_worker::provider::create_provider;
use graphmine_worker::WorkerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphmine-worker")]
#[command(about = "Extraction pipeline worker for the Graphmine knowledge graph")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match WorkerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let provider = match create_provider(&config) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Provider error: {}", e);
            std::process::exit(1);
        }
    };

    let job_store = Arc::new(InMemoryJobStore::new());
    let services = WorkerServices {
        job_store: job_store.clone(),
        projects: Arc::new(InMemoryProjects::new()),
        graph: Arc::new(InMemoryGraph::new()),
        documents: Arc::new(InMemoryDocuments::new()),
        chunker: Arc::new(InMemoryChunker::new()),
        embeddings: Arc::new(InMemoryEmbeddings::new()),
        template_packs: Arc::new(InMemoryTemplatePacks::new()),
        settings: Arc::new(InMemorySettings::new()),
        verifier: Some(Arc::new(StaticVerifier::new())),
        notifier: Arc::new(RecordingNotifier::new()),
        structured_logger: Arc::new(RecordingLogger::new()),
        provider,
    };

    let coordinator = Arc::new(JobCoordinator::new(config.clone(), services));
    let worker = ExtractionWorker::new(coordinator, job_store, &config);

    if let Err(e) = worker.start().await {
        error!("Worker startup failed: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Signal handling failed: {}", e);
    }
    info!("Shutting down, awaiting in-flight batch");
    worker.stop().await;

    let stats = worker.stats();
    info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Worker stopped"
    );
}
