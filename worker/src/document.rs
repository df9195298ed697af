//! Source preparation: content, chunks, and chunk embeddings
//!
//! Document-sourced jobs must end up with persisted chunks (created on
//! demand with the project's chunking config) and, when embeddings are
//! enabled, an embedding per chunk. Manual jobs chunk inline text in
//! memory without persistence. Any failure to produce content or chunks is
//! fatal for the job; embedding failures are not.

use graphmine_core::errors::JobError;
use graphmine_core::traits::{ChunkerService, DocumentsService, EmbeddingsService};
use graphmine_core::types::{Chunk, Job, Project, SourceType};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prepared source ready for extraction
#[derive(Debug)]
pub struct PreparedDocument {
    /// Full source text
    pub content: String,
    /// Persisted chunk ids; empty for manual sources
    pub chunk_ids: Vec<Uuid>,
    /// Chunk texts in index order
    pub chunk_texts: Vec<String>,
    /// Chunk embeddings where available, aligned with `chunk_ids`
    pub chunk_embeddings: Vec<Vec<f32>>,
    /// Whether chunks were created during preparation
    pub chunks_created: bool,
    /// How many embeddings were generated on demand
    pub embeddings_generated: usize,
}

/// Ensures source content, chunks, and embeddings exist before extraction
pub struct DocumentPreparer {
    documents: Arc<dyn DocumentsService>,
    chunker: Arc<dyn ChunkerService>,
    embeddings: Arc<dyn EmbeddingsService>,
    embeddings_enabled: bool,
}

impl DocumentPreparer {
    pub fn new(
        documents: Arc<dyn DocumentsService>,
        chunker: Arc<dyn ChunkerService>,
        embeddings: Arc<dyn EmbeddingsService>,
        embeddings_enabled: bool,
    ) -> Self {
        Self {
            documents,
            chunker,
            embeddings,
            embeddings_enabled,
        }
    }

    /// Prepare the job's source for extraction
    pub async fn prepare(&self, job: &Job, project: &Project) -> Result<PreparedDocument, JobError> {
        match job.source_type {
            SourceType::Document => self.prepare_document(job, project).await,
            SourceType::Manual => self.prepare_manual(job).await,
            SourceType::Api | SourceType::BulkImport => Err(JobError::Input(format!(
                "Source type {} is not supported by this worker",
                job.source_type
            ))),
        }
    }

    async fn prepare_document(
        &self,
        job: &Job,
        project: &Project,
    ) -> Result<PreparedDocument, JobError> {
        let document_id = job
            .source_id
            .as_deref()
            .ok_or_else(|| JobError::Input("Document job without source_id".to_string()))?;

        let document = self
            .documents
            .get_document(document_id)
            .await
            .map_err(|e| JobError::Input(format!("Failed to load document {}: {}", document_id, e)))?
            .ok_or_else(|| JobError::Input(format!("Document not found: {}", document_id)))?;

        let mut chunks = self
            .documents
            .list_chunks(document_id)
            .await
            .map_err(|e| JobError::Input(format!("Failed to list chunks: {}", e)))?;

        let mut chunks_created = false;
        if chunks.is_empty() {
            let drafts = self
                .chunker
                .chunk_with_metadata(&document.content, project.chunking_config.as_ref())
                .await
                .map_err(|e| JobError::Input(format!("Chunking failed: {}", e)))?;
            chunks = self
                .documents
                .create_chunks(document_id, drafts)
                .await
                .map_err(|e| JobError::Input(format!("Failed to persist chunks: {}", e)))?;
            chunks_created = true;
            info!(document_id, count = chunks.len(), "Created chunks on demand");
        }

        if chunks.is_empty() {
            return Err(JobError::Input(format!(
                "Document {} produced no chunks",
                document_id
            )));
        }

        let embeddings_generated = if self.embeddings_enabled {
            self.ensure_embeddings(&mut chunks).await
        } else {
            0
        };

        debug!(
            document_id,
            chunks = chunks.len(),
            chunks_created,
            embeddings_generated,
            "Document prepared"
        );

        Ok(PreparedDocument {
            content: document.content,
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
            chunk_texts: chunks.iter().map(|c| c.text.clone()).collect(),
            chunk_embeddings: chunks
                .iter()
                .filter_map(|c| c.embedding.clone())
                .collect(),
            chunks_created,
            embeddings_generated,
        })
    }

    async fn prepare_manual(&self, job: &Job) -> Result<PreparedDocument, JobError> {
        let content = job
            .inline_text()
            .ok_or_else(|| JobError::Input("Manual job without inline text".to_string()))?
            .to_string();
        if content.trim().is_empty() {
            return Err(JobError::Input("Manual job with empty text".to_string()));
        }

        // Chunk in memory for relationship-building purposes only
        let drafts = self
            .chunker
            .chunk_with_metadata(&content, None)
            .await
            .unwrap_or_else(|e| {
                warn!("In-memory chunking failed, using whole text: {}", e);
                vec![graphmine_core::types::ChunkDraft {
                    text: content.clone(),
                    metadata: json!({}),
                }]
            });

        Ok(PreparedDocument {
            content,
            chunk_ids: Vec::new(),
            chunk_texts: drafts.into_iter().map(|d| d.text).collect(),
            chunk_embeddings: Vec::new(),
            chunks_created: false,
            embeddings_generated: 0,
        })
    }

    /// Generate embeddings for chunks lacking one. Failures are warned and
    /// skipped; extraction proceeds without them.
    async fn ensure_embeddings(&self, chunks: &mut [Chunk]) -> usize {
        let missing: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return 0;
        }

        let texts: Vec<String> = missing.iter().map(|&i| chunks[i].text.clone()).collect();
        let vectors = match self.embeddings.embed_documents(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("Embedding generation failed: {}", e);
                return 0;
            }
        };

        let mut generated = 0;
        for (&index, vector) in missing.iter().zip(vectors.into_iter()) {
            match self
                .documents
                .set_chunk_embedding(chunks[index].id, vector.clone())
                .await
            {
                Ok(()) => {
                    chunks[index].embedding = Some(vector);
                    generated += 1;
                }
                Err(e) => warn!(chunk_id = %chunks[index].id, "Failed to store embedding: {}", e),
            }
        }
        generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphmine_core::errors::ServiceError;
    use graphmine_core::types::{ChunkDraft, ChunkingConfig, DocumentRecord, OrganizationId, ProjectId};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct FakeDocuments {
        document: Option<DocumentRecord>,
        chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    }

    #[async_trait]
    impl DocumentsService for FakeDocuments {
        async fn get_document(&self, _id: &str) -> Result<Option<DocumentRecord>, ServiceError> {
            Ok(self.document.clone())
        }

        async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, ServiceError> {
            Ok(self
                .chunks
                .read()
                .await
                .get(document_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_chunks(
            &self,
            document_id: &str,
            drafts: Vec<ChunkDraft>,
        ) -> Result<Vec<Chunk>, ServiceError> {
            let created: Vec<Chunk> = drafts
                .into_iter()
                .enumerate()
                .map(|(i, d)| Chunk {
                    id: Uuid::new_v4(),
                    document_id: document_id.to_string(),
                    index: i as u32,
                    text: d.text,
                    metadata: d.metadata,
                    embedding: None,
                })
                .collect();
            self.chunks
                .write()
                .await
                .insert(document_id.to_string(), created.clone());
            Ok(created)
        }

        async fn set_chunk_embedding(
            &self,
            chunk_id: Uuid,
            embedding: Vec<f32>,
        ) -> Result<(), ServiceError> {
            let mut chunks = self.chunks.write().await;
            for list in chunks.values_mut() {
                if let Some(chunk) = list.iter_mut().find(|c| c.id == chunk_id) {
                    chunk.embedding = Some(embedding);
                    return Ok(());
                }
            }
            Err(ServiceError::NotFound(chunk_id.to_string()))
        }
    }

    struct ParagraphChunker;

    #[async_trait]
    impl ChunkerService for ParagraphChunker {
        async fn chunk_with_metadata(
            &self,
            text: &str,
            _config: Option<&ChunkingConfig>,
        ) -> Result<Vec<ChunkDraft>, ServiceError> {
            Ok(text
                .split("\n\n")
                .filter(|p| !p.trim().is_empty())
                .map(|p| ChunkDraft {
                    text: p.trim().to_string(),
                    metadata: json!({}),
                })
                .collect())
        }
    }

    struct UnitEmbeddings;

    #[async_trait]
    impl EmbeddingsService for UnitEmbeddings {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn project() -> Project {
        Project::new(ProjectId::new("proj-1"), OrganizationId::new("org-1"))
    }

    fn preparer(document: Option<DocumentRecord>, embeddings_enabled: bool) -> DocumentPreparer {
        DocumentPreparer::new(
            Arc::new(FakeDocuments {
                document,
                chunks: RwLock::new(HashMap::new()),
            }),
            Arc::new(ParagraphChunker),
            Arc::new(UnitEmbeddings),
            embeddings_enabled,
        )
    }

    fn document_record(content: &str) -> DocumentRecord {
        DocumentRecord {
            id: "doc-1".to_string(),
            project_id: ProjectId::new("proj-1"),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_document_chunks_are_created_and_embedded_on_demand() {
        let preparer = preparer(Some(document_record("First.\n\nSecond.")), true);
        let job = Job::new(SourceType::Document, ProjectId::new("proj-1")).with_source_id("doc-1");

        let prepared = preparer.prepare(&job, &project()).await.unwrap();
        assert!(prepared.chunks_created);
        assert_eq!(prepared.chunk_ids.len(), 2);
        assert_eq!(prepared.chunk_texts, vec!["First.", "Second."]);
        assert_eq!(prepared.embeddings_generated, 2);
        assert_eq!(prepared.chunk_embeddings.len(), 2);
    }

    #[tokio::test]
    async fn test_embeddings_disabled_skips_generation() {
        let preparer = preparer(Some(document_record("Only paragraph.")), false);
        let job = Job::new(SourceType::Document, ProjectId::new("proj-1")).with_source_id("doc-1");

        let prepared = preparer.prepare(&job, &project()).await.unwrap();
        assert_eq!(prepared.embeddings_generated, 0);
        assert!(prepared.chunk_embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_is_fatal() {
        let preparer = preparer(None, false);
        let job = Job::new(SourceType::Document, ProjectId::new("proj-1")).with_source_id("doc-1");

        let err = preparer.prepare(&job, &project()).await.unwrap_err();
        assert!(matches!(err, JobError::Input(_)));
    }

    #[tokio::test]
    async fn test_manual_source_chunks_in_memory_without_persisting() {
        let preparer = preparer(None, true);
        let job = Job::new(SourceType::Manual, ProjectId::new("proj-1"))
            .with_source_metadata(json!({"text": "Inline.\n\nBody."}));

        let prepared = preparer.prepare(&job, &project()).await.unwrap();
        assert!(prepared.chunk_ids.is_empty());
        assert_eq!(prepared.chunk_texts.len(), 2);
        assert_eq!(prepared.content, "Inline.\n\nBody.");
    }

    #[tokio::test]
    async fn test_unsupported_source_types_fail_fast() {
        let preparer = preparer(None, false);
        let job = Job::new(SourceType::Api, ProjectId::new("proj-1"));

        let err = preparer.prepare(&job, &project()).await.unwrap_err();
        assert!(matches!(err, JobError::Input(_)));
    }
}
