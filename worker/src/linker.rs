//! Entity linking against existing graph content
//!
//! For each candidate the linker decides whether to create a new object,
//! merge into an existing one, or skip persistence entirely. Skipping is
//! valid when an existing object is so similar that re-creation adds
//! nothing; the skipped entity is still registered in the batch-local name
//! map so its relationships resolve.

use graphmine_core::tenant::TenantContext;
use graphmine_core::traits::{EmbeddingsService, GraphService};
use graphmine_core::types::{normalize_entity_name, CandidateEntity, LinkingStrategy};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Vector similarity at or above this skips re-creation outright
const SKIP_SIMILARITY: f64 = 0.98;

/// Linking outcome for one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    /// Insert a new object
    Create,
    /// Fold the candidate into an existing object
    Merge { existing: Uuid },
    /// Persist nothing; the existing object (if any) already covers it
    Skip { existing: Option<Uuid> },
}

/// Decides create / merge / skip for candidate entities
pub struct EntityLinker {
    graph: Arc<dyn GraphService>,
    embeddings: Arc<dyn EmbeddingsService>,
}

impl EntityLinker {
    pub fn new(graph: Arc<dyn GraphService>, embeddings: Arc<dyn EmbeddingsService>) -> Self {
        Self { graph, embeddings }
    }

    /// Decide the outcome for one candidate. Lookup failures degrade to
    /// `Create` with a warning; linking must never abort a job.
    pub async fn decide(
        &self,
        ctx: &TenantContext,
        strategy: LinkingStrategy,
        candidate: &CandidateEntity,
        similarity_threshold: f64,
    ) -> LinkDecision {
        match strategy {
            LinkingStrategy::AlwaysNew => LinkDecision::Create,
            LinkingStrategy::KeyMatch => self.decide_key_match(ctx, candidate).await,
            LinkingStrategy::VectorSimilarity => {
                self.decide_vector(ctx, candidate, similarity_threshold).await
            }
        }
    }

    async fn decide_key_match(
        &self,
        ctx: &TenantContext,
        candidate: &CandidateEntity,
    ) -> LinkDecision {
        let normalized = normalize_entity_name(&candidate.name);
        let existing = match self
            .graph
            .find_object_by_key(ctx, &candidate.type_name, &normalized)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Key-match lookup failed, creating: {}", e);
                return LinkDecision::Create;
            }
        };

        match existing {
            Some(object) => {
                // When the candidate brings nothing the object lacks,
                // re-writing it adds no value
                let adds_nothing = candidate.properties.iter().all(|(key, _)| {
                    object
                        .properties
                        .get(key)
                        .map(|value| !value.is_null())
                        .unwrap_or(false)
                });
                if adds_nothing {
                    debug!(name = %candidate.name, "Key match with no new properties, skipping");
                    LinkDecision::Skip {
                        existing: Some(object.id),
                    }
                } else {
                    LinkDecision::Merge {
                        existing: object.id,
                    }
                }
            }
            None => LinkDecision::Create,
        }
    }

    async fn decide_vector(
        &self,
        ctx: &TenantContext,
        candidate: &CandidateEntity,
        similarity_threshold: f64,
    ) -> LinkDecision {
        let text = format!("{} {}", candidate.name, candidate.description);
        let vector = match self.embeddings.embed_documents(&[text]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return LinkDecision::Create,
            Err(e) => {
                warn!("Candidate embedding failed, creating: {}", e);
                return LinkDecision::Create;
            }
        };

        let max_distance = 1.0 - similarity_threshold;
        let matches = match self.graph.search_by_vector(ctx, &vector, 5, max_distance).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Similarity search failed, creating: {}", e);
                return LinkDecision::Create;
            }
        };

        for vector_match in matches {
            let object = match self.graph.get_object(ctx, vector_match.object_id).await {
                Ok(Some(object)) if !object.is_deleted() => object,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Match fetch failed: {}", e);
                    continue;
                }
            };
            if object.object_type != candidate.type_name {
                continue;
            }
            let similarity = 1.0 - vector_match.distance;
            if similarity >= SKIP_SIMILARITY {
                debug!(name = %candidate.name, similarity, "Near-identical object exists, skipping");
                return LinkDecision::Skip {
                    existing: Some(object.id),
                };
            }
            return LinkDecision::Merge {
                existing: object.id,
            };
        }
        LinkDecision::Create
    }
}

/// True when a property value counts as present for merge purposes
pub fn property_present(value: Option<&Value>) -> bool {
    value.map(|v| !v.is_null()).unwrap_or(false)
}
