//! Index builder: documents → chunks → embeddings → persisted collection.
//!
//! A build stages the complete next state of the collection before touching
//! anything shared: every changed document is chunked and embedded first,
//! the staged collection is written to disk, and only then installed in the
//! vector store. An embedding failure therefore leaves both the store and the
//! persisted directory exactly as they were.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::collection::{Collection, DocumentRecord};
use crate::config::{ChunkPolicy, RagConfig};
use crate::document::{Chunk, Document, EmbeddingVector};
use crate::embedding::{EmbeddingClient, EmbeddingRegistry};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Outcome of an [`IndexBuilder::build`] call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionSummary {
    pub collection: String,
    /// Documents recorded in the collection after the build.
    pub document_count: usize,
    /// Chunks stored in the collection after the build.
    pub chunk_count: usize,
    /// Documents embedded by this call (new or changed content).
    pub ingested: Vec<String>,
    /// Documents skipped because identical content was already ingested.
    pub skipped: Vec<String>,
}

/// Ingests batches of documents into named, persisted collections.
///
/// Builds on the same collection are serialized through the vector store's
/// [`lock_collection`](VectorStore::lock_collection), so separate builders
/// over one store still take turns. Builds on different collections run
/// concurrently.
///
/// # Example
///
/// ```rust,ignore
/// let builder = IndexBuilder::new(&config, &registry, store.clone())?;
/// let summary = builder.build("uploaded", &documents, Path::new("data/vectordb/uploaded")).await?;
/// println!("{} chunks", summary.chunk_count);
/// ```
#[derive(Clone)]
pub struct IndexBuilder {
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingClient,
    chunker: Arc<dyn Chunker>,
}

struct StagedDocument<'a> {
    document: &'a Document,
    content_hash: String,
    chunks: Vec<Chunk>,
    vectors: Vec<EmbeddingVector>,
}

impl IndexBuilder {
    /// Create a builder using the configured embedding model and chunk policy.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if the chunk policy is invalid or
    /// no provider is registered for `config.embedding_model_id`.
    pub fn new(
        config: &RagConfig,
        registry: &EmbeddingRegistry,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let embedder = registry.client(&config.embedding_model_id)?;
        let chunker = Arc::new(RecursiveChunker::from_policy(config.chunk_policy)?);
        Ok(Self { store, embedder, chunker })
    }

    /// Replace the chunker.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        self.chunker.policy()
    }

    /// Ingest `documents` into `collection`, persisted under `persist_directory`.
    ///
    /// Documents whose name and content hash are already recorded are skipped.
    /// A known name with different content replaces the old version. When the
    /// same name appears more than once in `documents`, the last one wins.
    ///
    /// # Errors
    ///
    /// - [`RagError::CollectionPolicyMismatch`] if the existing collection was built
    ///   with another embedding model or chunk policy, or is persisted in another
    ///   directory
    /// - [`RagError::PartialBatchFailure`] if embedding fails for any document;
    ///   nothing is persisted or installed
    /// - storage errors from persisting the collection
    pub async fn build(
        &self,
        collection: &str,
        documents: &[Document],
        persist_directory: &Path,
    ) -> Result<CollectionSummary> {
        let _guard = self.store.lock_collection(collection).await;
        debug!(collection, document_count = documents.len(), "build started");

        let mut staged = self.base_collection(collection, persist_directory).await?;
        self.check_policy(&staged)?;
        let fresh = staged.metadata().chunk_policy.is_none() && staged.is_empty();
        staged.set_chunk_policy(self.chunk_policy());
        staged.bind_directory(persist_directory);

        let mut skipped = Vec::new();
        let mut pending = Vec::new();
        for document in latest_by_name(documents) {
            let content_hash = document.content_hash();
            let known = staged.metadata().documents.get(&document.name);
            if known.is_some_and(|record| record.content_hash == content_hash) {
                debug!(collection, document = %document.name, "unchanged, skipping");
                skipped.push(document.name.clone());
            } else {
                pending.push((document, content_hash));
            }
        }

        let mut embedded = Vec::with_capacity(pending.len());
        for (document, content_hash) in pending {
            embedded.push(self.embed_document(document, content_hash).await?);
        }

        let mut ingested = Vec::with_capacity(embedded.len());
        for doc in embedded {
            let name = doc.document.name.clone();
            let replaced = staged.remove_document(&name);
            if replaced > 0 {
                info!(collection, document = %name, replaced, "replacing previous version");
            }
            let chunk_count = doc.chunks.len();
            staged.upsert(doc.chunks.into_iter().zip(doc.vectors).collect())?;
            staged.record_document(
                name.clone(),
                DocumentRecord { content_hash: doc.content_hash, chunk_count },
            );
            ingested.push(name);
        }

        if !ingested.is_empty() || fresh || !Collection::exists(persist_directory).await {
            staged.persist(persist_directory).await?;
        }

        let summary = CollectionSummary {
            collection: collection.to_string(),
            document_count: staged.metadata().documents.len(),
            chunk_count: staged.len(),
            ingested,
            skipped,
        };
        self.store.install(staged).await;

        info!(
            collection,
            ingested = summary.ingested.len(),
            skipped = summary.skipped.len(),
            chunk_count = summary.chunk_count,
            "build finished"
        );
        Ok(summary)
    }

    /// The collection as it stands now: resident, persisted, or new and empty.
    ///
    /// A collection name is tied to one directory once it has been persisted.
    async fn base_collection(&self, collection: &str, directory: &Path) -> Result<Collection> {
        if let Some(current) = self.store.snapshot(collection).await {
            if let Some(bound) = current.directory() {
                if bound != directory {
                    return Err(RagError::CollectionPolicyMismatch {
                        collection: collection.to_string(),
                        detail: format!(
                            "collection is persisted in {}, not {}",
                            bound.display(),
                            directory.display()
                        ),
                    });
                }
            }
            return Ok(Collection::clone(&current));
        }
        if Collection::exists(directory).await {
            let loaded = Collection::load(directory).await?;
            if loaded.name() != collection {
                return Err(RagError::CollectionPolicyMismatch {
                    collection: collection.to_string(),
                    detail: format!(
                        "{} holds collection '{}'",
                        directory.display(),
                        loaded.name()
                    ),
                });
            }
            return Ok(loaded);
        }
        Ok(Collection::new(collection, self.model_id(), self.embedder.dimensions()))
    }

    fn check_policy(&self, collection: &Collection) -> Result<()> {
        let metadata = collection.metadata();
        let mismatch = |detail: String| RagError::CollectionPolicyMismatch {
            collection: metadata.name.clone(),
            detail,
        };

        if metadata.embedding_model_id != self.model_id() {
            return Err(mismatch(format!(
                "collection uses embedding model '{}', builder uses '{}'",
                metadata.embedding_model_id,
                self.model_id()
            )));
        }
        if let Some(policy) = metadata.chunk_policy {
            if policy != self.chunk_policy() {
                return Err(mismatch(format!(
                    "collection uses chunk policy {policy:?}, builder uses {:?}",
                    self.chunk_policy()
                )));
            }
        }
        if metadata.dimensions != self.embedder.dimensions() {
            return Err(RagError::DimensionMismatch {
                collection: metadata.name.clone(),
                expected: metadata.dimensions,
                actual: self.embedder.dimensions(),
            });
        }
        Ok(())
    }

    async fn embed_document<'a>(
        &self,
        document: &'a Document,
        content_hash: String,
    ) -> Result<StagedDocument<'a>> {
        let chunks = self.chunker.chunk(document);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let vectors = self.embedder.embed(&texts).await.map_err(|e| {
            error!(document = %document.name, error = %e, "embedding failed during build");
            RagError::PartialBatchFailure {
                document: document.name.clone(),
                message: e.to_string(),
            }
        })?;

        debug!(document = %document.name, chunk_count = chunks.len(), "embedded document");
        Ok(StagedDocument { document, content_hash, chunks, vectors })
    }
}

/// Documents in input order, keeping only the last occurrence of each name.
fn latest_by_name(documents: &[Document]) -> Vec<&Document> {
    let mut latest: Vec<&Document> = Vec::with_capacity(documents.len());
    for document in documents {
        latest.retain(|kept| kept.name != document.name);
        latest.push(document);
    }
    latest
}
