//! Query-time retrieval against a collection.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::collection::{Collection, CollectionMetadata};
use crate::document::{EmbeddingVector, RetrievalResult};
use crate::embedding::EmbeddingRegistry;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Embeds queries with the model a collection was built with and searches it.
///
/// Retrieval never mutates the index, so any number of queries may run
/// concurrently with each other and with a build.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    registry: EmbeddingRegistry,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, registry: EmbeddingRegistry) -> Self {
        Self { store, registry }
    }

    /// Make a persisted collection resident if it is not already.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CollectionNotFound`] if the collection is neither resident
    /// nor persisted in `directory`, and [`RagError::CollectionPolicyMismatch`] if
    /// `directory` holds a collection with another name.
    pub async fn open(&self, collection: &str, directory: &Path) -> Result<CollectionMetadata> {
        if let Ok(metadata) = self.store.collection_info(collection).await {
            return Ok(metadata);
        }
        if !Collection::exists(directory).await {
            return Err(RagError::CollectionNotFound(collection.to_string()));
        }

        let metadata = Collection::read_metadata(directory).await?;
        if metadata.name != collection {
            return Err(RagError::CollectionPolicyMismatch {
                collection: collection.to_string(),
                detail: format!("{} holds collection '{}'", directory.display(), metadata.name),
            });
        }
        self.store.load(directory).await?;
        info!(collection, dir = %directory.display(), "opened persisted collection");
        self.store.collection_info(collection).await
    }

    /// Embed `query` with the collection's recorded embedding model.
    ///
    /// # Errors
    ///
    /// - [`RagError::CollectionNotFound`] if the collection is not resident
    /// - [`RagError::InvalidConfiguration`] if no provider is registered for its model
    /// - [`RagError::EmbeddingService`] if embedding fails
    pub async fn embed_query(&self, collection: &str, query: &str) -> Result<EmbeddingVector> {
        let metadata = self.store.collection_info(collection).await?;
        let client = self.registry.client(&metadata.embedding_model_id)?;
        client.embed_query(query).await
    }

    /// Search a collection with an already embedded query.
    pub async fn search(
        &self,
        collection: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<RetrievalResult> {
        let results = self.store.search(collection, query, k).await?;
        debug!(collection, k, result_count = results.len(), "search completed");
        Ok(results)
    }

    /// Return at most `k` chunks relevant to `query`, relevance-descending.
    ///
    /// A collection with fewer than `k` chunks returns all of them.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `k == 0`, plus the errors of
    /// [`embed_query`](Self::embed_query).
    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        k: usize,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be greater than zero".to_string()));
        }
        let vector = self.embed_query(collection, query).await?;
        self.search(collection, &vector, k).await
    }
}
