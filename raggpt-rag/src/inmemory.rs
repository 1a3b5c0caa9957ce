//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` of copy-on-write collections protected by a `tokio::sync::RwLock`.
//! Durability comes from persisting collections to disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::collection::{Collection, CollectionMetadata};
use crate::document::{Chunk, EmbeddingVector, RetrievalResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{CollectionLocks, VectorStore};

/// An in-memory vector store using cosine similarity for search.
///
/// Each collection is an immutable `Arc<Collection>`. Writers build a new
/// value and swap it in under the write lock; readers clone the `Arc` under
/// the read lock and search without holding it.
///
/// # Example
///
/// ```rust,ignore
/// use raggpt_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// let name = store.load(Path::new("data/vectordb/processed")).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    build_locks: CollectionLocks,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, collection: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, entries: Vec<(Chunk, EmbeddingVector)>) -> Result<()> {
        let Some((_, first)) = entries.first() else {
            return Ok(());
        };

        let mut collections = self.collections.write().await;
        let mut updated = match collections.get(collection) {
            Some(existing) => Collection::clone(existing),
            None => Collection::new(collection, first.model_id.clone(), first.dimensions()),
        };
        let count = entries.len();
        updated.upsert(entries)?;
        collections.insert(collection.to_string(), Arc::new(updated));

        debug!(collection, chunk_count = count, "upserted entries");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be greater than zero".to_string()));
        }
        let current = self.get(collection).await?;
        current.search(query, k)
    }

    async fn delete_document(&self, collection: &str, document: &str) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let existing = collections
            .get(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        let mut updated = Collection::clone(existing);
        let removed = updated.remove_document(document);
        collections.insert(collection.to_string(), Arc::new(updated));
        Ok(removed)
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionMetadata> {
        Ok(self.get(collection).await?.metadata().clone())
    }

    async fn contains(&self, collection: &str) -> bool {
        self.collections.read().await.contains_key(collection)
    }

    async fn snapshot(&self, collection: &str) -> Option<Arc<Collection>> {
        self.collections.read().await.get(collection).cloned()
    }

    async fn install(&self, collection: Collection) {
        let name = collection.name().to_string();
        let chunk_count = collection.len();
        self.collections.write().await.insert(name.clone(), Arc::new(collection));
        debug!(collection = %name, chunk_count, "installed collection");
    }

    async fn persist(&self, collection: &str, directory: &Path) -> Result<()> {
        let current = self.get(collection).await?;
        current.persist(directory).await
    }

    async fn load(&self, directory: &Path) -> Result<String> {
        let collection = Collection::load(directory).await?;
        let name = collection.name().to_string();
        info!(
            collection = %name,
            dir = %directory.display(),
            chunk_count = collection.len(),
            "loaded collection"
        );
        self.install(collection).await;
        Ok(name)
    }

    async fn lock_collection(&self, collection: &str) -> OwnedMutexGuard<()> {
        self.build_locks.acquire(collection).await
    }
}
