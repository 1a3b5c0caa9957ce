//! Vector store trait for storing, searching, and persisting collections.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::collection::{Collection, CollectionMetadata};
use crate::document::{Chunk, EmbeddingVector, RetrievalResult};
use crate::error::Result;

/// A storage backend for named collections of chunk vectors.
///
/// Every write is visible atomically: a concurrent [`search`](VectorStore::search)
/// observes a collection either entirely before or entirely after an
/// [`upsert`](VectorStore::upsert) or [`install`](VectorStore::install).
///
/// Builds take [`lock_collection`](VectorStore::lock_collection) for the whole
/// read-stage-persist-install sequence, so every builder sharing a store
/// serializes on the same collection name.
///
/// # Example
///
/// ```rust,ignore
/// use raggpt_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert("docs", entries).await?;
/// let results = store.search("docs", &query_vector, 5).await?;
/// store.persist("docs", Path::new("data/vectordb/docs")).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add entries to a collection, creating it from the first entry's model
    /// and dimensionality if absent.
    async fn upsert(&self, collection: &str, entries: Vec<(Chunk, EmbeddingVector)>) -> Result<()>;

    /// Return the `k` chunks most similar to `query`, relevance-descending.
    async fn search(
        &self,
        collection: &str,
        query: &EmbeddingVector,
        k: usize,
    ) -> Result<RetrievalResult>;

    /// Remove every chunk of one document. Returns the number of chunks removed.
    async fn delete_document(&self, collection: &str, document: &str) -> Result<usize>;

    /// Metadata of a resident collection.
    async fn collection_info(&self, collection: &str) -> Result<CollectionMetadata>;

    /// Whether the collection is resident.
    async fn contains(&self, collection: &str) -> bool;

    /// The current state of a resident collection.
    async fn snapshot(&self, collection: &str) -> Option<Arc<Collection>>;

    /// Replace (or create) a collection with a fully prepared value.
    async fn install(&self, collection: Collection);

    /// Write a resident collection into `directory`.
    async fn persist(&self, collection: &str, directory: &Path) -> Result<()>;

    /// Read a persisted collection from `directory`, make it resident, and return its name.
    async fn load(&self, directory: &Path) -> Result<String>;

    /// Exclusive build access to one collection name, held until the guard drops.
    async fn lock_collection(&self, collection: &str) -> OwnedMutexGuard<()>;
}

/// Mutexes keyed by collection name.
#[derive(Debug, Default)]
pub struct CollectionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and hold the lock of `collection`.
    pub async fn acquire(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(collection.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
