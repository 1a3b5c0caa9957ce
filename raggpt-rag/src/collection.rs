//! Collections: named sets of chunk vectors plus the metadata that makes them comparable.
//!
//! A persisted collection is a directory holding:
//!
//! - `metadata.json`: [`CollectionMetadata`] (model id, dimensionality, chunk policy,
//!   per-document content hashes) plus the name of the current index file
//! - `index-<token>.json`: every chunk with its vector
//!
//! Each persist writes a new index file, then replaces `metadata.json` with a
//! single rename. That rename is the commit point: until it happens, readers
//! see the previous metadata and the previous index file.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ChunkPolicy;
use crate::document::{Chunk, EmbeddingVector, RetrievalResult, SearchResult};
use crate::error::{RagError, Result};

const METADATA_FILE: &str = "metadata.json";
const LEGACY_INDEX_FILE: &str = "index.json";

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What was ingested for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRecord {
    /// SHA-256 of the ingested text.
    pub content_hash: String,
    /// Number of chunks stored for the document.
    pub chunk_count: usize,
}

/// Identity and policy of a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionMetadata {
    pub name: String,
    pub embedding_model_id: String,
    pub dimensions: usize,
    /// Set when the collection was built from documents by the index builder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_policy: Option<ChunkPolicy>,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    name: String,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedMetadata {
    #[serde(flatten)]
    metadata: CollectionMetadata,
    #[serde(default = "legacy_index_file")]
    index_file: String,
}

fn legacy_index_file() -> String {
    LEGACY_INDEX_FILE.to_string()
}

/// A named collection of chunk vectors sharing one embedding model.
///
/// Entries are keyed by chunk ID; upserting an existing ID replaces it.
#[derive(Debug, Clone)]
pub struct Collection {
    metadata: CollectionMetadata,
    entries: BTreeMap<String, StoredEntry>,
    directory: Option<PathBuf>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(
        name: impl Into<String>,
        embedding_model_id: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            metadata: CollectionMetadata {
                name: name.into(),
                embedding_model_id: embedding_model_id.into(),
                dimensions,
                chunk_policy: None,
                documents: BTreeMap::new(),
            },
            entries: BTreeMap::new(),
            directory: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &CollectionMetadata {
        &self.metadata
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The directory this collection was loaded from or is persisted in.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Tie the collection to the directory it is persisted in.
    pub fn bind_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = Some(directory.into());
    }

    pub fn set_chunk_policy(&mut self, policy: ChunkPolicy) {
        self.metadata.chunk_policy = Some(policy);
    }

    /// Record the content hash and chunk count of an ingested document.
    pub fn record_document(&mut self, name: impl Into<String>, record: DocumentRecord) {
        self.metadata.documents.insert(name.into(), record);
    }

    /// Chunks stored for one document, in sequence order.
    pub fn document_chunks(&self, document: &str) -> Vec<&Chunk> {
        let mut chunks: Vec<&Chunk> = self
            .entries
            .values()
            .filter(|entry| entry.chunk.document == document)
            .map(|entry| &entry.chunk)
            .collect();
        chunks.sort_by_key(|chunk| chunk.index);
        chunks
    }

    /// Check a vector against the collection's model and dimensionality.
    pub fn check_vector(&self, vector: &EmbeddingVector) -> Result<()> {
        if vector.model_id != self.metadata.embedding_model_id {
            return Err(RagError::CollectionPolicyMismatch {
                collection: self.metadata.name.clone(),
                detail: format!(
                    "collection uses embedding model '{}', vector came from '{}'",
                    self.metadata.embedding_model_id, vector.model_id
                ),
            });
        }
        if vector.dimensions() != self.metadata.dimensions {
            return Err(RagError::DimensionMismatch {
                collection: self.metadata.name.clone(),
                expected: self.metadata.dimensions,
                actual: vector.dimensions(),
            });
        }
        Ok(())
    }

    /// Add entries. Either all entries are added or, on error, none are.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] or [`RagError::CollectionPolicyMismatch`]
    /// if any vector disagrees with the collection.
    pub fn upsert(&mut self, entries: Vec<(Chunk, EmbeddingVector)>) -> Result<()> {
        for (_, vector) in &entries {
            self.check_vector(vector)?;
        }
        for (chunk, vector) in entries {
            self.entries.insert(chunk.id.clone(), StoredEntry { chunk, vector: vector.values });
        }
        Ok(())
    }

    /// Remove every chunk of a document and its record. Returns the number of chunks removed.
    pub fn remove_document(&mut self, document: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.chunk.document != document);
        self.metadata.documents.remove(document);
        before - self.entries.len()
    }

    /// Rank stored chunks by cosine similarity to `query`.
    ///
    /// Ties are broken by chunk ID so results are fully deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `k == 0`, and the errors of
    /// [`check_vector`](Self::check_vector) for an incomparable query.
    pub fn search(&self, query: &EmbeddingVector, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be greater than zero".to_string()));
        }
        self.check_vector(query)?;

        let mut scored: Vec<(&String, f32)> = self
            .entries
            .iter()
            .map(|(id, entry)| (id, cosine_similarity(&entry.vector, &query.values)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, score)| SearchResult { chunk: self.entries[id].chunk.clone(), score })
            .collect())
    }

    /// Write the collection into `directory`, creating it if needed.
    ///
    /// If this fails, the directory still describes the previously persisted
    /// state: the new index file is only referenced once `metadata.json` has
    /// been replaced.
    pub async fn persist(&self, directory: &Path) -> Result<()> {
        tokio::fs::create_dir_all(directory).await?;

        let token = write_token();
        let index_file = format!("index-{token}.json");
        let index = PersistedIndex {
            name: self.metadata.name.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        let record =
            PersistedMetadata { metadata: self.metadata.clone(), index_file: index_file.clone() };
        let index_json = serde_json::to_vec(&index)?;
        let metadata_json = serde_json::to_vec_pretty(&record)?;

        let previous = read_record(directory).await.ok().map(|record| record.index_file);
        tokio::fs::write(directory.join(&index_file), &index_json).await?;
        let metadata_tmp = directory.join(format!("{METADATA_FILE}.{token}.tmp"));
        let committed = match tokio::fs::write(&metadata_tmp, &metadata_json).await {
            Ok(()) => tokio::fs::rename(&metadata_tmp, directory.join(METADATA_FILE)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            let _ = tokio::fs::remove_file(&metadata_tmp).await;
            let _ = tokio::fs::remove_file(directory.join(&index_file)).await;
            return Err(e.into());
        }

        if let Some(previous) = previous.filter(|previous| *previous != index_file) {
            remove_index_file(directory, &previous).await;
        }
        debug!(
            collection = %self.metadata.name,
            dir = %directory.display(),
            index_file = %index_file,
            chunk_count = self.len(),
            "persisted collection"
        );
        Ok(())
    }

    /// Whether `directory` holds a persisted collection.
    pub async fn exists(directory: &Path) -> bool {
        tokio::fs::try_exists(directory.join(METADATA_FILE)).await.unwrap_or(false)
    }

    /// Read only the metadata record of a persisted collection.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CollectionNotFound`] if `directory` holds no collection.
    pub async fn read_metadata(directory: &Path) -> Result<CollectionMetadata> {
        Ok(read_record(directory).await?.metadata)
    }

    /// Load a collection previously written by [`persist`](Self::persist).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::CollectionNotFound`] if `directory` holds no collection, and
    /// [`RagError::DimensionMismatch`] if a stored vector disagrees with the metadata.
    pub async fn load(directory: &Path) -> Result<Self> {
        let PersistedMetadata { metadata, index_file } = read_record(directory).await?;
        let bytes = read_existing(directory, &index_file).await?;
        let index: PersistedIndex = serde_json::from_slice(&bytes)?;

        let mut entries = BTreeMap::new();
        for entry in index.entries {
            if entry.vector.len() != metadata.dimensions {
                return Err(RagError::DimensionMismatch {
                    collection: metadata.name.clone(),
                    expected: metadata.dimensions,
                    actual: entry.vector.len(),
                });
            }
            entries.insert(entry.chunk.id.clone(), entry);
        }
        Ok(Self { metadata, entries, directory: Some(directory.to_path_buf()) })
    }
}

/// A file-name token unique across writers and process restarts.
fn write_token() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());
    let count = WRITE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    format!("{nanos:x}-{:x}-{count:x}", std::process::id())
}

async fn read_record(directory: &Path) -> Result<PersistedMetadata> {
    let bytes = read_existing(directory, METADATA_FILE).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Delete the index file a superseded metadata record pointed at.
///
/// Best effort: a leftover file is only wasted space.
async fn remove_index_file(directory: &Path, file: &str) {
    match tokio::fs::remove_file(directory.join(file)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file, error = %e, "could not remove superseded index file"),
    }
}

async fn read_existing(directory: &Path, file: &str) -> Result<Vec<u8>> {
    match tokio::fs::read(directory.join(file)).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RagError::CollectionNotFound(directory.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
