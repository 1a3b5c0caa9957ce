//! Data types for documents, chunks, vectors, and search results.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A source document. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Stable source name (file basename).
    pub name: String,
    /// The raw text content.
    pub text: String,
    /// Character offsets at which a new page starts, if the source was paginated.
    ///
    /// `None` means the document carries no page information; `Some(vec![])`
    /// means a single page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_breaks: Option<Vec<usize>>,
}

impl Document {
    /// Create an unpaginated document.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into(), page_breaks: None }
    }

    /// Attach page start offsets (in characters). Offsets are sorted and deduplicated.
    pub fn with_page_breaks(mut self, mut breaks: Vec<usize>) -> Self {
        breaks.sort_unstable();
        breaks.dedup();
        self.page_breaks = Some(breaks);
        self
    }

    /// The 1-based page containing the given character offset.
    pub fn page_at(&self, offset: usize) -> Option<usize> {
        self.page_breaks
            .as_ref()
            .map(|breaks| 1 + breaks.iter().take_while(|start| **start <= offset).count())
    }

    /// SHA-256 of the text, hex encoded. Used for ingestion dedup.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A contiguous span of one [`Document`], the atomic retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Unique identifier, `{document}#{index}`.
    pub id: String,
    /// Name of the parent [`Document`].
    pub document: String,
    /// Position of this chunk within its document.
    pub index: usize,
    /// The chunk text.
    pub text: String,
    /// Start character offset within the document (inclusive).
    pub start: usize,
    /// End character offset within the document (exclusive).
    pub end: usize,
    /// 1-based page of `start`, when the document is paginated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl Chunk {
    /// Human-readable position of the chunk inside its document.
    pub fn locator(&self) -> String {
        match self.page {
            Some(page) => format!("page {page}"),
            None => format!("chars {}-{}", self.start, self.end),
        }
    }
}

/// A fixed-length vector tagged with the model that produced it.
///
/// Vectors are only comparable when their `model_id`s are equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingVector {
    /// Embedding model identifier.
    pub model_id: String,
    /// The vector components.
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(model_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self { model_id: model_id.into(), values }
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is more relevant, 1.0 is identical).
    pub score: f32,
}

/// Ranked search results, relevance-descending, at most `k` long.
pub type RetrievalResult = Vec<SearchResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_lookup_counts_breaks_at_or_before_offset() {
        let doc = Document::new("a.txt", "x".repeat(30)).with_page_breaks(vec![20, 10]);
        assert_eq!(doc.page_at(0), Some(1));
        assert_eq!(doc.page_at(10), Some(2));
        assert_eq!(doc.page_at(25), Some(3));
        assert_eq!(Document::new("b.txt", "y").page_at(0), None);
    }

    #[test]
    fn content_hash_tracks_text_only() {
        let a = Document::new("a.txt", "same");
        let b = Document::new("b.txt", "same");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), Document::new("a.txt", "other").content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn locator_prefers_page() {
        let mut chunk = Chunk {
            id: "a#0".into(),
            document: "a".into(),
            index: 0,
            text: "t".into(),
            start: 3,
            end: 9,
            page: None,
        };
        assert_eq!(chunk.locator(), "chars 3-9");
        chunk.page = Some(2);
        assert_eq!(chunk.locator(), "page 2");
    }
}
