//! Embedding providers and the batching client built on top of them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, error};

use crate::document::EmbeddingVector;
use crate::error::{RagError, Result};

/// Default number of texts sent per provider call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

/// Sub-batches in flight at once inside [`EmbeddingClient::embed`].
const MAX_CONCURRENT_BATCHES: usize = 4;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. For a fixed [`model_id`](EmbeddingProvider::model_id) and input
/// the output must be deterministic.
///
/// # Example
///
/// ```rust,ignore
/// use raggpt_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embeddings = provider.embed_batch(&["hello world"]).await?;
/// assert_eq!(embeddings[0].len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model; recorded in every collection built with it.
    fn model_id(&self) -> &str;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Largest batch the backing service accepts in one call.
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    /// Generate embedding vectors for a batch of text inputs, one per input, in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text]).await?.into_iter().next().ok_or_else(|| {
            RagError::EmbeddingService {
                provider: self.model_id().to_string(),
                message: "provider returned no embedding".to_string(),
            }
        })
    }
}

/// Splits requests into provider-sized sub-batches and tags the results.
///
/// Results come back in input order. A failed or short sub-batch fails the
/// whole call; there are no partial results.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient").field("model_id", &self.provider.model_id()).finish()
    }
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed every text, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingService`] if any sub-batch fails or returns
    /// the wrong number or size of vectors.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model_id = self.provider.model_id().to_string();
        let batch_size = self.provider.max_batch_size().max(1);
        debug!(model = %model_id, text_count = texts.len(), batch_size, "embedding texts");

        let sub_batches: Vec<_> =
            texts.chunks(batch_size).map(|batch| self.embed_sub_batch(batch)).collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(sub_batches)
            .buffered(MAX_CONCURRENT_BATCHES)
            .try_collect()
            .await?;

        Ok(batches
            .into_iter()
            .flatten()
            .map(|values| EmbeddingVector::new(model_id.clone(), values))
            .collect())
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed(&[text]).await?;
        vectors.pop().ok_or_else(|| self.service_error("provider returned no embedding"))
    }

    async fn embed_sub_batch(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.provider.embed_batch(batch).await.map_err(|e| {
            error!(model = %self.model_id(), error = %e, "embedding sub-batch failed");
            match e {
                RagError::EmbeddingService { .. } => e,
                other => self.service_error(other.to_string()),
            }
        })?;

        if vectors.len() != batch.len() {
            return Err(self.service_error(format!(
                "expected {} embeddings, provider returned {}",
                batch.len(),
                vectors.len()
            )));
        }
        let dimensions = self.provider.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(self.service_error(format!(
                "expected {dimensions}-dimensional embeddings, provider returned {}",
                bad.len()
            )));
        }
        Ok(vectors)
    }

    fn service_error(&self, message: impl Into<String>) -> RagError {
        RagError::EmbeddingService {
            provider: self.provider.model_id().to_string(),
            message: message.into(),
        }
    }
}

/// Embedding clients keyed by model identifier.
///
/// Query-time code resolves the client from a collection's recorded model id,
/// so a query is always embedded by the model that built the collection.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingRegistry {
    clients: HashMap<String, EmbeddingClient>,
}

impl EmbeddingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own model id, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn EmbeddingProvider>) {
        let client = EmbeddingClient::new(provider);
        self.clients.insert(client.model_id().to_string(), client);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Look up the client for a model id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if no provider is registered for it.
    pub fn client(&self, model_id: &str) -> Result<EmbeddingClient> {
        self.clients.get(model_id).cloned().ok_or_else(|| {
            RagError::InvalidConfiguration(format!(
                "no embedding provider registered for model '{model_id}'"
            ))
        })
    }
}

/// Deterministic offline embeddings from hashed word tokens.
///
/// Every lowercase alphanumeric token is hashed into one of `dimensions`
/// buckets with a sign bit, and the result is L2-normalised. Texts sharing
/// vocabulary land close together; identical texts get identical vectors.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    model_id: String,
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider with model id `hash-{dimensions}`.
    pub fn new(dimensions: usize) -> Self {
        Self { model_id: format!("hash-{dimensions}"), dimensions: dimensions.max(1) }
    }

    /// Override the model id.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimensions];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|x| *x /= norm);
        }
        values
    }
}

fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    token.bytes().fold(OFFSET, |acc, b| (acc ^ u64::from(b)).wrapping_mul(PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}
