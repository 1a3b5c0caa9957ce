//! Configuration for the RAG pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Inclusive range accepted for the generation temperature.
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

/// The instruction placed at the top of every prompt unless overridden.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a chatbot. Each prompt contains the chat \
history, content retrieved from the user's documents together with its source, and the user's \
new question. Answer the new question using the retrieved content. If the retrieved content \
does not contain the answer, say that you do not know.";

/// How documents are cut into chunks. Recorded with every collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of one document.
    pub chunk_overlap: usize,
}

impl ChunkPolicy {
    /// Create a validated chunk policy.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let policy = Self { chunk_size, chunk_overlap };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the chunk policy constraints.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self { chunk_size: 1500, chunk_overlap: 500 }
    }
}

/// Configuration parameters for ingestion, retrieval, and generation.
///
/// Passed explicitly into the index builder, retriever, and chat engine;
/// there is no process-wide settings instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Embedding model identifier new collections are created with.
    pub embedding_model_id: String,
    /// Chunk policy new collections are created with.
    pub chunk_policy: ChunkPolicy,
    /// Number of chunks to retrieve per query.
    pub top_k: usize,
    /// Prompt budget in characters (system instruction + message).
    pub max_context_units: usize,
    /// Number of most recent conversation turns offered to the prompt.
    pub history_window: usize,
    /// Default generation temperature.
    pub temperature: f32,
    /// Instruction placed at the top of every prompt.
    pub system_instruction: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_model_id: "text-embedding-ada-002".to_string(),
            chunk_policy: ChunkPolicy::default(),
            top_k: 3,
            max_context_units: 12_000,
            history_window: 2,
            temperature: 0.0,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Re-run the builder checks on an already constructed value.
    pub fn validate(&self) -> Result<()> {
        self.chunk_policy.validate()?;
        if self.embedding_model_id.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(
                "embedding_model_id must not be empty".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(RagError::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if self.max_context_units == 0 {
            return Err(RagError::InvalidConfiguration(
                "max_context_units must be greater than zero".to_string(),
            ));
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(RagError::InvalidConfiguration(format!(
                "temperature ({}) must be within {:?}",
                self.temperature, TEMPERATURE_RANGE
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the embedding model identifier.
    pub fn embedding_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.embedding_model_id = model_id.into();
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_policy.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_policy.chunk_overlap = overlap;
        self
    }

    /// Set the number of chunks to retrieve per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the prompt budget in characters.
    pub fn max_context_units(mut self, units: usize) -> Self {
        self.config.max_context_units = units;
        self
    }

    /// Set how many recent turns are offered to the prompt.
    pub fn history_window(mut self, turns: usize) -> Self {
        self.config.history_window = turns;
        self
    }

    /// Set the default generation temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Replace the system instruction.
    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.system_instruction = instruction.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0` or `max_context_units == 0`
    /// - `temperature` is outside `0.0..=2.0`
    /// - `embedding_model_id` is blank
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accepts_custom_values() {
        let config = RagConfig::builder()
            .chunk_size(200)
            .chunk_overlap(50)
            .top_k(5)
            .temperature(1.5)
            .build()
            .unwrap();
        assert_eq!(config.chunk_policy, ChunkPolicy { chunk_size: 200, chunk_overlap: 50 });
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfiguration(_)));
        assert!(ChunkPolicy::new(0, 0).is_err());
        assert!(ChunkPolicy::new(10, 0).is_ok());
    }

    #[test]
    fn rejects_out_of_range_temperature_and_zero_k() {
        assert!(RagConfig::builder().temperature(2.5).build().is_err());
        assert!(RagConfig::builder().temperature(-0.1).build().is_err());
        assert!(RagConfig::builder().top_k(0).build().is_err());
        assert!(RagConfig::builder().embedding_model_id("  ").build().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }
}
