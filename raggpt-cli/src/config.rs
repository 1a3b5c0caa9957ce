//! Application configuration loaded from YAML.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use raggpt_rag::openai::{self, OpenAIChatModel, OpenAIEmbeddingProvider};
use raggpt_rag::{
    CollectionLocation, EmbeddingProvider, EmbeddingRegistry, HashEmbeddingProvider,
    LanguageModel, Prompt, RagConfig, RagError,
};
use serde::{Deserialize, Serialize};

/// Top-level settings file, `configs/app_config.yml` by default.
///
/// Every section is optional; missing values take the defaults below. API
/// keys are read from `OPENAI_API_KEY`, never from this file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub directories: Directories,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub splitter: SplitterSettings,
    pub retrieval: RetrievalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Directories {
    /// Documents the preprocessed collection is built from.
    pub data_directory: PathBuf,
    /// Where the preprocessed collection is persisted.
    pub persist_directory: PathBuf,
    /// Where the upload collection is persisted.
    pub custom_persist_directory: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data/docs"),
            persist_directory: PathBuf::from("data/vectordb/processed"),
            custom_persist_directory: PathBuf::from("data/vectordb/uploaded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Offline token-hash embeddings.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingBackend,
    /// Model name for the `openai` backend. The `hash` backend is always `hash-{dimensions}`.
    pub model: String,
    pub api_base: Option<String>,
    pub batch_size: usize,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Openai,
            model: "text-embedding-ada-002".to_string(),
            api_base: None,
            batch_size: 64,
            dimensions: 1536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub api_base: Option<String>,
    pub temperature: f32,
    /// System instruction placed at the top of every prompt.
    pub system_role: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            api_base: None,
            temperature: 0.0,
            system_role: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self { chunk_size: 1500, chunk_overlap: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub max_context_units: usize,
    pub history_window: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { k: 3, max_context_units: 12_000, history_window: 2 }
    }
}

impl AppConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Model id recorded in collections built with this configuration.
    pub fn embedding_model_id(&self) -> String {
        match self.embedding.provider {
            EmbeddingBackend::Openai => self.embedding.model.clone(),
            EmbeddingBackend::Hash => format!("hash-{}", self.embedding.dimensions),
        }
    }

    /// The validated pipeline configuration.
    pub fn rag_config(&self) -> anyhow::Result<RagConfig> {
        let mut builder = RagConfig::builder()
            .embedding_model_id(self.embedding_model_id())
            .chunk_size(self.splitter.chunk_size)
            .chunk_overlap(self.splitter.chunk_overlap)
            .top_k(self.retrieval.k)
            .max_context_units(self.retrieval.max_context_units)
            .history_window(self.retrieval.history_window)
            .temperature(self.llm.temperature);
        if let Some(role) = &self.llm.system_role {
            builder = builder.system_instruction(role.trim());
        }
        Ok(builder.build()?)
    }

    pub fn preprocessed_location(&self) -> CollectionLocation {
        CollectionLocation::new("preprocessed", &self.directories.persist_directory)
    }

    pub fn uploaded_location(&self) -> CollectionLocation {
        CollectionLocation::new("uploaded", &self.directories.custom_persist_directory)
    }

    /// Registry holding the configured embedding provider.
    pub fn embedding_registry(&self) -> anyhow::Result<EmbeddingRegistry> {
        let provider: Arc<dyn EmbeddingProvider> = match self.embedding.provider {
            EmbeddingBackend::Hash => {
                Arc::new(HashEmbeddingProvider::new(self.embedding.dimensions))
            }
            EmbeddingBackend::Openai => {
                let Some(key) = openai::api_key_from_env() else {
                    bail!("OPENAI_API_KEY must be set to use the openai embedding provider");
                };
                let mut provider = OpenAIEmbeddingProvider::new(key)?
                    .with_model(&self.embedding.model)
                    .with_dimensions(self.embedding.dimensions)
                    .with_max_batch_size(self.embedding.batch_size);
                if let Some(base) = &self.embedding.api_base {
                    provider = provider.with_api_base(base);
                }
                Arc::new(provider)
            }
        };
        Ok(EmbeddingRegistry::new().with(provider))
    }

    /// The chat model, or a stand-in that fails every query when no API key is set.
    ///
    /// Without a key, ingestion still works and queries fail as ordinary
    /// generation errors.
    pub fn language_model(&self) -> anyhow::Result<Arc<dyn LanguageModel>> {
        let Some(key) = openai::api_key_from_env() else {
            return Ok(Arc::new(MissingKeyModel { model: self.llm.model.clone() }));
        };
        let mut model = OpenAIChatModel::new(key)?.with_model(&self.llm.model);
        if let Some(base) = &self.llm.api_base {
            model = model.with_api_base(base);
        }
        Ok(Arc::new(model))
    }
}

struct MissingKeyModel {
    model: String,
}

#[async_trait]
impl LanguageModel for MissingKeyModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _prompt: &Prompt, _temperature: f32) -> raggpt_rag::Result<String> {
        Err(RagError::GenerationService {
            provider: self.model.clone(),
            message: "OPENAI_API_KEY is not set".to_string(),
        })
    }
}
