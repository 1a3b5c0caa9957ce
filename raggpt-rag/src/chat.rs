//! Chat orchestration: the query and upload triggers used by a front end.
//!
//! [`ChatEngine::respond`] drives one query through
//! `Idle → Embedding → Retrieving → Assembling → Generating → Done` and
//! returns either the extended conversation or a [`QueryFailure`] holding the
//! conversation exactly as it was passed in. [`ChatEngine::upload`] ingests
//! user files into the upload collection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::builder::{CollectionSummary, IndexBuilder};
use crate::collection::CollectionMetadata;
use crate::config::{RagConfig, TEMPERATURE_RANGE};
use crate::conversation::{Conversation, ConversationTurn};
use crate::embedding::EmbeddingRegistry;
use crate::error::{ErrorKind, RagError, Result};
use crate::generation::{LanguageModel, ResponseGenerator};
use crate::inmemory::InMemoryVectorStore;
use crate::loader::{load_directory, load_document};
use crate::prompt::{Prompt, PromptAssembler};
use crate::references::{Reference, extract_references, references_markdown};
use crate::retriever::Retriever;
use crate::vectorstore::VectorStore;

/// Which collection a query or upload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagMode {
    /// The preloaded collection. Read-only for chat; refreshed only by
    /// [`ChatEngine::prepare_preprocessed`].
    Preprocessed,
    /// The collection built from user uploads.
    Uploaded,
}

impl RagMode {
    /// The label shown in the mode selector.
    pub fn label(self) -> &'static str {
        match self {
            Self::Preprocessed => "Preprocessed doc",
            Self::Uploaded => "Upload doc: Process for RAG",
        }
    }
}

impl fmt::Display for RagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RagMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preprocessed doc" | "preprocessed" | "default" => Ok(Self::Preprocessed),
            "upload doc: process for rag" | "upload" | "uploaded" => Ok(Self::Uploaded),
            other => Err(RagError::InvalidArgument(format!(
                "unknown mode '{other}', expected 'preprocessed' or 'upload'"
            ))),
        }
    }
}

/// A collection name and the directory it is persisted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionLocation {
    pub name: String,
    pub directory: PathBuf,
}

impl CollectionLocation {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), directory: directory.into() }
    }
}

/// States of a single query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryState {
    Idle,
    Embedding,
    Retrieving,
    Assembling,
    Generating,
    Done,
    Failed { kind: ErrorKind, message: String },
}

/// A successful query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    /// The input conversation with the new turn appended.
    pub conversation: Conversation,
    /// The assistant's answer.
    pub answer: String,
    /// Sources of the chunks sent to the model.
    pub references: Vec<Reference>,
    /// `references` rendered for a collapsible panel.
    pub references_markdown: String,
    /// States visited, ending in [`QueryState::Done`].
    pub trace: Vec<QueryState>,
}

/// A failed query. `conversation` is the unmodified input.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("query failed during {stage:?} ({kind:?}): {message}")]
pub struct QueryFailure {
    /// The state in which the error occurred.
    pub stage: QueryState,
    pub kind: ErrorKind,
    pub message: String,
    pub conversation: Conversation,
    /// States visited, ending in [`QueryState::Failed`].
    pub trace: Vec<QueryState>,
}

/// Result of the upload trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Every file name uploaded so far in this session, first-upload order.
    pub accumulator: Vec<String>,
    /// Status text for the user.
    pub message: String,
    /// Build summary, when anything was ingested.
    pub summary: Option<CollectionSummary>,
}

/// Front-end facing entry point over the whole pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let engine = ChatEngine::builder()
///     .config(config)
///     .registry(registry)
///     .language_model(Arc::new(model))
///     .build()?;
///
/// let reply = engine.respond(Conversation::new(), "What is RAG?", RagMode::Preprocessed).await?;
/// println!("{}\n\n{}", reply.answer, reply.references_markdown);
/// ```
#[derive(Clone)]
pub struct ChatEngine {
    config: RagConfig,
    retriever: Retriever,
    builder: IndexBuilder,
    assembler: PromptAssembler,
    generator: ResponseGenerator,
    preprocessed: CollectionLocation,
    uploaded: CollectionLocation,
}

impl ChatEngine {
    pub fn builder() -> ChatEngineBuilder {
        ChatEngineBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The collection a mode reads from.
    pub fn location(&self, mode: RagMode) -> &CollectionLocation {
        match mode {
            RagMode::Preprocessed => &self.preprocessed,
            RagMode::Uploaded => &self.uploaded,
        }
    }

    /// Make a mode's persisted collection resident, returning its metadata.
    pub async fn open_collection(&self, mode: RagMode) -> Result<CollectionMetadata> {
        let location = self.location(mode);
        self.retriever.open(&location.name, &location.directory).await
    }

    /// Answer `user_text` at the configured temperature.
    pub async fn respond(
        &self,
        conversation: Conversation,
        user_text: &str,
        mode: RagMode,
    ) -> std::result::Result<ChatReply, QueryFailure> {
        self.respond_with_temperature(conversation, user_text, mode, self.config.temperature)
            .await
    }

    /// Answer `user_text`, appending the new turn to `conversation` on success.
    pub async fn respond_with_temperature(
        &self,
        conversation: Conversation,
        user_text: &str,
        mode: RagMode,
        temperature: f32,
    ) -> std::result::Result<ChatReply, QueryFailure> {
        let mut trace = vec![QueryState::Idle];
        let outcome = self
            .run_query(conversation.turns(), user_text, mode, temperature, &mut trace)
            .await;

        match outcome {
            Ok((answer, prompt)) => {
                trace.push(QueryState::Done);
                let references = extract_references(&prompt.chunks);
                info!(
                    mode = %mode,
                    chunks_used = prompt.chunks.len(),
                    references = references.len(),
                    "query answered"
                );
                Ok(ChatReply {
                    conversation: conversation
                        .apply_turn(ConversationTurn::new(user_text, answer.clone())),
                    answer,
                    references_markdown: references_markdown(&references),
                    references,
                    trace,
                })
            }
            Err(e) => {
                let stage = trace.last().cloned().unwrap_or(QueryState::Idle);
                let kind = e.kind();
                let message = e.to_string();
                warn!(mode = %mode, ?stage, ?kind, error = %message, "query failed");
                trace.push(QueryState::Failed { kind, message: message.clone() });
                Err(QueryFailure { stage, kind, message, conversation, trace })
            }
        }
    }

    async fn run_query(
        &self,
        history: &[ConversationTurn],
        user_text: &str,
        mode: RagMode,
        temperature: f32,
        trace: &mut Vec<QueryState>,
    ) -> Result<(String, Prompt)> {
        if user_text.trim().is_empty() {
            return Err(RagError::InvalidArgument("message must not be empty".to_string()));
        }
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(RagError::InvalidArgument(format!(
                "temperature ({temperature}) must be within {TEMPERATURE_RANGE:?}"
            )));
        }
        let location = self.location(mode);

        trace.push(QueryState::Embedding);
        self.retriever.open(&location.name, &location.directory).await?;
        let query = self.retriever.embed_query(&location.name, user_text).await?;

        trace.push(QueryState::Retrieving);
        let retrieved = self.retriever.search(&location.name, &query, self.config.top_k).await?;

        trace.push(QueryState::Assembling);
        let prompt = self.assembler.assemble(
            history,
            &retrieved,
            user_text,
            self.config.max_context_units,
        );

        trace.push(QueryState::Generating);
        let answer = self.generator.generate(&prompt, temperature).await?;
        Ok((answer, prompt))
    }

    /// Ingest uploaded files into the upload collection.
    ///
    /// In [`RagMode::Preprocessed`] nothing is ingested and the message asks
    /// the user to switch modes. An empty `paths` list ingests nothing either.
    ///
    /// # Errors
    ///
    /// Loader errors and every [`IndexBuilder::build`] error. The upload
    /// collection keeps its last persisted state.
    pub async fn upload(
        &self,
        paths: &[PathBuf],
        mode: RagMode,
        accumulator: Vec<String>,
    ) -> Result<UploadOutcome> {
        if mode == RagMode::Preprocessed {
            return Ok(UploadOutcome {
                accumulator,
                message: format!(
                    "If you would like to upload a document, please select '{}' mode.",
                    RagMode::Uploaded
                ),
                summary: None,
            });
        }
        if paths.is_empty() {
            let message = if accumulator.is_empty() {
                "No files have been uploaded yet.".to_string()
            } else {
                uploaded_message(&accumulator)
            };
            return Ok(UploadOutcome { accumulator, message, summary: None });
        }

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(load_document(path).await?);
        }
        let summary =
            self.builder.build(&self.uploaded.name, &documents, &self.uploaded.directory).await?;

        let mut accumulator = accumulator;
        for document in &documents {
            if !accumulator.contains(&document.name) {
                accumulator.push(document.name.clone());
            }
        }
        Ok(UploadOutcome {
            message: uploaded_message(&accumulator),
            accumulator,
            summary: Some(summary),
        })
    }

    /// Build or refresh the preloaded collection from every supported file in
    /// `data_directory`.
    pub async fn prepare_preprocessed(&self, data_directory: &Path) -> Result<CollectionSummary> {
        let documents = load_directory(data_directory).await?;
        if documents.is_empty() {
            warn!(dir = %data_directory.display(), "no supported documents found");
        }
        self.builder
            .build(&self.preprocessed.name, &documents, &self.preprocessed.directory)
            .await
    }
}

fn uploaded_message(files: &[String]) -> String {
    let list = files.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n");
    format!(
        "The following files have now been uploaded and processed:\n{list}\n\n\
         You can now ask questions about these documents."
    )
}

/// Builder for [`ChatEngine`].
#[derive(Default)]
pub struct ChatEngineBuilder {
    config: Option<RagConfig>,
    store: Option<Arc<dyn VectorStore>>,
    registry: Option<EmbeddingRegistry>,
    language_model: Option<Arc<dyn LanguageModel>>,
    preprocessed: Option<CollectionLocation>,
    uploaded: Option<CollectionLocation>,
}

impl ChatEngineBuilder {
    /// Set the pipeline configuration. Defaults to [`RagConfig::default`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the vector store. Defaults to a new [`InMemoryVectorStore`].
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the embedding providers (required).
    pub fn registry(mut self, registry: EmbeddingRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the language model (required).
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Where the preloaded collection lives.
    /// Defaults to `preprocessed` in `data/vectordb/processed`.
    pub fn preprocessed(mut self, location: CollectionLocation) -> Self {
        self.preprocessed = Some(location);
        self
    }

    /// Where the upload collection lives.
    /// Defaults to `uploaded` in `data/vectordb/uploaded`.
    pub fn uploaded(mut self, location: CollectionLocation) -> Self {
        self.uploaded = Some(location);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if the configuration is invalid,
    /// the registry or language model is missing, no provider is registered
    /// for the configured embedding model, or both modes share one collection.
    pub fn build(self) -> Result<ChatEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let registry = self.registry.ok_or_else(|| {
            RagError::InvalidConfiguration("embedding registry is required".to_string())
        })?;
        let model = self.language_model.ok_or_else(|| {
            RagError::InvalidConfiguration("language model is required".to_string())
        })?;
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));
        let preprocessed = self.preprocessed.unwrap_or_else(|| {
            CollectionLocation::new("preprocessed", "data/vectordb/processed")
        });
        let uploaded = self
            .uploaded
            .unwrap_or_else(|| CollectionLocation::new("uploaded", "data/vectordb/uploaded"));
        if preprocessed.name == uploaded.name || preprocessed.directory == uploaded.directory {
            return Err(RagError::InvalidConfiguration(
                "preprocessed and uploaded collections must differ".to_string(),
            ));
        }

        Ok(ChatEngine {
            builder: IndexBuilder::new(&config, &registry, store.clone())?,
            retriever: Retriever::new(store, registry),
            assembler: PromptAssembler::from_config(&config),
            generator: ResponseGenerator::new(model),
            config,
            preprocessed,
            uploaded,
        })
    }
}
