//! Retrieval-augmented chat over your own documents.
//!
//! This crate provides:
//! - Boundary-aware overlapping chunking
//! - Batched, model-tagged embeddings behind a provider trait
//! - Persisted in-memory vector collections with cosine search
//! - Idempotent, all-or-nothing collection builds
//! - Bounded prompt assembly, generation, and citation references
//! - A chat engine tying it together for a front end
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use raggpt_rag::{ChatEngine, Conversation, EmbeddingRegistry, HashEmbeddingProvider, RagMode};
//!
//! let engine = ChatEngine::builder()
//!     .config(RagConfig::builder().embedding_model_id("hash-256").build()?)
//!     .registry(EmbeddingRegistry::new().with(Arc::new(HashEmbeddingProvider::new(256))))
//!     .language_model(Arc::new(my_model))
//!     .build()?;
//!
//! engine.upload(&paths, RagMode::Uploaded, Vec::new()).await?;
//! let reply = engine.respond(Conversation::new(), "What changed?", RagMode::Uploaded).await?;
//! ```

pub mod builder;
pub mod chat;
pub mod chunking;
pub mod collection;
pub mod config;
pub mod conversation;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod inmemory;
pub mod loader;
#[cfg(feature = "openai")]
pub mod openai;
pub mod prompt;
pub mod references;
pub mod retriever;
pub mod vectorstore;

pub use builder::{CollectionSummary, IndexBuilder};
pub use chat::{
    ChatEngine, ChatEngineBuilder, ChatReply, CollectionLocation, QueryFailure, QueryState,
    RagMode, UploadOutcome,
};
pub use chunking::{Chunker, RecursiveChunker, TextSpan, split_text};
pub use collection::{Collection, CollectionMetadata, DocumentRecord, cosine_similarity};
pub use config::{ChunkPolicy, RagConfig, RagConfigBuilder, TEMPERATURE_RANGE};
pub use conversation::{Conversation, ConversationTurn, apply_turn};
pub use document::{Chunk, Document, EmbeddingVector, RetrievalResult, SearchResult};
pub use embedding::{EmbeddingClient, EmbeddingProvider, EmbeddingRegistry, HashEmbeddingProvider};
pub use error::{ErrorKind, RagError, Result};
pub use generation::{LanguageModel, ResponseGenerator};
pub use inmemory::InMemoryVectorStore;
pub use loader::{load_directory, load_document};
#[cfg(feature = "openai")]
pub use openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
pub use prompt::{Prompt, PromptAssembler};
pub use references::{Reference, extract_references, references_markdown};
pub use retriever::Retriever;
pub use vectorstore::{CollectionLocks, VectorStore};
