//! RAG-GPT command-line front end.
//!
//! Prepare the preprocessed collection, upload documents, and chat with
//! either collection from the terminal.

mod config;
mod logging;
mod repl;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use raggpt_rag::{ChatEngine, Conversation, RagMode};
use tracing::info;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "raggpt", version)]
#[command(about = "Chat with your documents using retrieval-augmented generation")]
struct Cli {
    /// Path to the YAML settings file
    #[arg(long, global = true, default_value = "configs/app_config.yml")]
    config: PathBuf,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the preprocessed collection from the data directory
    Prepare {
        /// Override the configured data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Process documents into the upload collection
    Upload {
        /// Text or markdown files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ask a single question and print the answer with its references
    Ask {
        /// Collection to query: preprocessed or upload
        #[arg(short, long, default_value = "preprocessed")]
        mode: RagMode,
        /// Override the configured temperature (0.0 to 2.0)
        #[arg(short, long)]
        temperature: Option<f32>,
        /// The question
        question: String,
    },
    /// Start an interactive chat session
    Chat {
        /// Collection to query: preprocessed or upload
        #[arg(short, long, default_value = "preprocessed")]
        mode: RagMode,
        /// Override the configured temperature (0.0 to 2.0)
        #[arg(short, long)]
        temperature: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let app_config = AppConfig::load(&cli.config)?;
    let engine = build_engine(&app_config)?;

    match cli.command {
        Commands::Prepare { data_dir } => {
            let data_dir =
                data_dir.unwrap_or_else(|| app_config.directories.data_directory.clone());
            let summary = engine
                .prepare_preprocessed(&data_dir)
                .await
                .with_context(|| format!("failed to prepare {}", data_dir.display()))?;
            println!(
                "Collection '{}': {} documents, {} chunks ({} ingested, {} unchanged)",
                summary.collection,
                summary.document_count,
                summary.chunk_count,
                summary.ingested.len(),
                summary.skipped.len()
            );
        }
        Commands::Upload { files } => {
            let outcome = engine.upload(&files, RagMode::Uploaded, Vec::new()).await?;
            println!("{}", outcome.message);
        }
        Commands::Ask { mode, temperature, question } => {
            let temperature = temperature.unwrap_or(engine.config().temperature);
            let reply = engine
                .respond_with_temperature(Conversation::new(), &question, mode, temperature)
                .await?;
            println!("{}\n\nReferences:\n{}", reply.answer, reply.references_markdown);
        }
        Commands::Chat { mode, temperature } => {
            let temperature = temperature.unwrap_or(engine.config().temperature);
            repl::run(&engine, mode, temperature).await?;
        }
    }
    Ok(())
}

fn build_engine(app_config: &AppConfig) -> anyhow::Result<ChatEngine> {
    let config = app_config.rag_config()?;
    info!(
        embedding_model = %config.embedding_model_id,
        chunk_size = config.chunk_policy.chunk_size,
        chunk_overlap = config.chunk_policy.chunk_overlap,
        top_k = config.top_k,
        "configuration loaded"
    );
    let engine = ChatEngine::builder()
        .config(config)
        .registry(app_config.embedding_registry()?)
        .language_model(app_config.language_model()?)
        .preprocessed(app_config.preprocessed_location())
        .uploaded(app_config.uploaded_location())
        .build()?;
    Ok(engine)
}
