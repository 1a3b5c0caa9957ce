//! Interactive chat loop.

use std::path::PathBuf;

use raggpt_rag::{ChatEngine, Conversation, RagMode};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

const HELP: &str = "Commands:
  /upload <files..>   process documents into the upload collection
  /mode <mode>        switch between 'preprocessed' and 'upload'
  /clear              forget the conversation
  /quit               exit";

/// A line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Input {
    Question(String),
    Upload(Vec<PathBuf>),
    Mode(String),
    Clear,
    Help,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Question(line.to_string());
    };
    let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    match name {
        "upload" => Input::Upload(rest.split_whitespace().map(PathBuf::from).collect()),
        "mode" => Input::Mode(rest.trim().to_string()),
        "clear" => Input::Clear,
        "quit" | "exit" => Input::Quit,
        _ => Input::Help,
    }
}

pub async fn run(engine: &ChatEngine, mut mode: RagMode, temperature: f32) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut conversation = Conversation::new();
    let mut uploaded: Vec<String> = Vec::new();

    println!("RAG-GPT chat ({mode}). Type /help for commands.");
    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = editor.add_history_entry(line.as_str());

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Clear => {
                conversation = conversation.clear();
                println!("Conversation cleared.");
            }
            Input::Mode(name) => match name.parse::<RagMode>() {
                Ok(next) => {
                    mode = next;
                    println!("Mode: {mode}");
                }
                Err(e) => eprintln!("{e}"),
            },
            Input::Upload(paths) => match upload(engine, &paths, mode, &mut uploaded).await {
                Ok(message) => println!("{message}"),
                Err(e) => eprintln!("upload failed: {e}"),
            },
            Input::Question(question) => {
                let outcome = engine
                    .respond_with_temperature(conversation, &question, mode, temperature)
                    .await;
                match outcome {
                    Ok(reply) => {
                        println!("\n{}\n", reply.answer);
                        println!("References:\n{}\n", reply.references_markdown);
                        conversation = reply.conversation;
                    }
                    Err(failure) => {
                        eprintln!("error: {}", failure.message);
                        if failure.kind.is_retryable() {
                            eprintln!("(the service may be temporarily unavailable; try again)");
                        }
                        conversation = failure.conversation;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Run the upload trigger. `uploaded` only changes when the upload succeeds.
async fn upload(
    engine: &ChatEngine,
    paths: &[PathBuf],
    mode: RagMode,
    uploaded: &mut Vec<String>,
) -> raggpt_rag::Result<String> {
    let outcome = engine.upload(paths, mode, uploaded.clone()).await?;
    *uploaded = outcome.accumulator;
    Ok(outcome.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, EmbeddingBackend};

    #[test]
    fn parses_commands_and_questions() {
        assert_eq!(parse_input("  what is RAG? "), Input::Question("what is RAG?".into()));
        assert_eq!(
            parse_input("/upload a.txt  b.md"),
            Input::Upload(vec![PathBuf::from("a.txt"), PathBuf::from("b.md")])
        );
        assert_eq!(parse_input("/mode upload"), Input::Mode("upload".into()));
        assert_eq!(parse_input("/clear"), Input::Clear);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/nope"), Input::Help);
        assert_eq!(parse_input(""), Input::Empty);
    }

    #[tokio::test]
    async fn failed_upload_keeps_earlier_files() {
        let root = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.embedding.provider = EmbeddingBackend::Hash;
        config.embedding.dimensions = 32;
        config.directories.persist_directory = root.path().join("processed");
        config.directories.custom_persist_directory = root.path().join("uploaded");
        let engine = crate::build_engine(&config).unwrap();

        let notes = root.path().join("a.txt");
        tokio::fs::write(&notes, "Compost needs air and moisture.").await.unwrap();
        let scan = root.path().join("scan.pdf");
        tokio::fs::write(&scan, "%PDF-1.4").await.unwrap();

        let mut uploaded = Vec::new();
        upload(&engine, &[notes], RagMode::Uploaded, &mut uploaded).await.unwrap();
        assert_eq!(uploaded, ["a.txt"]);

        let err = upload(&engine, &[scan], RagMode::Uploaded, &mut uploaded).await.unwrap_err();
        assert!(matches!(err, raggpt_rag::RagError::UnsupportedDocument(_)));
        assert_eq!(uploaded, ["a.txt"]);

        let message = upload(&engine, &[], RagMode::Uploaded, &mut uploaded).await.unwrap();
        assert!(message.contains("- a.txt"));
    }
}
