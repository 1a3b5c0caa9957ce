//! Loading documents from disk.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{RagError, Result};

/// File extensions read as UTF-8 text.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown"];

const PAGE_SEPARATOR: char = '\x0c';

/// Whether the loader handles `path`.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Read one document, named by the file's basename.
///
/// Form-feed characters mark page boundaries. They are replaced by newlines
/// and the document records where each following page starts.
///
/// # Errors
///
/// Returns [`RagError::UnsupportedDocument`] for unknown extensions and
/// [`RagError::Io`] if the file cannot be read.
pub async fn load_document(path: &Path) -> Result<Document> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RagError::UnsupportedDocument(path.display().to_string()))?;
    if !is_supported(path) {
        return Err(RagError::UnsupportedDocument(name.to_string()));
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let document = parse_pages(name, &raw);
    debug!(
        document = %document.name,
        chars = document.text.chars().count(),
        pages = document.page_breaks.as_ref().map_or(1, |b| b.len() + 1),
        "loaded document"
    );
    Ok(document)
}

/// Load every supported file directly inside `directory`, sorted by file name.
///
/// Unsupported files are skipped with a warning.
pub async fn load_directory(directory: &Path) -> Result<Vec<Document>> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type().await?.is_file() {
            continue;
        }
        if is_supported(&path) {
            paths.push(path);
        } else {
            warn!(path = %path.display(), "skipping unsupported file");
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in &paths {
        documents.push(load_document(path).await?);
    }
    Ok(documents)
}

fn parse_pages(name: &str, raw: &str) -> Document {
    if !raw.contains(PAGE_SEPARATOR) {
        return Document::new(name, raw);
    }
    let mut breaks = Vec::new();
    let mut text = String::with_capacity(raw.len());
    for (offset, c) in raw.chars().enumerate() {
        if c == PAGE_SEPARATOR {
            text.push('\n');
            breaks.push(offset + 1);
        } else {
            text.push(c);
        }
    }
    let total = text.chars().count();
    breaks.retain(|start| *start < total);
    Document::new(name, text).with_page_breaks(breaks)
}
