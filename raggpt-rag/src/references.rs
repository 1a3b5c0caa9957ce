//! Citation references for display next to an answer.

use serde::{Deserialize, Serialize};

use crate::document::SearchResult;

/// Maximum characters of chunk text shown as an excerpt.
const EXCERPT_CHARS: usize = 200;

/// A pointer back to the source of a chunk that was sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    /// Document name.
    pub source: String,
    /// Page or character range of the first chunk used from this source.
    pub locator: String,
    /// Leading text of that chunk.
    pub excerpt: String,
}

/// One reference per source, in order of first appearance in `chunks_used`.
pub fn extract_references(chunks_used: &[SearchResult]) -> Vec<Reference> {
    let mut references: Vec<Reference> = Vec::new();
    for result in chunks_used {
        if references.iter().any(|r| r.source == result.chunk.document) {
            continue;
        }
        references.push(Reference {
            source: result.chunk.document.clone(),
            locator: result.chunk.locator(),
            excerpt: excerpt(&result.chunk.text),
        });
    }
    references
}

/// Render references as a markdown list.
///
/// ```text
/// - **manual.pdf** (page 3)
///   > The pump must be primed before...
/// ```
pub fn references_markdown(references: &[Reference]) -> String {
    if references.is_empty() {
        return "No references.".to_string();
    }
    references
        .iter()
        .map(|r| {
            let quoted = r.excerpt.lines().collect::<Vec<_>>().join(" ");
            format!("- **{}** ({})\n  > {}", r.source, r.locator, quoted)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}
