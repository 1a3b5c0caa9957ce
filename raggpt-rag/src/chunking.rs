//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! cuts text into windows of at most `chunk_size` characters where consecutive
//! windows share exactly `chunk_overlap` characters. Inside each window the cut
//! is moved back to a paragraph, sentence, or word boundary when one lies far
//! enough into the window; otherwise the window is cut hard at `chunk_size`.
//!
//! All sizes and offsets are counted in characters, not bytes.

use crate::config::ChunkPolicy;
use crate::document::{Chunk, Document};
use crate::error::Result;

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// The policy this chunker applies. Recorded in collection metadata.
    fn policy(&self) -> ChunkPolicy;

    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// A contiguous piece of text produced by [`split_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Start character offset (inclusive).
    pub start: usize,
    /// End character offset (exclusive).
    pub end: usize,
    /// The text between `start` and `end`.
    pub text: String,
}

/// Boundary-preferring chunker with exact overlap between neighbours.
///
/// Chunk IDs are generated as `{document}#{index}`.
///
/// # Example
///
/// ```rust,ignore
/// use raggpt_rag::{Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(200, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    policy: ChunkPolicy,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`](crate::RagError::InvalidConfiguration)
    /// unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self { policy: ChunkPolicy::new(chunk_size, chunk_overlap)? })
    }

    /// Create a chunker from an existing policy, validating it.
    pub fn from_policy(policy: ChunkPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }
}

impl Chunker for RecursiveChunker {
    fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        split_spans(&document.text, self.policy)
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                id: format!("{}#{index}", document.name),
                document: document.name.clone(),
                index,
                page: document.page_at(span.start),
                start: span.start,
                end: span.end,
                text: span.text,
            })
            .collect()
    }
}

/// Split raw text under the given chunk policy.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfiguration`](crate::RagError::InvalidConfiguration)
/// unless `0 <= chunk_overlap < chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<TextSpan>> {
    let policy = ChunkPolicy::new(chunk_size, chunk_overlap)?;
    Ok(split_spans(text, policy))
}

/// Separator classes in order of preference.
const BOUNDARY_LEVELS: [fn(&[char], usize) -> bool; 3] =
    [ends_paragraph, ends_sentence, ends_word];

fn split_spans(text: &str, policy: ChunkPolicy) -> Vec<TextSpan> {
    // Byte offset of every char, plus the end of the string.
    let offsets: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let total = offsets.len() - 1;
    if total == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let ChunkPolicy { chunk_size, chunk_overlap } = policy;
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            natural_end(&chars, start, hard_end, chunk_size, chunk_overlap).unwrap_or(hard_end)
        };

        spans.push(TextSpan { start, end, text: text[offsets[start]..offsets[end]].to_string() });

        if end == total {
            break;
        }
        // end > start + chunk_overlap always holds, so this makes progress.
        start = end - chunk_overlap;
    }

    spans
}

/// Latest boundary in `[min_end, hard_end]`, searching the preferred separator class first.
///
/// `min_end` keeps the cut past the overlap region and at least half a window
/// in, so preferring a boundary never produces runs of tiny chunks.
fn natural_end(
    chars: &[char],
    start: usize,
    hard_end: usize,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Option<usize> {
    let min_end = start + (chunk_overlap + 1).max(chunk_size / 2);
    if min_end > hard_end {
        return None;
    }
    BOUNDARY_LEVELS
        .iter()
        .find_map(|is_boundary| (min_end..=hard_end).rev().find(|&end| is_boundary(chars, end)))
}

fn ends_paragraph(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n'
}

fn ends_sentence(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1].is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?')
        || end >= 1 && chars[end - 1] == '\n'
}

fn ends_word(chars: &[char], end: usize) -> bool {
    end >= 1 && chars[end - 1].is_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    fn lengths(spans: &[TextSpan]) -> Vec<usize> {
        spans.iter().map(|s| s.end - s.start).collect()
    }

    #[test]
    fn five_hundred_chars_make_three_overlapping_chunks() {
        let text = "a".repeat(500);
        let spans = split_text(&text, 200, 50).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(lengths(&spans), vec![200, 200, 200]);
        assert_eq!(spans[1].start, 150);
        assert_eq!(spans[2].start, 300);
        for pair in spans.windows(2) {
            let len = pair[0].text.chars().count();
            let tail: String = pair[0].text.chars().skip(len - 50).collect();
            let head: String = pair[1].text.chars().take(50).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn final_chunk_may_be_shorter() {
        let spans = split_text(&"b".repeat(430), 200, 50).unwrap();
        assert_eq!(lengths(&spans), vec![200, 200, 130]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn invalid_policy_is_rejected() {
        assert!(matches!(split_text("abc", 0, 0), Err(RagError::InvalidConfiguration(_))));
        assert!(matches!(split_text("abc", 5, 5), Err(RagError::InvalidConfiguration(_))));
    }

    #[test]
    fn prefers_paragraph_boundary_within_budget() {
        let first = "x".repeat(70);
        let text = format!("{first}\n\n{}", "y".repeat(100));
        let spans = split_text(&text, 100, 10).unwrap();
        assert_eq!(spans[0].end, 72);
        assert!(spans[0].text.ends_with("\n\n"));
        assert_eq!(spans[1].start, 62);
    }

    #[test]
    fn falls_back_to_word_then_hard_cut() {
        let text = format!("{} {}", "w".repeat(60), "z".repeat(100));
        let spans = split_text(&text, 80, 0).unwrap();
        assert_eq!(spans[0].end, 61);

        let solid = "q".repeat(90);
        assert_eq!(split_text(&solid, 80, 0).unwrap()[0].end, 80);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(25);
        let spans = split_text(&text, 10, 3).unwrap();
        assert!(spans.iter().all(|s| s.text.chars().count() <= 10));
        assert_eq!(spans[0].text, "é".repeat(10));
    }

    #[test]
    fn chunker_attaches_ids_and_pages() {
        let doc = Document::new("guide.txt", "c".repeat(250)).with_page_breaks(vec![120]);
        let chunker = RecursiveChunker::new(100, 20).unwrap();
        let chunks = chunker.chunk(&doc);
        assert_eq!(chunks[0].id, "guide.txt#0");
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].start, 80);
        assert_eq!(chunks[1].page, Some(1));
        assert_eq!(chunks[2].start, 160);
        assert_eq!(chunks[2].page, Some(2));
        assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i && c.document == "guide.txt"));
    }
}
