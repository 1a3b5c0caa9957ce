//! Bounded prompt assembly from history, retrieved chunks, and the new query.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::conversation::ConversationTurn;
use crate::document::SearchResult;

/// The prompt sent to a language model.
///
/// `chunks` holds exactly the retrieved chunks rendered into `user`, in the
/// order they appear there. References are derived from this list only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    /// The fixed system instruction.
    pub system: String,
    /// History, retrieved content, and the user question, rendered as one message.
    pub user: String,
    /// Chunks that survived truncation, relevance-descending.
    pub chunks: Vec<SearchResult>,
    /// Number of history turns that survived truncation.
    pub turns_included: usize,
    /// Whether anything was dropped to fit the budget.
    pub truncated: bool,
}

impl Prompt {
    /// Size of the prompt in context units (characters).
    pub fn units(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

/// Combines conversation history, retrieved chunks, and the user query.
///
/// When the result would exceed the budget, chunks are dropped
/// lowest-relevance-first, then the oldest turns. The query is always kept,
/// even if it alone exceeds the budget.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system_instruction: String,
    history_window: usize,
}

impl PromptAssembler {
    pub fn new(system_instruction: impl Into<String>, history_window: usize) -> Self {
        Self { system_instruction: system_instruction.into(), history_window }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.system_instruction.clone(), config.history_window)
    }

    /// Build a prompt no larger than `max_context_units` where possible.
    pub fn assemble(
        &self,
        history: &[ConversationTurn],
        retrieved: &[SearchResult],
        user_query: &str,
        max_context_units: usize,
    ) -> Prompt {
        let mut turns: Vec<&ConversationTurn> =
            history[history.len().saturating_sub(self.history_window)..].iter().collect();
        let mut chunks = retrieved.to_vec();
        chunks.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });

        let system_units = self.system_instruction.chars().count();
        let offered = (turns.len(), chunks.len());
        let mut user = render(&turns, &chunks, user_query);

        while system_units + user.chars().count() > max_context_units {
            if chunks.pop().is_none() {
                if turns.is_empty() {
                    warn!(
                        units = system_units + user.chars().count(),
                        max_context_units, "query alone exceeds the prompt budget"
                    );
                    break;
                }
                turns.remove(0);
            }
            user = render(&turns, &chunks, user_query);
        }

        let truncated = offered != (turns.len(), chunks.len());
        if truncated {
            debug!(
                dropped_chunks = offered.1 - chunks.len(),
                dropped_turns = offered.0 - turns.len(),
                max_context_units,
                "truncated prompt"
            );
        }

        Prompt {
            system: self.system_instruction.clone(),
            user,
            turns_included: turns.len(),
            chunks,
            truncated,
        }
    }
}

fn render(turns: &[&ConversationTurn], chunks: &[SearchResult], user_query: &str) -> String {
    let mut out = String::new();
    if !turns.is_empty() {
        out.push_str("# Chat history:\n");
        for turn in turns {
            out.push_str(&format!("User: {}\nAssistant: {}\n", turn.user, turn.assistant));
        }
        out.push('\n');
    }
    if !chunks.is_empty() {
        out.push_str("# Retrieved content:\n");
        for (position, result) in chunks.iter().enumerate() {
            out.push_str(&format!(
                "[{}] Source: {} ({})\n{}\n\n",
                position + 1,
                result.chunk.document,
                result.chunk.locator(),
                result.chunk.text
            ));
        }
    }
    out.push_str("# User question:\n");
    out.push_str(user_query);
    out
}
