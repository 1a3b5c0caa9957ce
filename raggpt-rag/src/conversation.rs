//! Conversation history as an append-only value.

use serde::{Deserialize, Serialize};

/// One exchange: the user's message and the assistant's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self { user: user.into(), assistant: assistant.into() }
    }
}

/// Ordered turns of one chat session, oldest first.
///
/// Updates return a new value instead of mutating a shared list, so a caller
/// holding the previous conversation still sees it unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, returning the extended conversation.
    pub fn apply_turn(mut self, turn: ConversationTurn) -> Self {
        self.turns.push(turn);
        self
    }

    /// Drop every turn. Only the user clears a conversation.
    pub fn clear(mut self) -> Self {
        self.turns.clear();
        self
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl From<Vec<ConversationTurn>> for Conversation {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}

/// Free-function form of [`Conversation::apply_turn`].
pub fn apply_turn(conversation: Conversation, turn: ConversationTurn) -> Conversation {
    conversation.apply_turn(turn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_turn_appends_without_touching_the_original() {
        let before = Conversation::new().apply_turn(ConversationTurn::new("hi", "hello"));
        let after = apply_turn(before.clone(), ConversationTurn::new("how?", "like this"));

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(after.turns()[1].user, "how?");
        assert!(after.clear().is_empty());
    }

    #[test]
    fn recent_returns_the_tail_in_order() {
        let conversation: Conversation =
            (0..5).map(|i| ConversationTurn::new(i.to_string(), "")).collect::<Vec<_>>().into();
        let users: Vec<&str> = conversation.recent(2).iter().map(|t| t.user.as_str()).collect();
        assert_eq!(users, vec!["3", "4"]);
        assert_eq!(conversation.recent(10).len(), 5);
    }
}
