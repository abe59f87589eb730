//! In-memory chat history for one interactive session.

use serde::{Deserialize, Serialize};

/// Who said a [`ChatTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
}

/// Ordered turns of a chat session. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn { role: TurnRole::User, text: text.into() });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn { role: TurnRole::Assistant, text: text.into() });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// One `You: ...` or `Bot: ...` line per turn.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => format!("You: {}", turn.text),
                TurnRole::Assistant => format!("Bot: {}", turn.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_serialize_with_a_lowercase_role() {
        let turn = ChatTurn { role: TurnRole::Assistant, text: "hi".into() };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "text": "hi"}));
    }

    #[test]
    fn transcript_labels_each_turn() {
        let mut conversation = Conversation::new();
        assert!(conversation.is_empty());
        conversation.push_user("what is engineering?");
        conversation.push_assistant("I don't know.");

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0].role, TurnRole::User);
        assert_eq!(conversation.transcript(), "You: what is engineering?\nBot: I don't know.");
    }
}
