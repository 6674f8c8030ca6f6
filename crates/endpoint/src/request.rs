use serde::{Deserialize, Serialize};

/// A request to be sent to the chat endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user message of this turn.
    pub message: String,
    /// The conversation this message belongs to.
    pub thread_id: String,
    /// Prior exchanged messages, oldest first.
    pub history: Vec<HistoryEntry>,
    /// A single-use bot challenge proof, if the endpoint requires one.
    pub challenge_token: Option<String>,
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person using the client.
    User,
    /// The chat service.
    Assistant,
}

/// A message from the conversation history, sent as context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The author of the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl HistoryEntry {
    /// Creates a user history entry.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant history entry.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
