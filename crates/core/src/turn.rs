use std::fmt::{self, Display};

use ragchat_endpoint::{ChatRequest, HistoryEntry};

/// Identifies one turn within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub(crate) u64);

impl Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn:{}", self.0)
    }
}

/// Where a turn is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TurnStatus {
    /// Created, not dispatched yet.
    #[default]
    Pending,
    /// A dispatch attempt is outstanding.
    InFlight,
    /// Got a reply.
    Succeeded,
    /// Waiting out a rate limit cooldown.
    RateLimited,
    /// Waiting to be retried after a transient failure.
    Retrying,
    /// Gave up.
    Failed,
}

/// One user message and its delivery state.
#[derive(Clone, Debug)]
pub(crate) struct Turn {
    pub id: TurnId,
    pub thread_id: String,
    pub message: String,
    pub history: Vec<HistoryEntry>,
    pub attempt: u32,
    pub status: TurnStatus,
}

impl Turn {
    pub fn new(
        id: TurnId,
        thread_id: String,
        message: String,
        mut history: Vec<HistoryEntry>,
        history_limit: usize,
    ) -> Self {
        truncate_oldest(&mut history, history_limit);
        Self {
            id,
            thread_id,
            message,
            history,
            attempt: 0,
            status: TurnStatus::Pending,
        }
    }

    /// Builds the request for the next attempt. The challenge token is
    /// filled in by the transport.
    pub fn to_request(&self) -> ChatRequest {
        ChatRequest {
            message: self.message.clone(),
            thread_id: self.thread_id.clone(),
            history: self.history.clone(),
            challenge_token: None,
        }
    }
}

/// Keeps the `limit` most recent entries.
pub(crate) fn truncate_oldest<T>(entries: &mut Vec<T>, limit: usize) {
    if entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
}
