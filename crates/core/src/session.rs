mod builder;
mod error;
mod mailbox;
mod state;

use ragchat_endpoint::Source;
use tokio::sync::oneshot;

use crate::cooldown::CooldownReason;
use crate::turn::{TurnId, TurnStatus};
pub use builder::SessionBuilder;
pub use error::{SessionClosed, SubmitError};
use mailbox::Mailbox;
use state::{
    AbandonMessage, CancelMessage, ResumeMessage, SessionState, StatusMessage,
    SubmitMessage,
};

/// A chat session, which owns the lifecycle of every turn sent through
/// it.
///
/// At most one turn is in flight at a time. Failures the endpoint may
/// recover from (rate limits, gateway errors, dropped connections) put
/// the session in a cooldown, after which the same turn is sent again.
/// Nothing can be submitted while a turn is in flight or cooling down,
/// unless it deliberately [supersedes](Session::supersede) it.
///
/// The session runs on a background task, which stops when the session
/// is dropped.
pub struct Session {
    mailbox: Mailbox<SessionState>,
}

impl Session {
    /// Submits a user message to the given thread.
    ///
    /// The message is trimmed and recorded in the transcript right away.
    /// The outcome is reported through the callbacks registered on the
    /// [`SessionBuilder`].
    pub async fn submit(
        &self,
        thread_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<TurnId, SubmitError> {
        self.start_turn(thread_id.into(), message.into(), false).await
    }

    /// Like [`Session::submit`], but cancels whatever is in flight, cooling
    /// down or parked first.
    pub async fn supersede(
        &self,
        thread_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<TurnId, SubmitError> {
        self.start_turn(thread_id.into(), message.into(), true).await
    }

    async fn start_turn(
        &self,
        thread_id: String,
        message: String,
        supersede: bool,
    ) -> Result<TurnId, SubmitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox.handle().send(SubmitMessage {
            thread_id,
            message,
            supersede,
            reply_tx,
        })?;
        reply_rx.await.map_err(|_| SubmitError::Closed)?
    }

    /// Sends the parked turn again.
    ///
    /// A turn is parked when its cooldown elapses while auto-resume is
    /// disabled.
    pub async fn resume(&self) -> Result<TurnId, SubmitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox.handle().send(ResumeMessage(reply_tx))?;
        reply_rx.await.map_err(|_| SubmitError::Closed)?
    }

    /// Drops every turn of the given thread, typically because the user
    /// switched away from it or deleted it.
    ///
    /// A reply that arrives for an abandoned turn is discarded and never
    /// reaches the transcript.
    pub fn abandon(&self, thread_id: impl Into<String>) -> Result<(), SessionClosed> {
        self.mailbox.handle().send(AbandonMessage(thread_id.into()))
    }

    /// Aborts the turn in flight or cooling down, if any.
    pub fn cancel(&self) -> Result<(), SessionClosed> {
        self.mailbox.handle().send(CancelMessage)
    }

    /// Returns a snapshot of the session.
    pub async fn status(&self) -> Result<SessionStatus, SessionClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox.handle().send(StatusMessage(reply_tx))?;
        reply_rx.await.map_err(|_| SessionClosed)
    }
}

/// A reply delivered for a turn.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// The turn this reply answers.
    pub turn_id: TurnId,
    /// The thread the turn belongs to.
    pub thread_id: String,
    /// The trimmed reply text, never empty.
    pub content: String,
    /// Citations for the reply.
    pub sources: Vec<Source>,
}

/// The state of a session at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStatus {
    /// The turn in flight or cooling down.
    pub turn: Option<TurnSnapshot>,
    /// The running cooldown.
    pub cooldown: Option<CooldownSnapshot>,
    /// The turn waiting for [`Session::resume`].
    pub parked: Option<TurnId>,
}

impl SessionStatus {
    /// Returns `true` if a new turn can be submitted without superseding.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.turn.is_none() && self.cooldown.is_none()
    }
}

/// A turn as seen by [`Session::status`].
#[derive(Clone, Debug, PartialEq)]
pub struct TurnSnapshot {
    /// Turn id.
    pub id: TurnId,
    /// Thread id.
    pub thread_id: String,
    /// Retries so far.
    pub attempt: u32,
    /// Lifecycle status.
    pub status: TurnStatus,
}

/// A cooldown as seen by [`Session::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownSnapshot {
    /// Why the cooldown was engaged.
    pub reason: CooldownReason,
    /// Seconds until the cooldown elapses.
    pub remaining_seconds: u64,
}
