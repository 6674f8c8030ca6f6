use std::error::Error;
use std::fmt::{self, Display};

/// Why a turn couldn't be started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubmitError {
    /// The message was blank after trimming.
    EmptyMessage,
    /// Another turn is in flight.
    Busy,
    /// A cooldown is running. Wait for it to elapse, or supersede.
    CoolingDown,
    /// There is no parked turn.
    NothingToResume,
    /// The session has stopped.
    Closed,
}

impl Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::EmptyMessage => write!(f, "message is empty"),
            SubmitError::Busy => write!(f, "another turn is in flight"),
            SubmitError::CoolingDown => write!(f, "cooling down"),
            SubmitError::NothingToResume => write!(f, "nothing to resume"),
            SubmitError::Closed => SessionClosed.fmt(f),
        }
    }
}

impl Error for SubmitError {}

impl From<SessionClosed> for SubmitError {
    #[inline]
    fn from(_: SessionClosed) -> Self {
        SubmitError::Closed
    }
}

/// The session loop is no longer running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionClosed;

impl Display for SessionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the session has stopped")
    }
}

impl Error for SessionClosed {}
