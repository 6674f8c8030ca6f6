use std::error::Error;
use std::fmt::{self, Display};

use async_trait::async_trait;

/// Describes why a bot challenge token couldn't be acquired.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenError {
    reason: String,
}

impl TokenError {
    /// Creates a new error with the given reason.
    #[inline]
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bot challenge failed: {}", self.reason)
    }
}

impl Error for TokenError {}

/// A source of single-use bot challenge tokens.
///
/// A token is acquired right before each dispatch attempt and must be
/// invalidated once that attempt settles, no matter whether it succeeded.
/// Implementations are expected to present a fresh challenge (or fetch a
/// fresh proof) on the next `acquire` call after `invalidate`.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Acquires a token for the next dispatch attempt.
    async fn acquire(&self) -> Result<String, TokenError>;

    /// Marks the last acquired token as consumed.
    fn invalidate(&self);
}
