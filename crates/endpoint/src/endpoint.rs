use std::error::Error;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::request::ChatRequest;
use crate::response::ChatReply;

/// The longest wait an endpoint may ask for. Longer requests are capped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60 * 60);

/// Converts a server-provided wait in (possibly fractional) seconds.
///
/// Returns `None` for values that aren't a positive number, and caps the
/// rest at [`MAX_RETRY_AFTER`].
pub fn retry_after_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return None;
    }
    let secs = secs.min(MAX_RETRY_AFTER.as_secs_f64());
    Duration::try_from_secs_f64(secs).ok()
}

/// The error type for an endpoint.
pub trait EndpointError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns the human-readable message the server attached to an
    /// error response, if any.
    fn server_message(&self) -> Option<&str> {
        None
    }

    /// Returns how long the server asked the client to wait before
    /// trying again, if it said so.
    ///
    /// This is usually only meaningful for rate limited responses.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// A type that represents a remote chat endpoint, which answers one user
/// message (plus context) with one reply.
///
/// Once the endpoint is created, it should behave like a stateless object.
/// It can still have internal state, but callers should not rely on it,
/// and the endpoint should be prepared for being dropped anytime.
pub trait Endpoint: Send + Sync {
    /// The error type that may be returned by the endpoint.
    type Error: EndpointError;

    /// Sends a request to the endpoint.
    ///
    /// The returned future must be fully independent of `self`. Dropping
    /// it should abort the underlying operation as soon as possible.
    fn send(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_from_secs() {
        assert_eq!(retry_after_from_secs(2.5), Some(Duration::from_millis(2_500)));
        assert_eq!(retry_after_from_secs(0.0), None);
        assert_eq!(retry_after_from_secs(-3.0), None);
        assert_eq!(retry_after_from_secs(f64::NAN), None);
        assert_eq!(retry_after_from_secs(1e30), Some(MAX_RETRY_AFTER));
        assert_eq!(retry_after_from_secs(f64::INFINITY), Some(MAX_RETRY_AFTER));
    }
}
