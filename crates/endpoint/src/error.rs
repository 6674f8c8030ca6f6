use std::fmt::{self, Display};

/// The kind of error that occurred while talking to an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request never got a response (connection refused, DNS
    /// failure, reset, timeout, etc.).
    Network,
    /// The endpoint answered with a non-2xx status code.
    Status(u16),
}

impl ErrorKind {
    /// Returns the HTTP status code, if any.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorKind::Network => None,
            ErrorKind::Status(code) => Some(*code),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "Network failure"),
            ErrorKind::Status(code) => write!(f, "HTTP {code}"),
        }
    }
}
