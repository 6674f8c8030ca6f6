//! Request lifecycle control for a retrieval-augmented chat client.
//!
//! A [`Session`] sends one user message at a time to an
//! [`Endpoint`](ragchat_endpoint::Endpoint), waits out rate limits and
//! transient failures with a countdown, and sends the very same turn again
//! once the countdown elapses. Replies and failures are recorded in a
//! [`Transcript`](transcript::Transcript).

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod classify;
mod cooldown;
mod policy;
mod session;
pub mod transcript;
mod transport;
mod turn;

pub use cooldown::CooldownReason;
pub use policy::{DEFAULT_TRANSIENT_STATUSES, Policy, PolicyBuilder};
pub use session::{
    CooldownSnapshot, Reply, Session, SessionBuilder, SessionClosed,
    SessionStatus, SubmitError, TurnSnapshot,
};
pub use turn::{TurnId, TurnStatus};
