//! An out-of-the-box chat client for retrieval-augmented chat services.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring a resilient chat session, with threads kept
//! in memory, into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;
mod token;

pub use session::{Session, SessionBuilder};
pub use token::StaticTokenProvider;

/// Re-exports of [`ragchat_core`] crate.
pub mod core {
    pub use ragchat_core::*;
}
