//! An abstraction layer for remote chat endpoints.
//!
//! This crate establishes the protocol between the chat client and the
//! retrieval-augmented chat service it talks to, so that the request
//! lifecycle controller can be driven by a real HTTP endpoint or by a
//! scripted fake without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod endpoint;
mod error;
mod request;
mod response;
mod token;

pub use endpoint::*;
pub use error::*;
pub use request::*;
pub use response::*;
pub use token::*;
