//! Shared domain types for Cobalt.
//!
//! Everything the runtime crates agree on lives here: the conversation
//! model (sessions, messages, parts, tool-call records), the
//! provider-agnostic streaming vocabulary, the typed bus events, the
//! configuration tree, and the shared error type.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;

pub use error::{Error, Result};
