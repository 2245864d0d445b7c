//! Shared domain types for the Brewva orchestrator.
//!
//! Everything the other crates agree on lives here: the common error
//! type, the config tree, turn envelopes, id minting, and structured
//! trace events.

pub mod config;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod trace;

pub use error::{Error, Result};
