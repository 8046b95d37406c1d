//! Core types and traits for the switchboard routing engine.
//!
//! This crate provides the inference-backend contract, the chat message types
//! exchanged with backends, and the shared error type.

/// Error types and result definitions.
pub mod error;
/// Poison-tolerant locking helpers.
pub mod sync;
/// Trait definitions for inference backends.
pub mod traits;
/// Chat request and completion types.
pub mod types;

pub use error::{Error, Result};
pub use sync::IgnoreLock;
pub use traits::{InferenceBackend, TokenStream};
pub use types::{ChatMessage, ChatRequest, Completion, Role, TokenUsage};
