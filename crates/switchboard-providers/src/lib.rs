//! Inference backends for the switchboard engine.
//!
//! [`OllamaBackend`] talks to a local Ollama server; [`MockBackend`] replays
//! scripted replies so routing and workflow code can be exercised offline.

/// Ollama server management (availability, installed models).
pub mod manager;
/// Scripted backend for tests.
pub mod mock;
/// Ollama wire types.
pub mod models;
/// Ollama chat backend.
pub mod ollama;

pub use manager::OllamaManager;
pub use mock::{MockBackend, MockCall, MockReply};
pub use models::{OllamaChatChunk, OllamaChatRequest, OllamaModel, OllamaOptions};
pub use ollama::OllamaBackend;
