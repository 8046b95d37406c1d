use serde::{Deserialize, Serialize};
use switchboard_core::{ChatMessage, ChatRequest};

/// Ollama API response for the installed model list.
#[derive(Debug, Deserialize)]
pub struct OllamaListResponse {
    /// Models installed in Ollama.
    pub models: Vec<OllamaModel>,
}

/// Information about an installed Ollama model.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    /// Model identifier.
    pub name: String,
    /// Size of the model in bytes.
    #[serde(default)]
    pub size: u64,
    /// Content digest for the model.
    #[serde(default)]
    pub digest: String,
    /// Timestamp of last modification.
    #[serde(default)]
    pub modified_at: String,
}

/// Sampling options understood by Ollama.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaOptions {
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub num_predict: u32,
}

/// Ollama API request for `/api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest {
    /// Model to use for generation.
    pub model: String,
    /// Conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Whether to stream newline-delimited chunks.
    pub stream: bool,
    /// Sampling options.
    pub options: OllamaOptions,
}

impl From<&ChatRequest> for OllamaChatRequest {
    fn from(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.clone(),
            stream: request.stream,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

/// Message payload inside an Ollama chat chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaChunkMessage {
    /// Generated text for this chunk.
    #[serde(default)]
    pub content: String,
}

/// One Ollama chat response, either the whole answer or a streamed chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatChunk {
    /// Model that generated the response.
    #[serde(default)]
    pub model: String,
    /// Generated message.
    #[serde(default)]
    pub message: OllamaChunkMessage,
    /// Whether generation is complete.
    #[serde(default)]
    pub done: bool,
    /// Number of tokens in the prompt.
    #[serde(default)]
    pub prompt_eval_count: u64,
    /// Number of tokens generated.
    #[serde(default)]
    pub eval_count: u64,
    /// Error reported mid-stream.
    #[serde(default)]
    pub error: Option<String>,
}
