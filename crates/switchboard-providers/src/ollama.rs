use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use reqwest::{Client, Response};
use switchboard_core::{
    ChatRequest, Completion, Error, InferenceBackend, Result, TokenStream, TokenUsage,
};

use crate::OllamaManager;
use crate::manager::DEFAULT_OLLAMA_URL;
use crate::models::{OllamaChatChunk, OllamaChatRequest};

/// Chat backend backed by a local Ollama server.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    manager: OllamaManager,
    request_timeout: Duration,
}

impl OllamaBackend {
    /// Creates a backend for the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_OLLAMA_URL.to_owned(),
            manager: OllamaManager::new(),
            request_timeout,
        })
    }

    /// Points the backend at another Ollama endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.manager = self.manager.with_url(url.clone());
        self.base_url = url;
        self
    }

    /// Manager for the same endpoint.
    pub fn manager(&self) -> &OllamaManager {
        &self.manager
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<Response> {
        let mut wire = OllamaChatRequest::from(request);
        wire.stream = stream;

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&wire)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    Error::Timeout(self.request_timeout.as_millis() as u64)
                } else {
                    Error::unavailable(format!("Ollama request failed: {error}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(
                status.as_u16(),
                format!("Ollama returned {status} for {}: {body}", request.model),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        self.manager.is_available().await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
        let start = Instant::now();
        let response = self.send(request, false).await?;

        let chunk: OllamaChatChunk = response
            .json()
            .await
            .map_err(|error| Error::InvalidResponse(format!("Ollama chat payload: {error}")))?;
        if let Some(message) = chunk.error {
            return Err(Error::unavailable(message));
        }

        Ok(Completion {
            text: chunk.message.content,
            model: request.model.clone(),
            tokens: TokenUsage {
                input: chunk.prompt_eval_count,
                output: chunk.eval_count,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream> {
        let response = self.send(request, true).await?;
        let state = StreamState {
            response,
            buffer: Vec::new(),
            finished: false,
        };
        Ok(Box::pin(stream::unfold(state, next_fragment)))
    }
}

/// Progress of an NDJSON stream.
struct StreamState {
    response: Response,
    buffer: Vec<u8>,
    finished: bool,
}

async fn next_fragment(mut state: StreamState) -> Option<(Result<String>, StreamState)> {
    loop {
        if state.finished {
            return None;
        }

        if let Some(newline) = state.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = state.buffer.drain(..=newline).collect();
            match parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(chunk)) => {
                    state.finished = chunk.done;
                    if chunk.message.content.is_empty() {
                        continue;
                    }
                    return Some((Ok(chunk.message.content), state));
                }
                Err(error) => {
                    state.finished = true;
                    return Some((Err(error), state));
                }
            }
        }

        match state.response.chunk().await {
            Ok(Some(bytes)) => state.buffer.extend_from_slice(&bytes),
            Ok(None) => {
                if state.buffer.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                state.buffer.push(b'\n');
            }
            Err(error) => {
                state.finished = true;
                return Some((Err(error.into()), state));
            }
        }
    }
}

/// Parses one NDJSON line; blank lines yield `None`.
fn parse_line(line: &[u8]) -> Result<Option<OllamaChatChunk>> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let chunk: OllamaChatChunk = serde_json::from_str(trimmed)
        .map_err(|error| Error::InvalidResponse(format!("Ollama stream chunk: {error}")))?;
    match chunk.error {
        Some(message) => Err(Error::unavailable(message)),
        None => Ok(Some(chunk)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_creation() {
        let backend = match OllamaBackend::new(Duration::from_secs(30)) {
            Ok(backend) => backend.with_url("http://localhost:9999"),
            Err(error) => panic!("client build failed: {error}"),
        };
        assert_eq!(backend.name(), "ollama");
        assert_eq!(backend.manager().base_url(), "http://localhost:9999");
    }

    #[test]
    fn test_parse_line_skips_blank() {
        match parse_line(b"   \n") {
            Ok(None) => {}
            other => panic!("expected blank line to be skipped, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_line_surfaces_stream_error() {
        let result = parse_line(br#"{"error":"model 'nope' not found"}"#);
        assert!(matches!(result, Err(Error::Backend { status: None, .. })));
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        let result = parse_line(b"not json");
        assert!(matches!(result, Err(Error::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let backend = match OllamaBackend::new(Duration::from_secs(2)) {
            Ok(backend) => backend.with_url("http://127.0.0.1:1"),
            Err(error) => panic!("client build failed: {error}"),
        };
        let request = ChatRequest::new("llama3.2:3b", vec![]);
        match backend.chat(&request).await {
            Ok(completion) => panic!("unexpected completion: {}", completion.text),
            Err(error) => assert!(error.is_retryable()),
        }
    }
}
