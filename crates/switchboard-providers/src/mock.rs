//! Scripted backend for exercising routing and workflows offline.
//!
//! Replies are resolved per call in this order: the next queued reply for the
//! requested model, the first pattern contained in the request transcript, the
//! default reply, and finally an echo of the model name.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use switchboard_core::{
    ChatRequest, Completion, Error, IgnoreLock as _, InferenceBackend, Result, TokenUsage,
};
use tracing::debug;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful completion text.
    Text(String),
    /// Backend failure with an optional status code.
    Fail {
        /// Status reported with the failure.
        status: Option<u16>,
        /// Failure message.
        message: String,
    },
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Model named in the request.
    pub model: String,
    /// Request transcript.
    pub transcript: String,
}

#[derive(Default)]
struct MockState {
    queues: HashMap<String, VecDeque<MockReply>>,
    delays: HashMap<String, Duration>,
    patterns: Vec<(String, String)>,
    default_response: Option<String>,
    history: Vec<MockCall>,
    unavailable: bool,
}

/// Backend that returns scripted replies and records every call.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply for `model`.
    #[must_use]
    pub fn with_model_response(self, model: impl Into<String>, text: impl Into<String>) -> Self {
        self.push_reply(model.into(), MockReply::Text(text.into()));
        self
    }

    /// Queues a failure for `model`.
    #[must_use]
    pub fn with_model_failure(
        self,
        model: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        self.push_reply(
            model.into(),
            MockReply::Fail {
                status,
                message: message.into(),
            },
        );
        self
    }

    /// Delays every call to `model`.
    #[must_use]
    pub fn with_model_delay(self, model: impl Into<String>, delay: Duration) -> Self {
        self.state
            .lock_ignore_poison()
            .delays
            .insert(model.into(), delay);
        self
    }

    /// Answers any request whose transcript contains `pattern`.
    #[must_use]
    pub fn with_response(self, pattern: impl Into<String>, text: impl Into<String>) -> Self {
        self.state
            .lock_ignore_poison()
            .patterns
            .push((pattern.into(), text.into()));
        self
    }

    /// Reply used when nothing else matches.
    #[must_use]
    pub fn with_default_response(self, text: impl Into<String>) -> Self {
        self.state.lock_ignore_poison().default_response = Some(text.into());
        self
    }

    /// Makes `is_available` report false.
    #[must_use]
    pub fn unavailable(self) -> Self {
        self.state.lock_ignore_poison().unavailable = true;
        self
    }

    fn push_reply(&self, model: String, reply: MockReply) {
        self.state
            .lock_ignore_poison()
            .queues
            .entry(model)
            .or_default()
            .push_back(reply);
    }

    /// Every call made so far.
    #[must_use]
    pub fn call_history(&self) -> Vec<MockCall> {
        self.state.lock_ignore_poison().history.clone()
    }

    /// Models called, in call order.
    #[must_use]
    pub fn called_models(&self) -> Vec<String> {
        self.state
            .lock_ignore_poison()
            .history
            .iter()
            .map(|call| call.model.clone())
            .collect()
    }

    /// Number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock_ignore_poison().history.len()
    }

    /// Clears the call history.
    pub fn clear_history(&self) {
        self.state.lock_ignore_poison().history.clear();
    }

    /// Records the call and resolves its reply.
    fn resolve(&self, request: &ChatRequest) -> (MockReply, Option<Duration>) {
        let transcript = request.transcript();
        let mut state = self.state.lock_ignore_poison();
        state.history.push(MockCall {
            model: request.model.clone(),
            transcript: transcript.clone(),
        });
        let delay = state.delays.get(&request.model).copied();

        if let Some(reply) = state
            .queues
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front)
        {
            return (reply, delay);
        }

        let text = state
            .patterns
            .iter()
            .find(|(pattern, _)| transcript.contains(pattern.as_str()))
            .map(|(_, text)| text.clone())
            .or_else(|| state.default_response.clone())
            .unwrap_or_else(|| format!("Mock response from {}", request.model));
        drop(state);

        (MockReply::Text(text), delay)
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        !self.state.lock_ignore_poison().unavailable
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
        let (reply, delay) = self.resolve(request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            MockReply::Text(text) => {
                debug!(model = %request.model, "mock reply");
                let tokens = TokenUsage::estimate(&request.transcript(), &text);
                Ok(Completion {
                    text,
                    model: request.model.clone(),
                    tokens,
                    latency_ms: delay.map_or(0, |delay| delay.as_millis() as u64),
                })
            }
            MockReply::Fail { status, message } => Err(Error::Backend { status, message }),
        }
    }
}
