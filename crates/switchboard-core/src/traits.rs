use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::{ChatRequest, Completion, Result};

/// Stream of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Backend capable of executing chat completions.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Returns the identifier for this backend.
    fn name(&self) -> &'static str;

    /// Checks whether the backend can currently accept requests.
    async fn is_available(&self) -> bool;

    /// Runs a chat completion to the end and returns the whole text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the backend is unreachable or answers
    /// with an error status, and [`crate::Error::InvalidResponse`] when its payload
    /// cannot be parsed.
    async fn chat(&self, request: &ChatRequest) -> Result<Completion>;

    /// Runs a chat completion and yields text fragments as they are produced.
    ///
    /// Backends without native streaming emit the whole completion as one fragment.
    ///
    /// # Errors
    ///
    /// Same conditions as [`InferenceBackend::chat`].
    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream> {
        let completion = self.chat(request).await?;
        Ok(Box::pin(stream::once(async move { Ok(completion.text) })))
    }
}
