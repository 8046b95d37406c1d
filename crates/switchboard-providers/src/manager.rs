use reqwest::Client;
use switchboard_core::{Error, Result};

use crate::models::{OllamaListResponse, OllamaModel};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Queries an Ollama server about its state and installed models.
#[derive(Clone)]
pub struct OllamaManager {
    /// HTTP client used to interact with the Ollama service.
    client: Client,
    /// Base URL pointing to the Ollama runtime.
    base_url: String,
}

impl Default for OllamaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaManager {
    /// Creates a manager for the default local endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_OLLAMA_URL.to_owned(),
        }
    }

    /// Points the manager at another endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Base URL of the managed server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is running.
    pub async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    /// List installed models.
    ///
    /// # Errors
    ///
    /// Returns an error if Ollama is not reachable or the response cannot be parsed.
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|error| Error::unavailable(format!("Ollama not reachable: {error}")))?;

        if !response.status().is_success() {
            return Err(Error::backend(
                response.status().as_u16(),
                "failed to list installed models",
            ));
        }

        let list: OllamaListResponse = response.json().await?;
        Ok(list.models)
    }

    /// Check if a specific model is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the model list cannot be retrieved.
    pub async fn has_model(&self, model_name: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|model| model.name.starts_with(model_name)))
    }
}
