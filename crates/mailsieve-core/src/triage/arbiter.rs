//! Generative completion backends that arbitrate classifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::account::CredentialStore;
use crate::config::ArbiterConfig;
use crate::{Error, Result};

/// Timeout of a hosted completion request.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout of a local completion request. Small local models are slow on
/// first load.
const LOCAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Whether a backend is hosted and rate-limited or runs locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hosted API.
    Remote,
    /// Local model server.
    Local,
}

impl BackendKind {
    /// Bulk classification workers for this backend.
    #[must_use]
    pub const fn concurrency(self) -> usize {
        match self {
            Self::Remote => 1,
            Self::Local => 3,
        }
    }
}

/// Turns a prompt into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Runs one completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Classification`] if the backend is unreachable or
    /// answers with an error status.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// What kind of backend this is.
    fn kind(&self) -> BackendKind;
}

/// Builds the backend selected by configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or, for the remote
/// backend, no API key is stored.
pub fn backend_from_config(
    config: &ArbiterConfig,
    credentials: &dyn CredentialStore,
) -> Result<Arc<dyn CompletionBackend>> {
    Ok(match config {
        ArbiterConfig::Remote {
            endpoint,
            model,
            max_tokens,
        } => {
            let api_key = credentials.arbiter_api_key()?;
            Arc::new(RemoteCompletion::new(endpoint, model, *max_tokens, api_key)?)
        }
        ArbiterConfig::Local { endpoint, model } => Arc::new(LocalCompletion::new(endpoint, model)?),
    })
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Classification(format!("HTTP client error: {e}")))
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// OpenAI-compatible `/v1/chat/completions` backend.
pub struct RemoteCompletion {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl RemoteCompletion {
    /// Creates a backend for `endpoint` (base URL, without `/v1`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, model: &str, max_tokens: u32, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(REMOTE_TIMEOUT)?,
            endpoint: format!("{}/v1/chat/completions", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            max_tokens,
            api_key,
        })
    }
}

impl std::fmt::Debug for RemoteCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCompletion")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CompletionBackend for RemoteCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.0,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
            "stream": false
        });

        debug!("Calling {} with model {}", self.endpoint, self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Classification(format!("completion request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Classification(format!(
                "completion endpoint returned status: {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::Classification(format!("unreadable completion response: {e}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama `/api/generate` backend in JSON mode.
#[derive(Debug)]
pub struct LocalCompletion {
    client: Client,
    endpoint: String,
    model: String,
}

impl LocalCompletion {
    /// Creates a backend for an Ollama base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(LOCAL_TIMEOUT)?,
            endpoint: format!("{}/api/generate", endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl CompletionBackend for LocalCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "system": system,
            "prompt": prompt,
            "format": "json",
            "stream": false,
            "options": { "temperature": 0.1 }
        });

        debug!("Calling Ollama at {} with model {}", self.endpoint, self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Classification(format!("Ollama request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Classification(format!(
                "Ollama returned status: {}",
                resp.status()
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| Error::Classification(format!("unreadable Ollama response: {e}")))?;

        Ok(parsed.response)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MemoryCredentials;

    #[test]
    fn test_concurrency_per_kind() {
        assert_eq!(BackendKind::Remote.concurrency(), 1);
        assert_eq!(BackendKind::Local.concurrency(), 3);
    }

    #[test]
    fn test_local_backend_from_default_config() {
        let backend = backend_from_config(&ArbiterConfig::default(), &MemoryCredentials::new());
        assert!(matches!(backend.map(|b| b.kind()), Ok(BackendKind::Local)));
    }

    #[test]
    fn test_remote_backend_requires_api_key() {
        let config = ArbiterConfig::Remote {
            endpoint: "https://api.example.com/".to_string(),
            model: "m".to_string(),
            max_tokens: 256,
        };
        let credentials = MemoryCredentials::new();
        assert!(matches!(
            backend_from_config(&config, &credentials),
            Err(Error::Credential(_))
        ));

        credentials.set_arbiter_api_key("sk-test");
        assert!(matches!(
            backend_from_config(&config, &credentials).map(|b| b.kind()),
            Ok(BackendKind::Remote)
        ));
    }

    #[test]
    fn test_endpoint_paths() {
        let remote = RemoteCompletion::new("https://api.example.com/", "m", 1, String::new());
        assert!(matches!(remote, Ok(r) if r.endpoint == "https://api.example.com/v1/chat/completions"));
        let local = LocalCompletion::new("http://localhost:11434", "m");
        assert!(matches!(local, Ok(l) if l.endpoint == "http://localhost:11434/api/generate"));
    }
}
