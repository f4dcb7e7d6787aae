//! Backend for Ollama's native chat API.
//!
//! [`OllamaBackend`] sends every generation attempt to `/api/chat` with the
//! correction history laid out as alternating assistant/user turns.

use super::{chat_messages, is_capacity_message, messages_json, parse_retry_after, with_backoff};
use super::{Backend, BackoffConfig};
use crate::client::{http_client, merge_custom_options, normalize_base_url, LlmConfig};
use crate::error::Result;
use crate::retry::Correction;
use crate::FlowError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Backend for a local or remote Ollama server.
///
/// # Example
///
/// ```
/// use lmflow::backend::{BackoffConfig, OllamaBackend};
/// use lmflow::LlmConfig;
///
/// let backend = OllamaBackend::new("http://localhost:11434", "llama3.1:8b")
///     .with_config(LlmConfig::default().with_temperature(0.2))
///     .with_backoff(BackoffConfig::none());
/// assert_eq!(backend.model(), "llama3.1:8b");
/// ```
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    config: LlmConfig,
    backoff: BackoffConfig,
}

impl OllamaBackend {
    /// Create a backend for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(120)),
            base_url: normalize_base_url(&base_url.into()),
            model: model.into(),
            config: LlmConfig::default(),
            backoff: BackoffConfig::none(),
        }
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Use a caller-provided HTTP client (its own timeout applies).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Replace the default 120 second request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the Ollama `options` object from the LlmConfig.
    fn build_options(&self) -> Value {
        let mut opts = json!({
            "temperature": self.config.temperature,
            "num_predict": self.config.max_tokens,
        });
        merge_custom_options(&mut opts, &self.config);
        opts
    }

    /// Build the JSON body for `/api/chat`.
    fn build_body(&self, system_prompt: &str, input_prompt: &str, contexts: &[Correction]) -> Value {
        let messages = chat_messages(system_prompt, input_prompt, contexts);
        let mut body = json!({
            "model": self.model,
            "messages": messages_json(&messages),
            "stream": false,
            "options": self.build_options(),
        });
        if self.config.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    /// Send one request and pull the assistant text out of the reply.
    async fn send(&self, url: &str, body: &Value) -> Result<String> {
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            if is_capacity_message(&text) {
                return Err(FlowError::BackendCapacity(text));
            }
            return Err(FlowError::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        let json_resp: Value = resp.json().await?;
        if let Some(err) = json_resp.get("error").and_then(|e| e.as_str()) {
            if is_capacity_message(err) {
                return Err(FlowError::BackendCapacity(err.to_string()));
            }
            return Err(FlowError::Other(format!("Ollama error: {}", err)));
        }
        Ok(json_resp
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string())
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn generate(
        &self,
        system_prompt: &str,
        input_prompt: &str,
        contexts: &[Correction],
    ) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_body(system_prompt, input_prompt, contexts);
        tracing::debug!(model = %self.model, turns = contexts.len(), "ollama chat request");
        with_backoff(&self.backoff, || self.send(&url, &body), None).await
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
