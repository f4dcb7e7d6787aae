//! Backend for OpenAI-compatible chat APIs.
//!
//! [`OpenAiBackend`] covers OpenAI itself and the many servers that mimic
//! `/v1/chat/completions` (vLLM, llama.cpp server, LM Studio, Groq, ...).

use super::{chat_messages, is_capacity_message, messages_json, parse_retry_after, with_backoff};
use super::{Backend, BackoffConfig};
use crate::client::{http_client, normalize_base_url, LlmConfig};
use crate::error::Result;
use crate::retry::Correction;
use crate::FlowError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use lmflow::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new("https://api.openai.com/v1", "gpt-4o").with_api_key("sk-...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    model: String,
    config: LlmConfig,
    backoff: BackoffConfig,
    api_key: Option<String>,
    organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    /// Create a backend for `model` at `base_url`, with standard transport
    /// backoff and no authentication.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(120)),
            base_url: normalize_base_url(&base_url.into()),
            model: model.into(),
            config: LlmConfig::default(),
            backoff: BackoffConfig::hosted(),
            api_key: None,
            organization: None,
        }
    }

    /// Send `Authorization: Bearer {key}` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Send `OpenAI-Organization: {org}` with every request.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, system_prompt: &str, input_prompt: &str, contexts: &[Correction]) -> Value {
        let messages = chat_messages(system_prompt, input_prompt, contexts);
        let mut body = json!({
            "model": self.model,
            "messages": messages_json(&messages),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": false,
        });
        if self.config.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    async fn send(&self, url: &str, body: &Value) -> Result<String> {
        let mut req = self.client.post(url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        let resp = req.send().await?;
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
        let choice = &json_resp["choices"][0];
        if choice["finish_reason"] == "length" && choice["message"]["content"].is_null() {
            return Err(FlowError::BackendCapacity(
                "completion truncated before any content was produced".into(),
            ));
        }
        Ok(choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn generate(
        &self,
        system_prompt: &str,
        input_prompt: &str,
        contexts: &[Correction],
    ) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(system_prompt, input_prompt, contexts);
        tracing::debug!(model = %self.model, turns = contexts.len(), "openai chat request");
        with_backoff(&self.backoff, || self.send(&url, &body), None).await
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
