//! Request configuration shared by the HTTP backends.

use crate::error::Result;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Configuration for LLM requests.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Ask the provider to constrain output to JSON.
    ///
    /// Off by default: the reasoning prompt preset asks the model to think
    /// before answering, which JSON-constrained decoding would suppress.
    pub json_mode: bool,

    /// Custom options merged into the provider's options object.
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            json_mode: false,
            options: None,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// Merge `config.options` into `target` (an object), overwriting existing keys.
pub(crate) fn merge_custom_options(target: &mut Value, config: &LlmConfig) {
    if let Some(ref custom) = config.options {
        if let (Some(base), Some(extra)) = (target.as_object_mut(), custom.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Build an HTTP client with the given request timeout.
pub(crate) fn try_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Like [`try_http_client`], for infallible backend constructors. If the
/// builder fails (e.g. no TLS backend could be initialized) the failure is
/// logged and a client without the timeout is used; callers can still
/// install their own via `with_client`.
pub(crate) fn http_client(timeout: Duration) -> Client {
    match try_http_client(timeout) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, timeout_ms = timeout.as_millis() as u64, "HTTP client builder failed, falling back to a client without timeout");
            Client::new()
        }
    }
}

/// Strip known provider path suffixes from a base URL, so backends can
/// append their own paths without doubling them.
pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1", "/api/chat", "/api"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
