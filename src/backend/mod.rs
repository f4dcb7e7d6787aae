//! Backend trait and shared chat-message plumbing.
//!
//! The [`Backend`] trait is the only seam between a [`Layer`](crate::Layer)
//! and a model. Built-in implementations: [`OllamaBackend`],
//! [`OpenAiBackend`] (feature `openai`), and [`MockBackend`] for tests.
//!
//! ## Architecture
//!
//! ```text
//! Layer ──► Generator ──► Backend::generate(system, prompt, corrections) ──► raw text
//!                                    │
//!                    ┌───────────────┼───────────────┐
//!              OllamaBackend   OpenAiBackend    MockBackend
//!               /api/chat    /v1/chat/completions  scripted
//! ```

pub mod backoff;
pub mod mock;
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use backoff::{BackoffConfig, Jitter};
pub use mock::{MockBackend, MockReply};
pub use ollama::OllamaBackend;
#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;

use crate::error::Result;
use crate::retry::Correction;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

/// Type alias for the callback invoked before each transport retry.
///
/// Arguments: `(attempt_number, delay_before_retry, reason_for_retry)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// A model that turns prompts into raw text.
///
/// `contexts` holds one [`Correction`] per earlier failed attempt of the
/// same invocation, oldest first: the model's previous output and the
/// message explaining what was wrong with it. Implementations should present
/// them as alternating assistant/user turns after the initial prompt.
///
/// A request the model can never satisfy (for instance one that exceeds its
/// context window) must fail with
/// [`FlowError::BackendCapacity`](crate::FlowError::BackendCapacity) rather
/// than returning text.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Produce the complete raw response for one generation attempt.
    async fn generate(
        &self,
        system_prompt: &str,
        input_prompt: &str,
        contexts: &[Correction],
    ) -> Result<String>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Lay out a generation attempt as a chat transcript.
///
/// Order: system prompt (omitted when empty), user prompt, then an
/// assistant/user pair per correction.
pub fn chat_messages(
    system_prompt: &str,
    input_prompt: &str,
    contexts: &[Correction],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + contexts.len() * 2);
    if !system_prompt.is_empty() {
        messages.push(ChatMessage {
            role: Role::System,
            content: system_prompt.to_string(),
        });
    }
    messages.push(ChatMessage {
        role: Role::User,
        content: input_prompt.to_string(),
    });
    for correction in contexts {
        messages.push(ChatMessage {
            role: Role::Assistant,
            content: correction.output.clone(),
        });
        messages.push(ChatMessage {
            role: Role::User,
            content: correction.error.clone(),
        });
    }
    messages
}

/// Render messages in the `[{"role": ..., "content": ...}]` wire shape
/// shared by Ollama and OpenAI-compatible chat endpoints.
pub(crate) fn messages_json(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect()
}

/// Parse a `Retry-After` header value as seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Whether an HTTP error body describes an over-long request. Providers
/// report this as an ordinary 400 with varying wording.
pub(crate) fn is_capacity_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["context_length_exceeded", "context length", "context window", "maximum context", "too many tokens"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Run an HTTP operation with transport-level retry.
///
/// `send` is called once per request. Failures that `config` deems transient
/// (429, 5xx, connection errors) are retried after the delay it computes;
/// anything else, including
/// [`FlowError::BackendCapacity`](crate::FlowError::BackendCapacity), is
/// returned immediately. Transport retries never count against a layer's try budget.
pub async fn with_backoff<T, F, Fut>(
    config: &BackoffConfig,
    mut send: F,
    mut on_retry: RetryCallback<'_>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        let error = match send().await {
            Ok(response) => return Ok(response),
            Err(e) if config.should_retry(&e, retries) => e,
            Err(e) => return Err(e),
        };

        retries += 1;
        let delay = config.delay_before(retries, &error);
        let reason = error.to_string();
        tracing::debug!(retry = retries, delay_ms = delay.as_millis() as u64, %reason, "transport retry");
        if let Some(cb) = on_retry.as_mut() {
            cb(retries, delay, &reason);
        }
        tokio::time::sleep(delay).await;
    }
}
