//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] returns pre-configured replies in order and records every
//! call it receives, so tests can assert on exactly what a layer sent.
//!
//! # Example
//!
//! ```
//! use lmflow::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec![r#"{"answer": 5}"#.to_string()]);
//! assert_eq!(mock.call_count(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::Backend;
use crate::error::Result;
use crate::retry::Correction;
use crate::FlowError;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Return this raw text.
    Text(String),
    /// Fail as if the prompt exceeded the model's context window.
    CapacityExceeded(String),
}

impl From<&str> for MockReply {
    fn from(text: &str) -> Self {
        MockReply::Text(text.to_string())
    }
}

impl From<String> for MockReply {
    fn from(text: String) -> Self {
        MockReply::Text(text)
    }
}

/// What the mock received on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub system_prompt: String,
    pub input_prompt: String,
    pub contexts: Vec<Correction>,
}

/// A test backend that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
#[derive(Debug)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

impl MockBackend {
    /// Create a mock that returns the given texts in order.
    pub fn new(responses: Vec<String>) -> Self {
        Self::from_replies(responses.into_iter().map(MockReply::Text).collect())
    }

    /// Create a mock from arbitrary scripted replies.
    pub fn from_replies(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockBackend requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Number of `generate` calls received so far.
    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// Snapshot of every call received so far, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock_calls().clone()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn generate(
        &self,
        system_prompt: &str,
        input_prompt: &str,
        contexts: &[Correction],
    ) -> Result<String> {
        self.lock_calls().push(MockCall {
            system_prompt: system_prompt.to_string(),
            input_prompt: input_prompt.to_string(),
            contexts: contexts.to_vec(),
        });
        match self.next_reply() {
            MockReply::Text(text) => Ok(text),
            MockReply::CapacityExceeded(reason) => Err(FlowError::BackendCapacity(reason)),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fixed_response() {
        let mock = MockBackend::fixed("Hello!");
        let text = mock.generate("sys", "prompt", &[]).await.unwrap();
        assert_eq!(text, "Hello!");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let mock = MockBackend::new(vec!["first".into(), "second".into()]);
        let r1 = mock.generate("", "p", &[]).await.unwrap();
        let r2 = mock.generate("", "p", &[]).await.unwrap();
        let r3 = mock.generate("", "p", &[]).await.unwrap();
        assert_eq!(r1, "first");
        assert_eq!(r2, "second");
        assert_eq!(r3, "first");
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockBackend::fixed("x");
        let contexts = vec![Correction::new("old", "wrong")];
        mock.generate("sys", "prompt", &contexts).await.unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system_prompt, "sys");
        assert_eq!(calls[0].input_prompt, "prompt");
        assert_eq!(calls[0].contexts, contexts);
    }

    #[tokio::test]
    async fn test_mock_capacity_failure() {
        let mock = MockBackend::from_replies(vec![MockReply::CapacityExceeded("too long".into())]);
        let err = mock.generate("", "p", &[]).await.unwrap_err();
        assert!(matches!(err, FlowError::BackendCapacity(ref r) if r == "too long"));
    }

    #[test]
    #[should_panic(expected = "at least one reply")]
    fn test_mock_requires_replies() {
        let _ = MockBackend::from_replies(Vec::new());
    }
}
