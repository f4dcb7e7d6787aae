//! Error-correcting generation.
//!
//! A [`RetryContext`] collects one [`Correction`] per failed attempt of a
//! single invocation. The [`Generator`] replays that trail to the backend on
//! every attempt so the model can see and fix its earlier mistakes, and
//! keeps generating until the reply contains at least one JSON object.
//!
//! The context is the only record of earlier failures, and it is also the
//! try counter: every parse failure and every schema failure adds exactly
//! one entry, and no attempt starts once it holds `max_tries` entries.

use crate::backend::Backend;
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::extract::last_json_object;
use crate::prompt::PromptSet;
use crate::schema::Schema;
use crate::FlowError;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Recorded when no JSON object could be extracted from a reply.
pub const UNPARSABLE_JSON: &str = "The JSON could not be parsed, please correct this and try again.";

/// One failed attempt: what the model said and what was wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// The model's output (raw text, or compact JSON of a rejected object).
    pub output: String,
    /// Why it was rejected.
    pub error: String,
}

impl Correction {
    pub fn new(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: error.into(),
        }
    }
}

/// Ordered trail of corrections for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    corrections: Vec<Correction>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, output: impl Into<String>, error: impl Into<String>) {
        self.corrections.push(Correction::new(output, error));
    }

    /// Number of attempts already spent.
    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }

    /// Whether another attempt fits in `max_tries`.
    pub fn has_budget(&self, max_tries: u32) -> bool {
        self.corrections.len() < max_tries as usize
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn into_corrections(self) -> Vec<Correction> {
        self.corrections
    }

    /// Corrections as the backend sees them: each error wrapped in the
    /// correction template.
    pub fn rendered(&self, prompts: &PromptSet) -> Vec<Correction> {
        self.corrections
            .iter()
            .map(|c| Correction::new(c.output.clone(), prompts.render_correction(&c.error)))
            .collect()
    }
}

/// A JSON object pulled from a reply, before schema validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub object: Map<String, Value>,
    /// The complete trimmed reply the object was extracted from.
    pub raw: String,
}

/// Drives a backend until a reply contains a JSON object.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn Backend>,
    prompts: PromptSet,
    name: String,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Generator {
    pub fn new(backend: Arc<dyn Backend>, prompts: PromptSet) -> Self {
        Self {
            backend,
            prompts,
            name: String::new(),
            event_handler: None,
        }
    }

    /// Name used in events and log fields.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Generate until a JSON object appears or the budget is spent.
    ///
    /// Each reply with no extractable object adds an [`UNPARSABLE_JSON`]
    /// correction to `context`. When several objects appear, the last one
    /// wins. Backend errors (including [`FlowError::BackendCapacity`]) end
    /// the invocation immediately without consuming a try.
    pub async fn generate(
        &self,
        input_prompt: &str,
        output: &Schema,
        max_tries: u32,
        context: &mut RetryContext,
    ) -> Result<Candidate> {
        let system_prompt = self.prompts.render_system(output);

        while context.has_budget(max_tries) {
            let attempt = context.len() as u32 + 1;
            emit(
                &self.event_handler,
                Event::GenerationStart {
                    name: self.name.clone(),
                    attempt,
                },
            );
            tracing::debug!(layer = %self.name, backend = self.backend.name(), attempt, max_tries, "generating");

            let raw = self
                .backend
                .generate(&system_prompt, input_prompt, &context.rendered(&self.prompts))
                .await?;
            let raw = raw.trim().to_string();

            if let Some(object) = last_json_object(&raw) {
                return Ok(Candidate { object, raw });
            }

            tracing::warn!(layer = %self.name, attempt, "no JSON object in model output");
            emit(
                &self.event_handler,
                Event::ParseFailed {
                    name: self.name.clone(),
                    attempt,
                    raw: raw.clone(),
                },
            );
            context.push(raw, UNPARSABLE_JSON);
        }

        Err(FlowError::RetryBudgetExceeded { max_tries })
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("backend", &self.backend.name())
            .field("name", &self.name)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::schema::TypeSpec;
    use serde_json::json;

    fn answer_schema() -> Schema {
        Schema::new().field("answer", TypeSpec::Int)
    }

    fn generator(mock: &Arc<MockBackend>) -> Generator {
        Generator::new(mock.clone(), PromptSet::direct())
    }

    #[tokio::test]
    async fn returns_last_object_on_first_try() {
        let mock = Arc::new(MockBackend::fixed(
            "  e.g. {\"answer\": 0}\nso the answer is {\"answer\": 7}  ",
        ));
        let mut ctx = RetryContext::new();
        let candidate = generator(&mock)
            .generate("q", &answer_schema(), 3, &mut ctx)
            .await
            .unwrap();
        assert_eq!(Value::Object(candidate.object), json!({"answer": 7}));
        assert!(candidate.raw.starts_with("e.g."));
        assert!(ctx.is_empty());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn unparsable_output_is_recorded_and_retried() {
        let mock = Arc::new(MockBackend::new(vec![
            "I cannot answer in JSON".into(),
            "{\"answer\": 1}".into(),
        ]));
        let mut ctx = RetryContext::new();
        generator(&mock)
            .generate("q", &answer_schema(), 3, &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.corrections(), &[Correction::new("I cannot answer in JSON", UNPARSABLE_JSON)]);

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contexts.is_empty());
        assert_eq!(calls[1].contexts.len(), 1);
        assert!(calls[1].contexts[0].error.contains(UNPARSABLE_JSON));
        assert!(calls[1].contexts[0].error.starts_with("There is an error in your response."));
        assert!(calls[1].system_prompt.contains(r#"{"answer":"int"}"#));
    }

    #[tokio::test]
    async fn budget_shared_with_existing_context() {
        let mock = Arc::new(MockBackend::fixed("still no json"));
        let mut ctx = RetryContext::new();
        ctx.push("{\"answer\": \"x\"}", "type mismatch");
        let err = generator(&mock)
            .generate("q", &answer_schema(), 2, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::RetryBudgetExceeded { max_tries: 2 }));
        assert_eq!(mock.call_count(), 1);
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn capacity_error_is_fatal() {
        let mock = Arc::new(MockBackend::from_replies(vec![MockReply::CapacityExceeded(
            "prompt too long".into(),
        )]));
        let mut ctx = RetryContext::new();
        let err = generator(&mock)
            .generate("q", &answer_schema(), 3, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::BackendCapacity(_)));
        assert_eq!(mock.call_count(), 1);
        assert!(ctx.is_empty());
    }

    #[test]
    fn rendered_wraps_errors_only() {
        let mut ctx = RetryContext::new();
        ctx.push("out", "bad");
        let prompts = PromptSet::direct().with_correction("E: [$except$]");
        assert_eq!(ctx.rendered(&prompts), vec![Correction::new("out", "E: bad")]);
        assert_eq!(ctx.corrections()[0].error, "bad");
    }

    #[test]
    fn has_budget_counts_entries() {
        let mut ctx = RetryContext::new();
        assert!(ctx.has_budget(1));
        ctx.push("a", "b");
        assert!(!ctx.has_budget(1));
        assert!(ctx.has_budget(2));
    }
}
