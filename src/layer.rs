//! Layers: typed, self-correcting LLM calls.
//!
//! A [`Layer`] binds an input schema, a prompt template, and an output
//! schema to a [`Backend`]. Invoking it validates the caller's input, fills
//! the template, and keeps asking the model until it answers with a JSON
//! object that matches the output schema, feeding every rejected answer and
//! the reason for rejecting it back into the next attempt.
//!
//! ```text
//! ValidatingInput ─► Prompting ─► AwaitingGeneration ─► ParsingOutput ─► ValidatingOutput
//!        │                               ▲                   │                 │
//!        ▼                               └──── Retrying ◄────┴─────────────────┤
//!   input error                                  │                             ▼
//!                                           Exhausted                       Success
//! ```

use crate::backend::Backend;
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::prompt::{unresolved_markers, FormatterSet, PromptSet};
use crate::retry::{Candidate, Correction, Generator, RetryContext};
use crate::schema::Schema;
use crate::FlowError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Try budget used by [`Layer::invoke`] unless configured otherwise.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// A schema-checked LLM call.
///
/// # Example
///
/// ```
/// use lmflow::{Layer, MockBackend, Schema, TypeSpec};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let layer = Layer::builder(Arc::new(MockBackend::fixed(r#"{"sum": 5}"#)))
///     .input(Schema::new().field("a", TypeSpec::Int).field("b", TypeSpec::Int))
///     .prompt("Add [$a$] and [$b$].")
///     .output(Schema::new().field("sum", TypeSpec::Int))
///     .build()
///     .unwrap();
///
/// let input = json!({"a": 2, "b": 3}).as_object().cloned().unwrap();
/// let output = layer.invoke(&input).await.unwrap();
/// assert_eq!(output["sum"], json!(5));
/// # });
/// ```
pub struct Layer {
    name: String,
    input: Schema,
    template: String,
    output: Schema,
    formatters: FormatterSet,
    generator: Generator,
    max_tries: u32,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Layer {
    /// Start building a layer around `backend`.
    pub fn builder(backend: Arc<dyn Backend>) -> LayerBuilder {
        LayerBuilder {
            backend,
            name: "layer".to_string(),
            input: Schema::new(),
            template: String::new(),
            output: Schema::new(),
            formatters: FormatterSet::new(),
            prompts: PromptSet::default(),
            max_tries: DEFAULT_MAX_TRIES,
            event_handler: None,
        }
    }

    /// Build a layer with default formatters and prompts.
    pub fn new(
        backend: Arc<dyn Backend>,
        input: Schema,
        prompt: impl Into<String>,
        output: Schema,
    ) -> Result<Self> {
        Self::builder(backend)
            .input(input)
            .prompt(prompt)
            .output(output)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Substitute the formatted input values into the prompt template.
    pub fn fill_prompt(&self, input: &Map<String, Value>) -> String {
        self.formatters.fill(&self.template, &self.input, input)
    }

    /// Run the layer with its configured try budget.
    pub async fn invoke(&self, input: &Map<String, Value>) -> Result<Map<String, Value>> {
        self.invoke_with_tries(input, self.max_tries).await
    }

    /// Run the layer with an explicit try budget.
    pub async fn invoke_with_tries(
        &self,
        input: &Map<String, Value>,
        max_tries: u32,
    ) -> Result<Map<String, Value>> {
        Ok(self.invoke_detailed(input, max_tries).await?.value)
    }

    /// Run the layer and report how the answer was reached.
    ///
    /// Fails with [`FlowError::Schema`] when `input` does not match the input
    /// schema (no backend call is made), [`FlowError::RetryBudgetExceeded`]
    /// when `max_tries` attempts produced no schema-valid object, or the
    /// backend's own error (e.g. [`FlowError::BackendCapacity`]).
    pub async fn invoke_detailed(
        &self,
        input: &Map<String, Value>,
        max_tries: u32,
    ) -> Result<LayerOutput> {
        if max_tries == 0 {
            return Err(FlowError::InvalidConfig("max_tries must be at least 1".into()));
        }

        if let Err(e) = self.input.validate(input) {
            tracing::debug!(layer = %self.name, error = %e, "input rejected");
            return Err(e.into());
        }

        let prompt = self.fill_prompt(input);
        emit(
            &self.event_handler,
            Event::InvokeStart {
                name: self.name.clone(),
                prompt: prompt.clone(),
                max_tries,
            },
        );

        // Fresh per invocation; never shared or reused.
        let mut context = RetryContext::new();
        let result = self.generate_valid(&prompt, max_tries, &mut context).await;

        let attempts = match &result {
            Err(FlowError::RetryBudgetExceeded { .. }) => context.len() as u32,
            _ => context.len() as u32 + 1,
        };
        emit(
            &self.event_handler,
            Event::InvokeEnd {
                name: self.name.clone(),
                attempts,
                ok: result.is_ok(),
            },
        );

        match result {
            Ok(candidate) => {
                tracing::debug!(layer = %self.name, attempts, "output accepted");
                Ok(LayerOutput {
                    value: candidate.object,
                    raw_response: candidate.raw,
                    attempts,
                    corrections: context.into_corrections(),
                })
            }
            Err(e) => {
                tracing::warn!(layer = %self.name, attempts, error = %e, "invocation failed");
                Err(e)
            }
        }
    }

    /// The AwaitingGeneration → ValidatingOutput → Retrying cycle.
    async fn generate_valid(
        &self,
        prompt: &str,
        max_tries: u32,
        context: &mut RetryContext,
    ) -> Result<Candidate> {
        loop {
            let candidate = self
                .generator
                .generate(prompt, &self.output, max_tries, context)
                .await?;
            let attempt = context.len() as u32 + 1;

            let reason = match self.output.validate(&candidate.object) {
                Ok(()) => return Ok(candidate),
                Err(e) => e.to_string(),
            };

            tracing::warn!(layer = %self.name, attempt, %reason, "output rejected by schema");
            emit(
                &self.event_handler,
                Event::ValidationFailed {
                    name: self.name.clone(),
                    attempt,
                    reason: reason.clone(),
                },
            );
            context.push(Value::Object(candidate.object).to_string(), reason);

            if !context.has_budget(max_tries) {
                return Err(FlowError::RetryBudgetExceeded { max_tries });
            }
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("template", &self.template)
            .field("output", &self.output)
            .field("formatters", &self.formatters)
            .field("generator", &self.generator)
            .field("max_tries", &self.max_tries)
            .finish()
    }
}

/// Builder for [`Layer`].
pub struct LayerBuilder {
    backend: Arc<dyn Backend>,
    name: String,
    input: Schema,
    template: String,
    output: Schema,
    formatters: FormatterSet,
    prompts: PromptSet,
    max_tries: u32,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl LayerBuilder {
    /// Name used in events and log fields. Default: `"layer"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn input(mut self, schema: Schema) -> Self {
        self.input = schema;
        self
    }

    /// Prompt template with `[$field$]` markers for input fields.
    pub fn prompt(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn output(mut self, schema: Schema) -> Self {
        self.output = schema;
        self
    }

    /// Override how one input field is rendered into the prompt.
    pub fn formatter(
        mut self,
        field: impl Into<String>,
        f: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.formatters = self.formatters.with(field, f);
        self
    }

    /// Replace all formatter overrides at once.
    pub fn formatters(mut self, formatters: FormatterSet) -> Self {
        self.formatters = formatters;
        self
    }

    /// System and correction templates. Default: [`PromptSet::reasoning`].
    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Try budget for [`Layer::invoke`]. Default: [`DEFAULT_MAX_TRIES`].
    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Validate the configuration and build the layer.
    pub fn build(self) -> Result<Layer> {
        if self.max_tries == 0 {
            return Err(FlowError::InvalidConfig("max_tries must be at least 1".into()));
        }
        let unknown = self.formatters.unknown_fields(&self.input);
        if !unknown.is_empty() {
            return Err(FlowError::InvalidConfig(format!(
                "formatters given for fields not in the input schema: {:?}",
                unknown
            )));
        }
        if !self.prompts.system.contains(crate::prompt::OUT_FMT_MARKER) {
            return Err(FlowError::InvalidConfig(format!(
                "system prompt must contain {}",
                crate::prompt::OUT_FMT_MARKER
            )));
        }

        let unresolved = unresolved_markers(&self.template, &self.input);
        if !unresolved.is_empty() {
            tracing::warn!(layer = %self.name, markers = ?unresolved, "template markers name no input field and will be left verbatim");
        }

        let generator = Generator::new(self.backend, self.prompts)
            .with_name(self.name.clone())
            .with_event_handler(self.event_handler.clone());

        Ok(Layer {
            name: self.name,
            input: self.input,
            template: self.template,
            output: self.output,
            formatters: self.formatters,
            generator,
            max_tries: self.max_tries,
            event_handler: self.event_handler,
        })
    }
}

/// A schema-valid answer plus how it was reached.
#[derive(Debug, Clone)]
pub struct LayerOutput {
    /// The validated object.
    pub value: Map<String, Value>,
    /// The trimmed reply the object came from.
    pub raw_response: String,
    /// Backend calls made, including the successful one.
    pub attempts: u32,
    /// Rejected attempts, oldest first.
    pub corrections: Vec<Correction>,
}

impl LayerOutput {
    /// Deserialize the validated object into a caller type.
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.value.clone()))?)
    }
}
