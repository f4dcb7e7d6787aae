//! Prompt templates and per-field value formatting.
//!
//! Layer templates mark input fields as `[$name$]`. Substitution is plain
//! string replacement: a marker may appear any number of times, and a marker
//! naming no input field is left as-is.

use crate::schema::Schema;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Marker in a system template where the output schema description goes.
pub const OUT_FMT_MARKER: &str = "[$out_fmt$]";
/// Marker in a correction template where the error description goes.
pub const EXCEPT_MARKER: &str = "[$except$]";

const REASONING_SYSTEM: &str = "You are a helpful agent capable of completing any task correctly and efficiently. \
You will be given a request and it is your job to think step-by-step and then respond to this request using a JSON object with exactly the following form:\n[$out_fmt$]\n\
Be sure to match this format exactly including the keys and using the specified data types. Do not add any additional items or remove any of the specified items. \
Please think carefully with step-by-step reasoning before coming up with a solution in the form of a JSON object. Do not provide the solution prior to thinking through the steps.";

const DIRECT_SYSTEM: &str = "You are a helpful agent capable of completing any task correctly and efficiently. \
You will be given a request and it is your job to respond to this request using only a JSON object with the following form:\n[$out_fmt$]\n\
Be sure to match this format exactly including the keys and using the specified data types. \
Please include only the JSON object in your response.";

const CORRECTION: &str = "There is an error in your response. This is the cause: [$except$]\n\
Please correct this error with a JSON object in the proper format.";

/// Renders one input value for template substitution.
pub type Formatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Default rendering: strings appear without quotes, everything else as
/// compact JSON.
pub fn default_format(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The marker for input field `name`, i.e. `[$name$]`.
pub fn marker(name: &str) -> String {
    format!("[${}$]", name)
}

/// Per-field formatters for one layer's input schema.
///
/// Fields without an override use [`default_format`].
#[derive(Clone, Default)]
pub struct FormatterSet {
    overrides: HashMap<String, Formatter>,
}

impl FormatterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how `field` is rendered.
    pub fn with(
        mut self,
        field: impl Into<String>,
        f: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.overrides.insert(field.into(), Arc::new(f));
        self
    }

    /// Fields with an override that `schema` does not declare, sorted.
    pub fn unknown_fields(&self, schema: &Schema) -> Vec<String> {
        let mut unknown: Vec<String> = self
            .overrides
            .keys()
            .filter(|k| !schema.contains(k))
            .cloned()
            .collect();
        unknown.sort();
        unknown
    }

    /// Render `value` for `field`.
    pub fn format(&self, field: &str, value: &Value) -> String {
        match self.overrides.get(field) {
            Some(f) => f(value),
            None => default_format(value),
        }
    }

    /// Substitute every `[$key$]` in `template` with the formatted value of
    /// `key` from `values`. Only schema-declared fields are substituted.
    pub fn fill(&self, template: &str, schema: &Schema, values: &Map<String, Value>) -> String {
        let mut prompt = template.to_string();
        for key in schema.keys() {
            if let Some(value) = values.get(key) {
                prompt = prompt.replace(&marker(key), &self.format(key, value));
            }
        }
        prompt
    }
}

impl fmt::Debug for FormatterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&String> = self.overrides.keys().collect();
        fields.sort();
        f.debug_struct("FormatterSet")
            .field("overridden", &fields)
            .finish()
    }
}

/// Markers in `template` whose name is not a field of `schema`, in order of
/// first appearance. Such markers survive filling verbatim.
pub fn unresolved_markers(template: &str, schema: &Schema) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("[$") {
        let after = &rest[start + 2..];
        match after.find("$]") {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty()
                    && !schema.contains(name)
                    && !found.iter().any(|f: &String| f == name)
                {
                    found.push(name.to_string());
                }
                rest = &after[end + 2..];
            }
            None => break,
        }
    }
    found
}

/// System and correction templates sent to the backend.
///
/// The system template must contain [`OUT_FMT_MARKER`]; the correction
/// template should contain [`EXCEPT_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub system: String,
    pub correction: String,
}

impl PromptSet {
    /// Ask the model to reason step by step before answering with JSON.
    pub fn reasoning() -> Self {
        Self {
            system: REASONING_SYSTEM.to_string(),
            correction: CORRECTION.to_string(),
        }
    }

    /// Ask the model for the JSON object only.
    pub fn direct() -> Self {
        Self {
            system: DIRECT_SYSTEM.to_string(),
            correction: CORRECTION.to_string(),
        }
    }

    pub fn with_system(mut self, template: impl Into<String>) -> Self {
        self.system = template.into();
        self
    }

    pub fn with_correction(mut self, template: impl Into<String>) -> Self {
        self.correction = template.into();
        self
    }

    /// The system prompt for an output schema.
    pub fn render_system(&self, output: &Schema) -> String {
        self.system.replace(OUT_FMT_MARKER, &output.describe())
    }

    /// The user turn telling the model what was wrong with its last output.
    pub fn render_correction(&self, error: &str) -> String {
        self.correction.replace(EXCEPT_MARKER, error)
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::reasoning()
    }
}
