//! # lmflow
//!
//! Type-checked, self-correcting LLM calls.
//!
//! A [`Layer`] wraps one model call in a contract: the caller's input must
//! match an input [`Schema`], the model's answer must be a JSON object
//! matching an output [`Schema`], and when it isn't, the model is told what
//! went wrong and asked again, up to a try budget.
//!
//! ## Core Concepts
//!
//! - **[`Schema`] / [`TypeSpec`]**: declared field types (`int`,
//!   `list[str]`, `dict[str, float]`, `Union[int, NoneType]`, ...) and a
//!   validator that reports unknown keys, type mismatches and missing keys.
//! - **[`extract`]**: finds JSON objects embedded in free-form model text.
//! - **[`Backend`](backend::Backend)**: object-safe trait for models.
//!   [`OllamaBackend`], [`OpenAiBackend`] (feature `openai`) and
//!   [`MockBackend`] are provided.
//! - **[`RetryContext`]**: the per-invocation trail of [`Correction`]s
//!   replayed to the model on every retry.
//! - **[`Layer`]**: ties it all together.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lmflow::{Layer, OllamaBackend, Schema, TypeSpec};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let layer = Layer::builder(Arc::new(OllamaBackend::new("http://localhost:11434", "llama3.2")))
//!         .name("capital")
//!         .input(Schema::new().field("country", TypeSpec::Str))
//!         .prompt("What is the capital of [$country$]?")
//!         .output(Schema::new().field("capital", TypeSpec::Str))
//!         .build()?;
//!
//!     let input = json!({"country": "France"}).as_object().cloned().unwrap_or_default();
//!     let output = layer.invoke(&input).await?;
//!     println!("{}", output["capital"]);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod events;
pub mod extract;
pub mod layer;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use backend::{BackoffConfig, MockBackend, OllamaBackend};
#[cfg(feature = "openai")]
pub use backend::OpenAiBackend;
pub use client::LlmConfig;
pub use error::{FlowError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use layer::{Layer, LayerBuilder, LayerOutput};
pub use prompt::{FormatterSet, PromptSet};
pub use retry::{Correction, RetryContext};
pub use schema::{Schema, SchemaError, TypeSpec};
