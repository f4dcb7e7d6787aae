//! Lifecycle hooks for layer invocations.
//!
//! Provides an optional, non-intrusive way to observe what a layer is doing:
//! when an invocation starts, each generation attempt, each rejected output,
//! and how the invocation ended. Implement [`EventHandler`] to feed progress
//! displays or collect retry statistics.

use std::sync::Arc;

/// Events emitted during a layer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An invocation passed input validation and is about to generate.
    InvokeStart {
        /// Layer name.
        name: String,
        /// The filled prompt.
        prompt: String,
        /// Try budget for this invocation.
        max_tries: u32,
    },
    /// A backend call is about to be made.
    GenerationStart {
        name: String,
        /// 1-indexed attempt number within the invocation.
        attempt: u32,
    },
    /// The reply contained no JSON object.
    ParseFailed {
        name: String,
        attempt: u32,
        /// The trimmed raw reply.
        raw: String,
    },
    /// The reply's JSON object failed output-schema validation.
    ValidationFailed {
        name: String,
        attempt: u32,
        /// Validator error text.
        reason: String,
    },
    /// The invocation finished.
    InvokeEnd {
        name: String,
        /// Backend calls made.
        attempts: u32,
        /// Whether a schema-valid object was produced.
        ok: bool,
    },
}

/// Handler for layer lifecycle events.
///
/// This is entirely optional -- layers work without an event handler.
///
/// # Example
///
/// ```
/// use lmflow::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::ValidationFailed { name, reason, .. } => println!("[{}] rejected: {}", name, reason),
///             Event::InvokeEnd { name, ok, attempts } => println!("[{}] ok={} after {}", name, ok, attempts),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when a layer emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use lmflow::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::ParseFailed { raw, .. } = event {
///         eprintln!("unparsable: {}", raw);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
