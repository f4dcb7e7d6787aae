use crate::schema::SchemaError;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by layers, backends, and their components.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Caller input did not match the layer's input schema. Never retried.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The shared try budget ran out before the model produced a
    /// schema-valid JSON object.
    #[error("could not produce an adequate response in less than {max_tries} attempts")]
    RetryBudgetExceeded {
        /// The configured number of tries.
        max_tries: u32,
    },

    /// The backend cannot satisfy the request at all (e.g. the prompt
    /// exceeds its context window). Retrying the same prompt cannot help.
    #[error("backend cannot satisfy the request: {0}")]
    BackendCapacity(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON handling failed at the serde level.
    #[error("JSON handling failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by the HTTP [`Backend`](crate::backend::Backend)
    /// implementations when the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Whether this error came from validating caller input.
    pub fn is_input_error(&self) -> bool {
        matches!(self, FlowError::Schema(_))
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_error_names_the_budget() {
        let err = FlowError::RetryBudgetExceeded { max_tries: 2 };
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn schema_errors_are_transparent() {
        let err: FlowError = SchemaError::UnknownKey("colour".into()).into();
        assert!(err.is_input_error());
        assert_eq!(err.to_string(), "colour is not a valid key");
    }
}
