//! Transport-level retry policy for the HTTP backends.
//!
//! [`BackoffConfig`] decides whether a failed request is worth repeating and
//! how long to wait first. It sits below the layer's try budget: a request
//! that succeeds after transport retries still counts as one try, and a
//! request that never succeeds surfaces as a backend error.

use crate::FlowError;
use std::time::Duration;

/// How a computed delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Wait exactly the computed delay.
    Off,
    /// Wait anywhere in `[0, delay)`.
    Full,
    /// Wait at least half the delay, at most all of it.
    Half,
}

/// Transport retry policy.
///
/// # Example
///
/// ```
/// use lmflow::backend::BackoffConfig;
///
/// assert_eq!(BackoffConfig::none().max_retries, 0);
/// assert_eq!(BackoffConfig::hosted().max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries after the first request. `0` disables retrying.
    pub max_retries: u32,
    /// Ceiling for the first retry's delay.
    pub initial_delay: Duration,
    /// Growth factor of the ceiling per further retry.
    pub multiplier: f64,
    /// No computed delay exceeds this.
    pub max_delay: Duration,
    pub jitter: Jitter,
    /// HTTP statuses worth retrying. Connection failures always are.
    pub retryable_statuses: Vec<u16>,
    /// Wait exactly as long as a provider's `Retry-After` asks, when given.
    pub respect_retry_after: bool,
}

impl BackoffConfig {
    /// Never retry. The default, and the right choice for a local Ollama
    /// where a failed request will not heal itself.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::hosted()
        }
    }

    /// Hosted APIs with shared rate limits: 3 retries growing from 1s by 2x
    /// up to 60s, fully jittered, honouring `Retry-After`.
    pub fn hosted() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Jitter::Full,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    /// Someone is waiting on the answer: 2 quick retries, capped at 10s.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            ..Self::hosted()
        }
    }

    /// Whether `error` warrants another request after `retries_done` retries.
    ///
    /// Only transient transport failures qualify. A capacity failure or a
    /// rejected request (e.g. 400) would fail the same way again.
    pub fn should_retry(&self, error: &FlowError, retries_done: u32) -> bool {
        if retries_done >= self.max_retries {
            return false;
        }
        match error {
            FlowError::HttpError { status, .. } => self.retryable_statuses.contains(status),
            FlowError::Request(_) => true,
            _ => false,
        }
    }

    /// Wait before the `retry`-th retry (1-based) caused by `cause`.
    pub fn delay_before(&self, retry: u32, cause: &FlowError) -> Duration {
        if let FlowError::HttpError {
            retry_after: Some(wait),
            ..
        } = cause
        {
            if self.respect_retry_after {
                return *wait;
            }
        }
        self.jittered(self.ceiling(retry))
    }

    /// `initial_delay * multiplier^(retry - 1)`, bounded by `max_delay`.
    fn ceiling(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn jittered(&self, ceiling: Duration) -> Duration {
        match self.jitter {
            Jitter::Off => ceiling,
            Jitter::Full => ceiling.mul_f64(fastrand::f64()),
            Jitter::Half => {
                let half = ceiling / 2;
                half + half.mul_f64(fastrand::f64())
            }
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(max_delay: Duration) -> BackoffConfig {
        BackoffConfig {
            max_retries: 5,
            max_delay,
            jitter: Jitter::Off,
            respect_retry_after: false,
            ..BackoffConfig::hosted()
        }
    }

    fn http(status: u16, retry_after: Option<Duration>) -> FlowError {
        FlowError::HttpError {
            status,
            body: "err".into(),
            retry_after,
        }
    }

    #[test]
    fn ceiling_doubles_per_retry() {
        let config = exact(Duration::from_secs(60));
        let cause = http(503, None);
        let delays: Vec<_> = (1..=4).map(|n| config.delay_before(n, &cause)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn ceiling_is_bounded_even_when_it_overflows() {
        let config = exact(Duration::from_secs(5));
        let cause = http(503, None);
        assert_eq!(config.delay_before(4, &cause), Duration::from_secs(5));
        assert_eq!(config.delay_before(u32::MAX, &cause), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_ceiling() {
        let cause = http(503, None);
        let full = BackoffConfig {
            respect_retry_after: false,
            ..BackoffConfig::hosted()
        };
        let half = BackoffConfig {
            jitter: Jitter::Half,
            ..full.clone()
        };
        for _ in 0..100 {
            assert!(full.delay_before(2, &cause) <= Duration::from_secs(2));
            let d = half.delay_before(2, &cause);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let cause = http(429, Some(Duration::from_secs(7)));
        assert_eq!(
            BackoffConfig::hosted().delay_before(1, &cause),
            Duration::from_secs(7)
        );
        assert_eq!(
            exact(Duration::from_secs(60)).delay_before(1, &cause),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn only_transient_failures_are_retried() {
        let config = BackoffConfig::hosted();
        assert!(config.should_retry(&http(429, None), 0));
        assert!(config.should_retry(&http(503, None), 2));
        assert!(!config.should_retry(&http(503, None), 3));
        assert!(!config.should_retry(&http(400, None), 0));
        assert!(!config.should_retry(&FlowError::BackendCapacity("context window".into()), 0));
        assert!(!BackoffConfig::none().should_retry(&http(429, None), 0));
    }

    #[test]
    fn presets() {
        assert_eq!(BackoffConfig::default().max_retries, 0);
        let interactive = BackoffConfig::interactive();
        assert_eq!(interactive.max_retries, 2);
        assert_eq!(interactive.max_delay, Duration::from_secs(10));
        assert!(interactive.retryable_statuses.contains(&429));
    }
}
