//! Retry policy for RPC calls
//!
//! The transport retries with a fixed delay between attempts. Only failures that a
//! later attempt could fix are retried; an `error` field in a well-formed response
//! is terminal and goes straight back to the caller.

use std::time::Duration;
use tracing::{debug, warn};

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: u32 = 2;
/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-call retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub retries: u32,
    /// Bound on a single attempt
    pub timeout: Duration,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        Self {
            retries,
            timeout,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Classifies transport failures for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, connection reset, any non-2xx HTTP status
    Transient,
    /// Malformed request or a node-side rejection
    Permanent,
    /// Anything else; retried while attempts remain
    Unknown,
}

/// Classify a failure reason for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.starts_with("http ") {
        return ErrorClass::Transient;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("empty result")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("invalid params")
        || error_lower.contains("invalid request")
        || error_lower.contains("method not found")
        || error_lower.contains("builder error")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Attempt bookkeeping for one logical call
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub config: RetryConfig,
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl RetryContext {
    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last_error: None,
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, error: String) {
        self.attempt += 1;
        self.last_error = Some(error);
    }

    /// Delay before the next attempt, or `None` when the call should give up
    pub fn next_delay(&self, method: &str) -> Option<Duration> {
        let error = self.last_error.as_deref().unwrap_or("");
        if classify_error(error) == ErrorClass::Permanent {
            debug!(method = %method, error = %error, "Permanent transport error, not retrying");
            return None;
        }
        if self.attempt >= self.config.max_attempts() {
            return None;
        }
        warn!(
            method = %method,
            attempt = self.attempt,
            max_attempts = self.config.max_attempts(),
            error = %error,
            "RPC attempt failed, retrying"
        );
        Some(self.config.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.retries, 2);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_classify_transient() {
        assert_eq!(classify_error("operation timed out"), ErrorClass::Transient);
        assert_eq!(classify_error("HTTP 503 Service Unavailable"), ErrorClass::Transient);
        assert_eq!(classify_error("empty result"), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_permanent() {
        assert_eq!(classify_error("invalid request"), ErrorClass::Permanent);
        assert_eq!(classify_error("Method not found"), ErrorClass::Permanent);
    }

    #[test]
    fn test_every_http_status_is_transient() {
        assert_eq!(classify_error("HTTP 400 Bad Request: "), ErrorClass::Transient);
        assert_eq!(
            classify_error("HTTP 400 Bad Request: invalid request"),
            ErrorClass::Transient
        );
        assert_eq!(classify_error("HTTP 404 Not Found: method not found"), ErrorClass::Transient);
        assert_eq!(classify_error("HTTP 500 Internal Server Error: "), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_error("something odd"), ErrorClass::Unknown);
    }

    #[test]
    fn test_context_stops_after_max_attempts() {
        let mut ctx = RetryContext::with_config(RetryConfig::new(1, Duration::from_secs(1)));
        ctx.record_failure("connection reset".into());
        assert_eq!(ctx.next_delay("m"), Some(Duration::from_secs(1)));
        ctx.record_failure("connection reset".into());
        assert_eq!(ctx.next_delay("m"), None);
    }

    #[test]
    fn test_context_stops_on_permanent() {
        let mut ctx = RetryContext::with_config(RetryConfig::default());
        ctx.record_failure("invalid request".into());
        assert_eq!(ctx.next_delay("m"), None);
    }

    #[test]
    fn test_context_retries_bad_request_status() {
        let mut ctx = RetryContext::with_config(RetryConfig::default());
        ctx.record_failure("HTTP 400 Bad Request: ".into());
        assert_eq!(ctx.next_delay("m"), Some(Duration::from_secs(1)));
    }
}
