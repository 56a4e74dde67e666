//! Error kinds for the venue core.
//!
//! Handlers report [`CoreError::Schema`] and drop the offending frame; the
//! REST client maps venue responses through [`ErrorClass`] and retries only
//! the retryable classes. Stale order-book deltas are not errors at all:
//! the book drops them silently.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A payload was missing an expected field; the frame is dropped.
    #[error("schema error in {topic}: {detail}")]
    Schema { topic: &'static str, detail: String },

    /// A malformed intended order (e.g. LIMIT without price). Never sent.
    #[error("invalid order: {0}")]
    Validation(String),

    /// Network-level failure (timeout, reset). Retried internally.
    #[error("transport: {0}")]
    Transport(String),

    /// Venue told us to slow down. Backed off and retried with jitter.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Non-retryable venue rejection (bad key, bad params, symbol halted).
    #[error("venue error: {0}")]
    VenueFatal(String),

    /// Listen key or private session lost; the owning stream reconnects.
    #[error("auth expired: {0}")]
    AuthExpired(String),
}

impl CoreError {
    pub fn schema(topic: &'static str, detail: impl Into<String>) -> Self {
        CoreError::Schema {
            topic,
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Transport(e.to_string())
    }
}

/// Classification of a venue REST response, driven by each port's code table.
///
/// Codes absent from the table classify as `ClientFatal` with the raw
/// message captured, so a new venue error can never silently retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Success.
    Ok,
    /// Known no-op, e.g. cancelling an order that is already gone.
    Benign,
    /// Caller bug or account problem; retrying cannot help.
    ClientFatal,
    /// Throttled; retry after backing off with jitter.
    RateLimited,
    /// Transient venue-side failure; retry with backoff.
    ServerRetryable,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::ServerRetryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(ErrorClass::RateLimited.is_retryable());
        assert!(ErrorClass::ServerRetryable.is_retryable());
        assert!(!ErrorClass::Ok.is_retryable());
        assert!(!ErrorClass::Benign.is_retryable());
        assert!(!ErrorClass::ClientFatal.is_retryable());
    }

    #[test]
    fn test_schema_error_names_topic() {
        let e = CoreError::schema("orderbook", "missing seq id");
        assert!(e.to_string().contains("orderbook"));
    }
}
