use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for upstream fetches.
///
/// Only `RateLimited` is recoverable through the retry queue; every
/// other variant is definitive for the attempt that produced it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid stock symbol: {0}")]
    InvalidSymbol(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error: {0}")]
    Provider(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited(_))
    }

    /// Classify a raw provider error message, promoting rate-limit
    /// phrasing to the recoverable variant.
    pub fn from_provider_message(message: String) -> FetchError {
        if is_rate_limit_message(&message) {
            FetchError::RateLimited(message)
        } else {
            FetchError::Provider(message)
        }
    }
}

/// Phrases the upstream uses when throttling, matched case-insensitively
/// as substrings. Includes the provider's Vietnamese wording for
/// "too many requests" / "please try again later".
const RATE_LIMIT_PHRASES: [&str; 4] = [
    "rate limit",
    "too many requests",
    "quá nhiều request",
    "vui lòng thử lại sau",
];

pub fn is_rate_limit_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RATE_LIMIT_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limit_phrases() {
        assert!(is_rate_limit_message("Rate Limit exceeded"));
        assert!(is_rate_limit_message("HTTP 429: Too Many Requests"));
        assert!(is_rate_limit_message("Quá nhiều request, vui lòng thử lại sau"));
        assert!(!is_rate_limit_message("connection refused"));
        assert!(!is_rate_limit_message("invalid symbol"));
    }

    #[test]
    fn provider_message_classification() {
        assert!(FetchError::from_provider_message("too many requests".into()).is_rate_limited());
        assert!(!FetchError::from_provider_message("500 internal error".into()).is_rate_limited());
    }

    #[test]
    fn timeout_is_not_rate_limited() {
        let err = FetchError::Timeout(Duration::from_secs(30));
        assert!(!err.is_rate_limited());
    }
}
