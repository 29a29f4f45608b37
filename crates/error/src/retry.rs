//! Transient-failure pattern matching.

/// Closed list of substrings that mark a failure as transient.
///
/// Matching is case-insensitive. The list is deliberately conservative:
/// anything not on it is treated as permanent and surfaced to the caller.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "throttl",
    "too many requests",
    "connection reset",
    "broken pipe",
    "temporarily unavailable",
    "service unavailable",
    "try again",
    "429",
    "502",
    "503",
    "504",
    "eof",
];

/// True when `text` contains any transient pattern.
pub(crate) fn matches_transient(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use crate::UmbraError;

    #[test]
    fn transient_provider_messages_are_retryable() {
        for msg in [
            "dial tcp: i/o timeout",
            "ThrottlingException: rate exceeded",
            "read: Connection Reset by peer",
            "write: broken pipe",
            "upstream returned 503",
        ] {
            let err = UmbraError::provider("aws", "resolve", std::io::Error::other(msg));
            assert!(err.is_retryable(), "expected retryable: {msg}");
        }
    }

    #[test]
    fn permanent_provider_messages_are_not_retryable() {
        for msg in ["invalid signature", "access denied", "malformed response"] {
            let err = UmbraError::provider("aws", "resolve", std::io::Error::other(msg));
            assert!(!err.is_retryable(), "expected permanent: {msg}");
        }
    }

    #[test]
    fn pattern_matches_anywhere_in_the_source_chain() {
        let inner = std::io::Error::other("connection reset by peer");
        let err = UmbraError::provider("vault", "validate", inner);
        assert!(err.is_retryable());
    }
}
