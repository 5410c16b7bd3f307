//! Retry policy - classify tool failures and pace the backoff

use std::time::Duration;

/// Failure signature synthesized for a timed-out subprocess; always retryable
pub const TIMEOUT_SIGNATURE: &str = "command did not complete";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(15);

/// Classification of one failed apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; the matched signature is kept for logging
    Retryable { signature: String },
    Fatal,
}

/// Bounded exponential retry with signature-based classification
///
/// Classification is a fixed table of case-insensitive substrings rather
/// than a parser; capacity and rate-limit messages differ per provider but
/// are stable enough to match on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub retryable_signatures: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: 2,
            retryable_signatures: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Extend the signature table (provider-specific entries)
    pub fn with_signatures(mut self, signatures: &[&str]) -> Self {
        self.retryable_signatures
            .extend(signatures.iter().map(|s| (*s).to_string()));
        self
    }

    /// Classify a failure by its combined output
    pub fn classify(&self, output: &str) -> ErrorClass {
        let haystack = output.to_lowercase();
        if haystack.contains(TIMEOUT_SIGNATURE) {
            return ErrorClass::Retryable {
                signature: TIMEOUT_SIGNATURE.to_string(),
            };
        }
        for signature in &self.retryable_signatures {
            if haystack.contains(&signature.to_lowercase()) {
                return ErrorClass::Retryable {
                    signature: signature.clone(),
                };
            }
        }
        ErrorClass::Fatal
    }

    /// Delay before the next try: `base * multiplier^(attempt - 1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default().with_signatures(&["Out of host capacity", "TooManyRequests"])
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        let policy = policy();
        assert_eq!(
            policy.classify("Error: OUT OF HOST CAPACITY in AD-1"),
            ErrorClass::Retryable {
                signature: "Out of host capacity".into()
            }
        );
        assert_eq!(
            policy.classify("429 toomanyrequests"),
            ErrorClass::Retryable {
                signature: "TooManyRequests".into()
            }
        );
    }

    #[test]
    fn test_unknown_failures_are_fatal() {
        assert_eq!(
            policy().classify("Error: invalid compartment OCID"),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_timeout_signature_always_retryable() {
        // even with an empty provider table
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.classify("command did not complete within 30 seconds"),
            ErrorClass::Retryable { .. }
        ));
    }

    #[test]
    fn test_default_delays_double_from_fifteen_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(15));
        assert_eq!(policy.delay_for(2), Duration::from_secs(30));
        assert_eq!(policy.delay_for(3), Duration::from_secs(60));
    }

    #[test]
    fn test_small_policy_delays() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            retryable_signatures: Vec::new(),
        };
        let delays: Vec<Duration> = (1..=3).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }
}
