//! Error types shared by every decorator.
use crate::context::ContextError;
use std::fmt;
use std::time::Duration;

/// Unified failure type produced by decorated calls.
///
/// Decorators never swallow a failure: they pass `Inner` through unchanged, replace it with
/// `Cancelled` once the governing context has ended, or synthesize `RateLimited` /
/// `CircuitOpen` when short-circuiting before the wrapped call runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError<E> {
    /// The wrapped call itself failed
    Inner(E),
    /// The governing context was cancelled or its deadline passed
    Cancelled(ContextError),
    /// The throttle's token pool was empty
    RateLimited { max: usize },
    /// The circuit breaker rejected the call during its backoff window
    CircuitOpen { consecutive_failures: usize, retry_in: Duration },
    /// A deferred debounce has not settled any result yet
    Pending,
    /// A spawned task ended without reporting an outcome
    Aborted,
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner(e) => write!(f, "{}", e),
            Self::Cancelled(reason) => write!(f, "call abandoned: {}", reason),
            Self::RateLimited { max } => {
                write!(f, "too many calls (token pool of {} exhausted)", max)
            }
            Self::CircuitOpen { consecutive_failures, retry_in } => write!(
                f,
                "service unreachable ({} consecutive failures, retry in {:?})",
                consecutive_failures, retry_in
            ),
            Self::Pending => write!(f, "no settled result yet"),
            Self::Aborted => write!(f, "task ended without reporting a result"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<E> From<ContextError> for ResilienceError<E> {
    fn from(reason: ContextError) -> Self {
        Self::Cancelled(reason)
    }
}

impl<E> ResilienceError<E> {
    /// Check if the governing context ended
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Check if this error is a throttle rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// The context's terminal error, if this failure came from cancellation.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Remaining backoff reported by an open circuit.
    pub fn retry_in(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_in, .. } => Some(*retry_in),
            _ => None,
        }
    }

    /// Map the upstream error type, leaving every synthesized variant untouched.
    pub fn map_inner<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Inner(e) => ResilienceError::Inner(f(e)),
            Self::Cancelled(reason) => ResilienceError::Cancelled(reason),
            Self::RateLimited { max } => ResilienceError::RateLimited { max },
            Self::CircuitOpen { consecutive_failures, retry_in } => {
                ResilienceError::CircuitOpen { consecutive_failures, retry_in }
            }
            Self::Pending => ResilienceError::Pending,
            Self::Aborted => ResilienceError::Aborted,
        }
    }
}

/// Errors produced while validating decorator configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failure_threshold must be > 0 (got {0})")]
    InvalidFailureThreshold(usize),
    #[error("max tokens must be > 0 (got {0})")]
    InvalidMaxTokens(usize),
    #[error("refill_amount must be > 0 (got {0})")]
    InvalidRefillAmount(usize),
    #[error("{name} must be non-zero (got {value:?})")]
    ZeroDuration { name: &'static str, value: Duration },
    #[error("{name} must be below {max:?} (got {value:?})")]
    DurationTooLarge { name: &'static str, value: Duration, max: Duration },
}

pub(crate) fn non_zero(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration { name, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn inner_displays_verbatim() {
        let err = ResilienceError::Inner(DummyError("connection refused"));
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(err.source().unwrap().to_string(), "connection refused");
    }

    #[test]
    fn circuit_open_mentions_unreachable() {
        let err: ResilienceError<DummyError> = ResilienceError::CircuitOpen {
            consecutive_failures: 3,
            retry_in: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("service unreachable"));
        assert!(msg.contains('3'));
        assert_eq!(err.retry_in(), Some(Duration::from_secs(2)));
        assert!(err.source().is_none());
    }

    #[test]
    fn cancelled_exposes_context_error() {
        let err: ResilienceError<DummyError> = ContextError::DeadlineExceeded.into();
        assert!(err.is_cancelled());
        assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(err.source().is_some());
    }

    #[test]
    fn predicates_cover_all_variants() {
        let limited: ResilienceError<DummyError> = ResilienceError::RateLimited { max: 3 };
        assert!(limited.is_rate_limited());
        assert!(!limited.is_circuit_open());
        assert!(limited.to_string().contains("too many calls"));

        let pending: ResilienceError<DummyError> = ResilienceError::Pending;
        assert!(pending.is_pending());
        assert!(!pending.is_inner());

        let inner = ResilienceError::Inner(DummyError("x"));
        assert!(inner.is_inner());
        assert_eq!(inner.as_inner(), Some(&DummyError("x")));
        assert_eq!(inner.into_inner(), Some(DummyError("x")));
    }

    #[test]
    fn map_inner_keeps_synthesized_variants() {
        let inner: ResilienceError<DummyError> = ResilienceError::Inner(DummyError("boom"));
        assert_eq!(inner.map_inner(|e| e.0.len()), ResilienceError::Inner(4));

        let limited: ResilienceError<DummyError> = ResilienceError::RateLimited { max: 7 };
        assert_eq!(limited.map_inner(|e| e.0.len()), ResilienceError::RateLimited { max: 7 });
    }

    #[test]
    fn config_error_messages() {
        assert_eq!(
            ConfigError::InvalidFailureThreshold(0).to_string(),
            "failure_threshold must be > 0 (got 0)"
        );
        let err = non_zero("cooldown", Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("cooldown"));
    }
}
