//! Convenient re-exports for building decorated calls.
pub use crate::{
    call::{call_fn, BoxCall, Call},
    circuit_breaker::{BreakerConfig, BreakerLayer},
    context::{Context, ContextError},
    debounce::{DebounceConfig, DebounceLayer, DeferredDebounceLayer},
    error::{ConfigError, ResilienceError},
    ext::CallExt,
    retry::{Jitter, RetryConfig, RetryLayer},
    throttle::{ThrottleConfig, ThrottleLayer},
    timeout::{TimeoutLayer, MAX_TIMEOUT},
};
