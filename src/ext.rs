//! Fluent combinators for building decorator stacks.
//!
//! ```rust
//! use lifeline::{call_fn, Call, CallExt, Context, ResilienceError};
//! use std::time::Duration;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let upstream = call_fn(|_ctx: Context| async { Ok::<_, ResilienceError<String>>(7u32) });
//!
//! // Retry(Breaker(Timeout(Throttle(call))))
//! let guarded = upstream
//!     .throttle(10, 1, Duration::from_millis(100))?
//!     .timeout()
//!     .breaker(3)?
//!     .retry(2, Duration::from_millis(50));
//!
//! assert_eq!(guarded.call(Context::background()).await, Ok(7));
//! # Ok::<(), lifeline::ConfigError>(())
//! # }).unwrap();
//! ```

use crate::error::ConfigError;
use crate::{
    BoxCall, Breaker, Call, CallService, Debounce, DeferredDebounce, Retry, Throttle, Timeout,
};
use std::sync::Arc;
use std::time::Duration;

/// Extension methods available on every [`Call`].
pub trait CallExt: Call + Sized {
    /// See [`Retry::new`].
    fn retry(self, max_retries: usize, delay: Duration) -> Retry<Self> {
        Retry::new(self, max_retries, delay)
    }

    /// See [`Breaker::new`].
    fn breaker(self, failure_threshold: usize) -> Result<Breaker<Self>, ConfigError> {
        Breaker::new(self, failure_threshold)
    }

    /// Bounded only by the caller's context. Use [`Timeout::with_limit`] for an own bound.
    fn timeout(self) -> Timeout<Self> {
        Timeout::new(self)
    }

    /// See [`Throttle::new`].
    fn throttle(
        self,
        max: usize,
        refill_amount: usize,
        refill_period: Duration,
    ) -> Result<Throttle<Self>, ConfigError> {
        Throttle::new(self, max, refill_amount, refill_period)
    }

    /// Leading-edge debounce with a result cache.
    fn debounce(self, cooldown: Duration) -> Result<Debounce<Self>, ConfigError>
    where
        Self::Response: Clone + Sync,
        Self::Error: Clone + Sync,
    {
        Debounce::new(self, cooldown)
    }

    /// Trailing-edge debounce.
    fn deferred_debounce(self, cooldown: Duration) -> Result<DeferredDebounce<Self>, ConfigError>
    where
        Self::Response: Clone + Sync,
        Self::Error: Clone + Sync,
    {
        DeferredDebounce::new(self, cooldown)
    }

    /// Erase the concrete type.
    fn boxed(self) -> BoxCall<Self::Response, Self::Error> {
        Arc::new(self)
    }

    /// Expose as a `tower_service::Service<Context>`.
    fn into_service(self) -> CallService<Self> {
        CallService::new(self)
    }
}

impl<C: Call> CallExt for C {}
