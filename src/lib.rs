#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # lifeline
//!
//! Resilience decorators for async calls: retry, timeout, throttle, circuit breaker, and
//! debounce.
//!
//! ## Features
//!
//! - **Retry** with a fixed, cancellable delay and optional jitter
//! - **Timeout** over calls that ignore cancellation (the caller is released, the work is
//!   abandoned)
//! - **Throttle** with a token pool refilled in the background
//! - **Circuit breaker** with `2s << n` backoff before each trial call
//! - **Debounce**, both leading-edge (cached) and trailing-edge (deferred)
//! - **Composition** by nesting, fluent [`CallExt`] combinators, or `tower` layers
//!
//! Every decorator takes a [`Call`] and is itself a `Call` with the same response and error
//! types. Failures come back as [`ResilienceError`], which keeps upstream failures apart
//! from the decorators' own verdicts.
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::{call_fn, Call, CallExt, Context, ResilienceError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lifeline::ConfigError> {
//!     let lookup = call_fn(|_ctx: Context| async {
//!         // Your async operation here
//!         Ok::<_, ResilienceError<std::io::Error>>(())
//!     });
//!
//!     let guarded = lookup
//!         .throttle(100, 10, Duration::from_secs(1))?
//!         .timeout()
//!         .breaker(5)?
//!         .retry(3, Duration::from_millis(200));
//!
//!     let ctx = Context::background().with_timeout(Duration::from_secs(2));
//!     let _ = guarded.call(ctx).await;
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod circuit_breaker;
pub mod context;
pub mod debounce;
pub mod error;
pub mod ext;
pub mod prelude;
pub mod retry;
pub mod service;
pub mod throttle;
pub mod time;
pub mod timeout;

// Re-exports
pub use call::{call_fn, BoxCall, Call, CallFn};
pub use circuit_breaker::{Breaker, BreakerConfig, BreakerLayer, CircuitState, BACKOFF_BASE};
pub use context::{CancelGuard, Context, ContextError};
pub use debounce::{
    Debounce, DebounceConfig, DebounceLayer, DeferredDebounce, DeferredDebounceLayer,
    DEFAULT_POLL_INTERVAL,
};
pub use error::{ConfigError, ResilienceError};
pub use ext::CallExt;
pub use retry::{Jitter, Retry, RetryConfig, RetryLayer};
pub use service::{CallService, ServiceCall};
pub use throttle::{Throttle, ThrottleConfig, ThrottleLayer};
pub use time::{
    Clock, InstantSleeper, ManualClock, MonotonicClock, Sleeper, TokioSleeper, TrackingSleeper,
};
pub use timeout::{blocking_fn, slow_fn, BlockingFn, SlowFn, Timeout, TimeoutLayer, MAX_TIMEOUT};
