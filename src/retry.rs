//! Retry decorator.
//!
//! Semantics:
//! - `max_retries` counts re-invocations after the first attempt, so a call that always fails
//!   runs `max_retries + 1` times.
//! - The wait between attempts is a fixed `delay`, optionally randomized by [`Jitter`].
//! - The wait races the context: if the context ends first, the wrapper returns
//!   `ResilienceError::Cancelled` with the context's reason instead of the last failure.
//! - When attempts run out, the last failure is returned verbatim.
//!
//! Invariants:
//! - Attempts are strictly sequential.
//! - `should_retry` returning false ends the loop with that failure.
//!
//! ```rust
//! use lifeline::{call_fn, Call, Context, ResilienceError, Retry, InstantSleeper};
//! use std::time::Duration;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let flaky = call_fn(|_ctx: Context| async {
//!     Err::<(), _>(ResilienceError::Inner("connection reset"))
//! });
//! let retried = Retry::new(flaky, 2, Duration::from_millis(100)).with_sleeper(InstantSleeper);
//! let err = retried.call(Context::background()).await.unwrap_err();
//! assert_eq!(err, ResilienceError::Inner("connection reset"));
//! # });
//! ```

use crate::error::ConfigError;
use crate::{Call, Context, ResilienceError, Sleeper, TokioSleeper};
use async_trait::async_trait;
use rand::{rng, Rng};
use std::sync::Arc;
use std::time::Duration;
use tower_layer::Layer;

/// Randomization applied to the inter-attempt delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Wait exactly `delay`
    #[default]
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// Uniform in `[delay/2, delay]`
    Equal,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng().random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng().random_range(millis / 2..=millis)),
        }
    }
}

/// Validated retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryConfig {
    pub max_retries: usize,
    pub delay: Duration,
}

impl RetryConfig {
    /// A zero delay is allowed; it retries back to back.
    pub fn new(max_retries: usize, delay: Duration) -> Result<Self, ConfigError> {
        let cfg = Self { max_retries, delay };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Re-check values that may have come from deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delay >= crate::timeout::MAX_TIMEOUT {
            return Err(ConfigError::DurationTooLarge {
                name: "delay",
                value: self.delay,
                max: crate::timeout::MAX_TIMEOUT,
            });
        }
        Ok(())
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>;

fn retry_any<E>(_err: &ResilienceError<E>) -> bool {
    true
}

/// Re-invokes the wrapped call on failure.
pub struct Retry<C: Call> {
    inner: Arc<C>,
    config: RetryConfig,
    jitter: Jitter,
    should_retry: RetryPredicate<C::Error>,
    sleeper: Arc<dyn Sleeper>,
}

impl<C: Call> Clone for Retry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: self.config,
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<C: Call> std::fmt::Debug for Retry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("max_retries", &self.config.max_retries)
            .field("delay", &self.config.delay)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<C: Call> Retry<C> {
    /// Delays past [`MAX_TIMEOUT`](crate::MAX_TIMEOUT) are accepted here; the wait then
    /// only ends with the context.
    pub fn new(inner: C, max_retries: usize, delay: Duration) -> Self {
        Self::build(inner, RetryConfig { max_retries, delay })
    }

    /// Errors if the config does not validate.
    pub fn with_config(inner: C, config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(inner, config))
    }

    fn build(inner: C, config: RetryConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config,
            jitter: Jitter::None,
            should_retry: Arc::new(retry_any::<C::Error>),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set jitter strategy.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether a failure is worth another attempt.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResilienceError<C::Error>) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn config(&self) -> RetryConfig {
        self.config
    }
}

#[async_trait]
impl<C> Call for Retry<C>
where
    C: Call,
    C::Error: std::fmt::Debug,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        let mut attempt = 0usize;
        loop {
            let err = match self.inner.call(ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.config.max_retries || !(self.should_retry)(&err) {
                return Err(err);
            }
            if let Some(reason) = ctx.err() {
                return Err(ResilienceError::Cancelled(reason));
            }
            attempt += 1;

            let delay = self.jitter.apply(self.config.delay);
            tracing::warn!(attempt, ?delay, error = ?err, "attempt failed, retrying");

            tokio::select! {
                _ = self.sleeper.sleep(delay) => {}
                reason = ctx.done() => {
                    tracing::debug!(attempt, %reason, "retry wait cancelled");
                    return Err(ResilienceError::Cancelled(reason));
                }
            }
        }
    }
}

/// Tower-native retry layer.
pub struct RetryLayer<E> {
    config: RetryConfig,
    jitter: Jitter,
    should_retry: RetryPredicate<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E: 'static> RetryLayer<E> {
    /// Errors if the config does not validate.
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            jitter: Jitter::None,
            should_retry: Arc::new(retry_any::<E>),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<S, E> Layer<S> for RetryLayer<E>
where
    S: Call<Error = E>,
{
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner: Arc::new(inner),
            config: self.config,
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}
