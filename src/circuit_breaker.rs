//! Circuit breaker with exponential backoff before each trial call.
//!
//! The breaker counts consecutive failures. Once the count reaches `failure_threshold` it
//! rejects calls until `last_attempt + 2s << (failures - threshold)` has passed, so the wait
//! doubles for every failed trial: 2s, 4s, 8s, ... The first call after the window is let
//! through as a trial; a success resets the count and closes the circuit.
//!
//! The open/closed decision is taken under a read lock and the post-call update under a
//! write lock. The wrapped call runs with no lock held, so two callers arriving just as the
//! window expires can both be admitted as trials.

use crate::error::ConfigError;
use crate::time::{Clock, MonotonicClock};
use crate::{Call, Context, ResilienceError};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tower_layer::Layer;

/// Backoff once the threshold is first reached; doubles per failure past it.
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// `BACKOFF_BASE << excess`, saturating at `Duration::MAX`.
fn backoff(excess: usize) -> Duration {
    u32::try_from(excess)
        .ok()
        .and_then(|shift| 1u32.checked_shl(shift))
        .and_then(|factor| BACKOFF_BASE.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the backoff window passes.
    Open,
    /// Window passed; the next call is let through as a trial.
    HalfOpen,
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BreakerConfig {
    pub failure_threshold: usize,
}

impl BreakerConfig {
    pub fn new(failure_threshold: usize) -> Result<Self, ConfigError> {
        let cfg = Self { failure_threshold };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(self.failure_threshold));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: usize,
    last_attempt: Duration,
}

/// Circuit breaker guarding the wrapped call.
/// Clones share the same state, so all handles observe and affect the same circuit.
#[derive(Debug)]
pub struct Breaker<C> {
    inner: Arc<C>,
    state: Arc<RwLock<BreakerState>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl<C> Clone for Breaker<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
            config: self.config,
            clock: self.clock.clone(),
        }
    }
}

impl<C: Call> Breaker<C> {
    /// Errors if `failure_threshold` is zero.
    ///
    /// # Examples
    /// ```
    /// use lifeline::{call_fn, Breaker, Context, ResilienceError};
    /// let upstream = call_fn(|_ctx: Context| async { Ok::<_, ResilienceError<()>>(()) });
    /// let breaker = Breaker::new(upstream, 5).unwrap();
    /// ```
    pub fn new(inner: C, failure_threshold: usize) -> Result<Self, ConfigError> {
        Self::with_config(inner, BreakerConfig { failure_threshold })
    }

    /// Errors if the config does not validate.
    pub fn with_config(inner: C, config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(Arc::new(inner), config, Arc::new(MonotonicClock::default())))
    }

    fn build(inner: Arc<C>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let state = BreakerState { consecutive_failures: 0, last_attempt: clock.elapsed() };
        Self { inner, state: Arc::new(RwLock::new(state)), config, clock }
    }

    /// Override the clock (useful for deterministic tests). Restarts the attempt timestamp.
    pub fn with_clock<K: Clock + 'static>(self, clock: K) -> Self {
        Self::build(self.inner, self.config, Arc::new(clock))
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn consecutive_failures(&self) -> usize {
        self.read().consecutive_failures
    }

    pub fn state(&self) -> CircuitState {
        let state = self.read();
        match self.retry_at(&state) {
            None => CircuitState::Closed,
            Some(retry_at) if self.clock.elapsed() <= retry_at => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BreakerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// When the open window ends, `None` while closed.
    fn retry_at(&self, state: &BreakerState) -> Option<Duration> {
        let excess = state.consecutive_failures.checked_sub(self.config.failure_threshold)?;
        Some(state.last_attempt.saturating_add(backoff(excess)))
    }

    fn admit(&self) -> Result<(), ResilienceError<C::Error>> {
        let state = self.read();
        let Some(retry_at) = self.retry_at(&state) else {
            return Ok(());
        };
        let now = self.clock.elapsed();
        if now <= retry_at {
            return Err(ResilienceError::CircuitOpen {
                consecutive_failures: state.consecutive_failures,
                retry_in: retry_at - now,
            });
        }
        tracing::debug!(failures = state.consecutive_failures, "Circuit breaker: trial call");
        Ok(())
    }

    fn record(&self, succeeded: bool) {
        let mut state = self.write();
        state.last_attempt = self.clock.elapsed();
        let threshold = self.config.failure_threshold;

        if succeeded {
            if state.consecutive_failures >= threshold {
                tracing::info!("Circuit breaker → closed");
            }
            state.consecutive_failures = 0;
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let failures = state.consecutive_failures;
        if failures == threshold {
            tracing::error!(failures, threshold, "Circuit breaker → open");
        } else if failures > threshold {
            let wait = backoff(failures - threshold);
            tracing::warn!(failures, backoff = ?wait, "Circuit breaker: trial failed → open");
        }
    }
}

#[async_trait]
impl<C: Call> Call for Breaker<C> {
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        self.admit()?;
        let result = self.inner.call(ctx).await;
        self.record(result.is_ok());
        result
    }
}

/// Tower-native breaker layer. Every layered call gets its own circuit.
#[derive(Debug, Clone)]
pub struct BreakerLayer {
    config: BreakerConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl BreakerLayer {
    /// Errors if the config does not validate.
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, clock: None })
    }

    pub fn with_clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }
}

impl<S: Call> Layer<S> for BreakerLayer {
    type Service = Breaker<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let clock = self.clock.clone().unwrap_or_else(|| Arc::new(MonotonicClock::default()));
        Breaker::build(Arc::new(inner), self.config, clock)
    }
}
