//! Throttle decorator: a token pool refilled by a background task.
//!
//! The pool starts full. Each admitted invocation takes one token; an empty pool rejects with
//! `ResilienceError::RateLimited` without running the wrapped call. The first invocation
//! lazily spawns the refill task, which adds `refill_amount` tokens every `refill_period`,
//! capped at `max`.
//!
//! The refill task belongs to the throttle itself, not to any caller: it runs until
//! [`Throttle::shutdown`] is called or the last clone of the throttle is dropped.

use crate::context::CancelGuard;
use crate::error::{non_zero, ConfigError};
use crate::{Call, Context, ResilienceError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tower_layer::Layer;

/// Validated token pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleConfig {
    pub max: usize,
    pub refill_amount: usize,
    pub refill_period: Duration,
}

impl ThrottleConfig {
    pub fn new(
        max: usize,
        refill_amount: usize,
        refill_period: Duration,
    ) -> Result<Self, ConfigError> {
        let cfg = Self { max, refill_amount, refill_period };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.max));
        }
        if self.refill_amount == 0 {
            return Err(ConfigError::InvalidRefillAmount(self.refill_amount));
        }
        non_zero("refill_period", self.refill_period)?;
        Ok(())
    }
}

#[derive(Debug)]
struct ThrottleState {
    tokens: Mutex<usize>,
    refill_started: AtomicBool,
    config: ThrottleConfig,
}

impl ThrottleState {
    fn tokens(&self) -> MutexGuard<'_, usize> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token; false when the pool is empty.
    fn try_take(&self) -> bool {
        let mut tokens = self.tokens();
        if *tokens == 0 {
            return false;
        }
        *tokens -= 1;
        true
    }

    fn refill(&self) -> usize {
        let mut tokens = self.tokens();
        *tokens = tokens.saturating_add(self.config.refill_amount).min(self.config.max);
        *tokens
    }
}

/// Rate-limits invocations of the wrapped call.
///
/// Clones share the same pool and refill task.
#[derive(Debug)]
pub struct Throttle<C> {
    inner: Arc<C>,
    state: Arc<ThrottleState>,
    lifetime: Context,
    _guard: Arc<CancelGuard>,
}

impl<C> Clone for Throttle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
            lifetime: self.lifetime.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<C: Call> Throttle<C> {
    /// Errors if `max`, `refill_amount`, or `refill_period` is zero.
    pub fn new(
        inner: C,
        max: usize,
        refill_amount: usize,
        refill_period: Duration,
    ) -> Result<Self, ConfigError> {
        Self::with_config(inner, ThrottleConfig { max, refill_amount, refill_period })
    }

    /// Errors if the config does not validate.
    pub fn with_config(inner: C, config: ThrottleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(inner, config))
    }

    fn build(inner: C, config: ThrottleConfig) -> Self {
        let lifetime = Context::background();
        Self {
            inner: Arc::new(inner),
            state: Arc::new(ThrottleState {
                tokens: Mutex::new(config.max),
                refill_started: AtomicBool::new(false),
                config,
            }),
            _guard: Arc::new(lifetime.drop_guard()),
            lifetime,
        }
    }

    /// Tokens currently in the pool.
    pub fn available(&self) -> usize {
        *self.state.tokens()
    }

    pub fn config(&self) -> ThrottleConfig {
        self.state.config
    }

    /// Stop the refill task. Remaining tokens can still be spent.
    pub fn shutdown(&self) {
        self.lifetime.cancel();
    }

    fn ensure_refill(&self) {
        if self
            .state
            .refill_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let state = self.state.clone();
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            let period = state.config.refill_period;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(?period, amount = state.config.refill_amount, "throttle refill started");
            loop {
                tokio::select! {
                    _ = lifetime.done() => break,
                    _ = ticker.tick() => {
                        let tokens = state.refill();
                        tracing::trace!(tokens, "throttle refilled");
                    }
                }
            }
            tracing::debug!("throttle refill stopped");
        });
    }
}

#[async_trait]
impl<C: Call> Call for Throttle<C> {
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        self.ensure_refill();
        if let Some(reason) = ctx.err() {
            return Err(ResilienceError::Cancelled(reason));
        }
        if !self.state.try_take() {
            tracing::debug!(max = self.state.config.max, "throttle rejected call");
            return Err(ResilienceError::RateLimited { max: self.state.config.max });
        }
        self.inner.call(ctx).await
    }
}

/// Tower-native throttle layer. Every layered call gets its own pool.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleLayer {
    config: ThrottleConfig,
}

impl ThrottleLayer {
    /// Errors if the config does not validate.
    pub fn new(config: ThrottleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl<S: Call> Layer<S> for ThrottleLayer {
    type Service = Throttle<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Throttle::build(inner, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_fn;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>) -> impl Call<Response = &'static str, Error = ()> {
        call_fn(move |_ctx: Context| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError<()>>("ok")
            }
        })
    }

    #[test]
    fn rejects_zero_values() {
        assert_eq!(
            ThrottleConfig::new(0, 1, Duration::from_secs(1)),
            Err(ConfigError::InvalidMaxTokens(0))
        );
        assert_eq!(
            ThrottleConfig::new(1, 0, Duration::from_secs(1)),
            Err(ConfigError::InvalidRefillAmount(0))
        );
        assert!(matches!(
            ThrottleConfig::new(1, 1, Duration::ZERO),
            Err(ConfigError::ZeroDuration { name: "refill_period", .. })
        ));
    }

    #[test]
    fn hand_built_config_is_validated() {
        let invalid = ThrottleConfig { max: 1, refill_amount: 1, refill_period: Duration::ZERO };
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            Throttle::with_config(counting(counter), invalid),
            Err(ConfigError::ZeroDuration { name: "refill_period", .. })
        ));
        assert!(matches!(
            ThrottleLayer::new(invalid),
            Err(ConfigError::ZeroDuration { name: "refill_period", .. })
        ));
        assert!(matches!(
            ThrottleLayer::new(ThrottleConfig { max: 0, ..invalid }),
            Err(ConfigError::InvalidMaxTokens(0))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_beyond_pool_is_rate_limited() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttled = Throttle::new(counting(counter.clone()), 3, 1, Duration::from_secs(1))
            .expect("valid throttle");

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(throttled.call(Context::background()).await);
        }

        assert!(outcomes[..3].iter().all(|r| r.is_ok()));
        assert!(outcomes[3..].iter().all(|r| matches!(r, Err(e) if e.is_rate_limited())));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "rejected calls never reach upstream");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_adds_tokens_up_to_max() {
        let throttled = Throttle::new(
            counting(Arc::new(AtomicUsize::new(0))),
            3,
            1,
            Duration::from_secs(1),
        )
        .expect("valid throttle");

        for _ in 0..3 {
            throttled.call(Context::background()).await.unwrap();
        }
        assert_eq!(throttled.available(), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(throttled.available(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(throttled.available(), 3, "refill is capped at max");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_context_does_not_consume() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttled = Throttle::new(counting(counter.clone()), 2, 1, Duration::from_secs(1))
            .expect("valid throttle");
        let ctx = Context::background();
        ctx.cancel();

        let err = throttled.call(ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(throttled.available(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_outlives_first_callers_context() {
        let throttled = Throttle::new(
            counting(Arc::new(AtomicUsize::new(0))),
            1,
            1,
            Duration::from_secs(1),
        )
        .expect("valid throttle");

        let first = Context::background();
        throttled.call(first.clone()).await.unwrap();
        first.cancel();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(throttled.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_task_stops_when_throttle_is_dropped() {
        let throttled = Throttle::new(
            counting(Arc::new(AtomicUsize::new(0))),
            1,
            1,
            Duration::from_secs(1),
        )
        .expect("valid throttle");
        throttled.call(Context::background()).await.unwrap();
        let state = Arc::downgrade(&throttled.state);

        drop(throttled);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(state.upgrade().is_none(), "refill task should have released the pool");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_refill() {
        let throttled = Throttle::new(
            counting(Arc::new(AtomicUsize::new(0))),
            1,
            1,
            Duration::from_secs(1),
        )
        .expect("valid throttle");
        throttled.call(Context::background()).await.unwrap();
        throttled.shutdown();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(throttled.available(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_overdraw() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttled = Throttle::new(counting(counter.clone()), 10, 1, Duration::from_secs(3600))
            .expect("valid throttle");

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let throttled = throttled.clone();
                tokio::spawn(async move { throttled.call(Context::background()).await })
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        let admitted = results.iter().filter(|r| r.as_ref().expect("join").is_ok()).count();
        assert_eq!(admitted, 10);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(throttled.available(), 0);
    }
}
