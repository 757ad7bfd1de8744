//! Debounce decorators: collapse a burst of invocations into one underlying call.
//!
//! - [`Debounce`] runs the call on the leading edge and answers from a cache until the
//!   cooldown (measured from completion) has passed.
//! - [`DeferredDebounce`] runs the call on the trailing edge, once the burst has been quiet
//!   for a full cooldown. Callers always receive the last settled outcome, never the one
//!   being computed, or `ResilienceError::Pending` before anything has settled.

use crate::context::CancelGuard;
use crate::error::{non_zero, ConfigError};
use crate::timeout::MAX_TIMEOUT;
use crate::{Call, Context, ResilienceError};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tower_layer::Layer;

/// Wake-up interval of the deferred poller unless overridden.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Outcome<C> = Result<<C as Call>::Response, ResilienceError<<C as Call>::Error>>;

fn validate_cooldown(cooldown: Duration) -> Result<Duration, ConfigError> {
    let cooldown = non_zero("cooldown", cooldown)?;
    if cooldown >= MAX_TIMEOUT {
        return Err(ConfigError::DurationTooLarge { name: "cooldown", value: cooldown, max: MAX_TIMEOUT });
    }
    Ok(cooldown)
}

/// Validated debounce settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebounceConfig {
    pub cooldown: Duration,
}

impl DebounceConfig {
    pub fn new(cooldown: Duration) -> Result<Self, ConfigError> {
        let cfg = Self { cooldown };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cooldown(self.cooldown).map(|_| ())
    }
}

struct CacheState<T, E> {
    next_allowed: Option<Instant>,
    cached: Option<Result<T, ResilienceError<E>>>,
}

/// Leading-edge debounce with a result cache.
///
/// The state lock is held while the wrapped call runs, so concurrent callers queue behind
/// the execution and then read its cached outcome.
///
/// The wrapped call runs under the executing caller's context, and whatever it returns is
/// cached. If that context ends mid-call and the wrapped call reports
/// `ResilienceError::Cancelled`, every caller in the window receives that cancellation,
/// including callers whose own context is still live.
pub struct Debounce<C: Call> {
    inner: Arc<C>,
    state: Arc<tokio::sync::Mutex<CacheState<C::Response, C::Error>>>,
    config: DebounceConfig,
    sliding: bool,
}

impl<C: Call> Clone for Debounce<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
            config: self.config,
            sliding: self.sliding,
        }
    }
}

impl<C: Call> fmt::Debug for Debounce<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debounce")
            .field("cooldown", &self.config.cooldown)
            .field("sliding", &self.sliding)
            .finish()
    }
}

impl<C> Debounce<C>
where
    C: Call,
    C::Response: Clone + Sync,
    C::Error: Clone + Sync,
{
    /// Errors if `cooldown` is zero or at least [`MAX_TIMEOUT`].
    pub fn new(inner: C, cooldown: Duration) -> Result<Self, ConfigError> {
        Self::with_config(inner, DebounceConfig { cooldown })
    }

    /// Errors if the config does not validate.
    pub fn with_config(inner: C, config: DebounceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(inner, config))
    }

    fn build(inner: C, config: DebounceConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            state: Arc::new(tokio::sync::Mutex::new(CacheState { next_allowed: None, cached: None })),
            config,
            sliding: false,
        }
    }

    /// Push the window out on every invocation, cache hits included, so a steady stream of
    /// calls spaced closer than the cooldown never reaches upstream again.
    pub fn sliding(mut self) -> Self {
        self.sliding = true;
        self
    }

    pub fn config(&self) -> DebounceConfig {
        self.config
    }
}

#[async_trait]
impl<C> Call for Debounce<C>
where
    C: Call,
    C::Response: Clone + Sync,
    C::Error: Clone + Sync,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        let mut state = tokio::select! {
            biased;
            reason = ctx.done() => return Err(ResilienceError::Cancelled(reason)),
            state = self.state.lock() => state,
        };

        let now = Instant::now();
        if state.next_allowed.is_some_and(|next| now < next) {
            if let Some(cached) = state.cached.clone() {
                if self.sliding {
                    state.next_allowed = Some(now + self.config.cooldown);
                }
                tracing::trace!("debounce: serving cached outcome");
                return cached;
            }
        }

        let outcome = self.inner.call(ctx).await;
        state.cached = Some(outcome.clone());
        state.next_allowed = Some(Instant::now() + self.config.cooldown);
        tracing::debug!(cooldown = ?self.config.cooldown, ok = outcome.is_ok(), "debounce: executed");
        outcome
    }
}

struct DeferredState<T, E> {
    deadline: Instant,
    cached: Option<Result<T, ResilienceError<E>>>,
    polling: bool,
}

type SharedDeferred<C> = Arc<Mutex<DeferredState<<C as Call>::Response, <C as Call>::Error>>>;

fn lock<T, E>(state: &Mutex<DeferredState<T, E>>) -> MutexGuard<'_, DeferredState<T, E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Trailing-edge debounce.
///
/// Each invocation pushes the deadline to `now + cooldown` and returns the previous
/// outcome. The first invocation after idle starts a poller that runs the call once the
/// deadline has passed, using that invocation's context. If the context ends first the
/// poller records `ResilienceError::Cancelled` instead. The poller also stops when the last
/// clone of the decorator is dropped.
pub struct DeferredDebounce<C: Call> {
    inner: Arc<C>,
    state: SharedDeferred<C>,
    config: DebounceConfig,
    poll_interval: Duration,
    lifetime: Context,
    _guard: Arc<CancelGuard>,
}

impl<C: Call> Clone for DeferredDebounce<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
            config: self.config,
            poll_interval: self.poll_interval,
            lifetime: self.lifetime.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<C: Call> fmt::Debug for DeferredDebounce<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDebounce")
            .field("cooldown", &self.config.cooldown)
            .field("poll_interval", &self.poll_interval)
            .field("polling", &lock(&self.state).polling)
            .finish()
    }
}

impl<C> DeferredDebounce<C>
where
    C: Call,
    C::Response: Clone + Sync,
    C::Error: Clone + Sync,
{
    /// Errors if `cooldown` is zero or at least [`MAX_TIMEOUT`].
    pub fn new(inner: C, cooldown: Duration) -> Result<Self, ConfigError> {
        Self::with_config(inner, DebounceConfig { cooldown })
    }

    /// Errors if the config does not validate.
    pub fn with_config(inner: C, config: DebounceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(inner, config))
    }

    fn build(inner: C, config: DebounceConfig) -> Self {
        let lifetime = Context::background();
        Self {
            inner: Arc::new(inner),
            state: Arc::new(Mutex::new(DeferredState {
                deadline: Instant::now(),
                cached: None,
                polling: false,
            })),
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
            _guard: Arc::new(lifetime.drop_guard()),
            lifetime,
        }
    }

    /// How often the poller checks the deadline. Errors if zero.
    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        self.poll_interval = non_zero("poll_interval", interval)?;
        Ok(self)
    }

    pub fn config(&self) -> DebounceConfig {
        self.config
    }

    /// Whether a poller is waiting for the current burst to settle.
    pub fn is_polling(&self) -> bool {
        lock(&self.state).polling
    }

    fn spawn_poller(&self, ctx: Context) {
        let inner = self.inner.clone();
        let state = self.state.clone();
        let lifetime = self.lifetime.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = lifetime.done() => {
                        lock(&state).polling = false;
                        tracing::trace!("deferred debounce: poller released");
                        return;
                    }
                    reason = ctx.done() => {
                        let mut st = lock(&state);
                        st.cached = Some(Err(ResilienceError::Cancelled(reason)));
                        st.polling = false;
                        tracing::debug!(%reason, "deferred debounce: burst abandoned");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let started = Instant::now();
                if started <= lock(&state).deadline {
                    continue;
                }

                let outcome = inner.call(ctx.clone()).await;
                tracing::debug!(ok = outcome.is_ok(), "deferred debounce: executed");
                let mut st = lock(&state);
                st.cached = Some(outcome);
                // Invocations that arrived while the call ran form a new burst.
                if st.deadline < started {
                    st.polling = false;
                    return;
                }
            }
        });
    }
}

#[async_trait]
impl<C> Call for DeferredDebounce<C>
where
    C: Call,
    C::Response: Clone + Sync,
    C::Error: Clone + Sync,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        let (previous, start): (Option<Outcome<C>>, bool) = {
            let mut state = lock(&self.state);
            state.deadline = Instant::now() + self.config.cooldown;
            let start = !state.polling;
            state.polling = true;
            (state.cached.clone(), start)
        };
        if start {
            self.spawn_poller(ctx);
        }
        previous.unwrap_or(Err(ResilienceError::Pending))
    }
}

/// Tower-native layer for [`Debounce`].
#[derive(Debug, Clone, Copy)]
pub struct DebounceLayer {
    config: DebounceConfig,
    sliding: bool,
}

impl DebounceLayer {
    /// Errors if the config does not validate.
    pub fn new(config: DebounceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, sliding: false })
    }

    pub fn sliding(mut self) -> Self {
        self.sliding = true;
        self
    }
}

impl<S> Layer<S> for DebounceLayer
where
    S: Call,
    S::Response: Clone + Sync,
    S::Error: Clone + Sync,
{
    type Service = Debounce<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let debounce = Debounce::build(inner, self.config);
        if self.sliding {
            debounce.sliding()
        } else {
            debounce
        }
    }
}

/// Tower-native layer for [`DeferredDebounce`].
#[derive(Debug, Clone, Copy)]
pub struct DeferredDebounceLayer {
    config: DebounceConfig,
    poll_interval: Duration,
}

impl DeferredDebounceLayer {
    /// Errors if the config does not validate.
    pub fn new(config: DebounceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, poll_interval: DEFAULT_POLL_INTERVAL })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        self.poll_interval = non_zero("poll_interval", interval)?;
        Ok(self)
    }
}

impl<S> Layer<S> for DeferredDebounceLayer
where
    S: Call,
    S::Response: Clone + Sync,
    S::Error: Clone + Sync,
{
    type Service = DeferredDebounce<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let mut debounce = DeferredDebounce::build(inner, self.config);
        debounce.poll_interval = self.poll_interval;
        debounce
    }
}
