//! Timeout decorator: best-effort cancellation over calls that may ignore their context.
//!
//! The wrapped call runs on its own tokio task and reports into a single-slot
//! `oneshot` channel. The caller waits for whichever comes first: the report or the end of
//! the context. When the context wins the task is abandoned, not aborted; it may keep running
//! and its late report is dropped because sending on a oneshot never blocks.

use crate::error::{non_zero, ConfigError};
use crate::{Call, Context, ResilienceError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_layer::Layer;

/// Largest limit accepted by [`Timeout::with_limit`] (1 day).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn validate_limit(limit: Duration) -> Result<Duration, ConfigError> {
    let limit = non_zero("timeout", limit)?;
    if limit >= MAX_TIMEOUT {
        return Err(ConfigError::DurationTooLarge { name: "timeout", value: limit, max: MAX_TIMEOUT });
    }
    Ok(limit)
}

/// Races the wrapped call against the context.
#[derive(Debug)]
pub struct Timeout<C> {
    inner: Arc<C>,
    limit: Option<Duration>,
}

impl<C> Clone for Timeout<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limit: self.limit }
    }
}

impl<C: Call> Timeout<C> {
    /// Bounded only by the caller's context.
    pub fn new(inner: C) -> Self {
        Self { inner: Arc::new(inner), limit: None }
    }

    /// Also enforce a bound of our own by deriving a child context per call.
    /// Errors if `limit` is zero or at least [`MAX_TIMEOUT`].
    pub fn with_limit(mut self, limit: Duration) -> Result<Self, ConfigError> {
        self.limit = Some(validate_limit(limit)?);
        Ok(self)
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }
}

#[async_trait]
impl<C: Call> Call for Timeout<C> {
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        let ctx = match self.limit {
            Some(limit) => ctx.with_timeout(limit),
            None => ctx,
        };
        if let Some(reason) = ctx.err() {
            return Err(ResilienceError::Cancelled(reason));
        }

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            let outcome = inner.call(task_ctx).await;
            if tx.send(outcome).is_err() {
                tracing::trace!("abandoned call finished after its caller left");
            }
        });

        tokio::select! {
            biased;
            reason = ctx.done() => {
                tracing::debug!(%reason, "call abandoned");
                Err(ResilienceError::Cancelled(reason))
            }
            outcome = rx => outcome.unwrap_or(Err(ResilienceError::Aborted)),
        }
    }
}

/// Tower-native timeout layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutLayer {
    limit: Option<Duration>,
}

impl TimeoutLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Duration) -> Result<Self, ConfigError> {
        Ok(Self { limit: Some(validate_limit(limit)?) })
    }
}

impl<S: Call> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout { inner: Arc::new(inner), limit: self.limit }
    }
}

/// An async operation that takes no context. Build one with [`slow_fn`].
#[derive(Debug, Clone, Copy)]
pub struct SlowFn<F> {
    f: F,
}

/// Adapt `Fn() -> impl Future<Output = Result<T, E>>` into a [`Call`] that ignores its context.
pub fn slow_fn<F>(f: F) -> SlowFn<F> {
    SlowFn { f }
}

#[async_trait]
impl<F, Fut, T, E> Call for SlowFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Response = T;
    type Error = E;

    async fn call(&self, _ctx: Context) -> Result<T, ResilienceError<E>> {
        (self.f)().await.map_err(ResilienceError::Inner)
    }
}

/// A synchronous, blocking operation. Build one with [`blocking_fn`].
#[derive(Debug)]
pub struct BlockingFn<F> {
    f: Arc<F>,
}

/// Adapt a blocking `Fn() -> Result<T, E>` into a [`Call`] run on tokio's blocking pool.
pub fn blocking_fn<F>(f: F) -> BlockingFn<F> {
    BlockingFn { f: Arc::new(f) }
}

#[async_trait]
impl<F, T, E> Call for BlockingFn<F>
where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Response = T;
    type Error = E;

    async fn call(&self, _ctx: Context) -> Result<T, ResilienceError<E>> {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(outcome) => outcome.map_err(ResilienceError::Inner),
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(_) => Err(ResilienceError::Aborted),
        }
    }
}
