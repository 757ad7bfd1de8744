//! The unit of wrapped work.
//!
//! A [`Call`] accepts a [`Context`] and produces either a response or a
//! [`ResilienceError`]. Decorators take a `Call` and are themselves a `Call` with the same
//! `Response` and `Error`, so they nest freely:
//!
//! ```rust
//! use lifeline::{call_fn, Call, CallExt, Context, ResilienceError};
//! use std::time::Duration;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let fetch = call_fn(|_ctx: Context| async {
//!     Ok::<_, ResilienceError<std::io::Error>>("pong")
//! });
//! let guarded = fetch.timeout().breaker(3)?.retry(2, Duration::from_millis(10));
//! assert_eq!(guarded.call(Context::background()).await.unwrap(), "pong");
//! # Ok::<(), lifeline::ConfigError>(())
//! # }).unwrap();
//! ```

use crate::{Context, ResilienceError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// An operation that observes a cancellation context and returns a value or a failure.
#[async_trait]
pub trait Call: Send + Sync + 'static {
    type Response: Send + 'static;
    type Error: Send + 'static;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>>;
}

/// Type-erased call, cheap to clone.
pub type BoxCall<T, E> = Arc<dyn Call<Response = T, Error = E>>;

#[async_trait]
impl<C> Call for Arc<C>
where
    C: Call + ?Sized,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        (**self).call(ctx).await
    }
}

/// A [`Call`] backed by a closure. Build one with [`call_fn`].
#[derive(Clone, Copy)]
pub struct CallFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for CallFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFn").field("f", &format_args!("{}", std::any::type_name::<F>())).finish()
    }
}

/// Turn `Fn(Context) -> impl Future<Output = Result<T, ResilienceError<E>>>` into a [`Call`].
pub fn call_fn<F>(f: F) -> CallFn<F> {
    CallFn { f }
}

#[async_trait]
impl<F, Fut, T, E> Call for CallFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Response = T;
    type Error = E;

    async fn call(&self, ctx: Context) -> Result<T, ResilienceError<E>> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn call_fn_passes_context_through() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let probe = call_fn(move |ctx: Context| {
            let seen = seen_clone.clone();
            async move {
                if ctx.is_done() {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, ResilienceError<()>>(ctx.is_done())
            }
        });

        let ctx = Context::background();
        assert!(!probe.call(ctx.clone()).await.unwrap());
        ctx.cancel();
        assert!(probe.call(ctx).await.unwrap());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn boxed_call_is_shared() {
        let erased: BoxCall<u32, ()> =
            Arc::new(call_fn(|_ctx: Context| async { Ok::<_, ResilienceError<()>>(7) }));
        let copy = erased.clone();
        assert_eq!(copy.call(Context::background()).await, Ok(7));
        assert_eq!(erased.call(Context::background()).await, Ok(7));
    }
}
