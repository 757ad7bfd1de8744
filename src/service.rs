//! Bridges between [`Call`] and `tower_service::Service<Context>`.
//!
//! [`CallService`] lets a decorated call sit inside a tower stack; [`ServiceCall`] lets an
//! existing tower service be decorated.

use crate::{Call, Context, ResilienceError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tower_service::Service;

/// Tower service driving a [`Call`]. Always ready; backpressure lives in the decorators.
#[derive(Debug)]
pub struct CallService<C: ?Sized> {
    call: Arc<C>,
}

impl<C> CallService<C> {
    pub fn new(call: C) -> Self {
        Self { call: Arc::new(call) }
    }
}

impl<C: ?Sized> Clone for CallService<C> {
    fn clone(&self) -> Self {
        Self { call: self.call.clone() }
    }
}

impl<C> Service<Context> for CallService<C>
where
    C: Call + ?Sized,
{
    type Response = C::Response;
    type Error = ResilienceError<C::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Context) -> Self::Future {
        let call = self.call.clone();
        Box::pin(async move { call.call(ctx).await })
    }
}

/// A [`Call`] that drives a cloned tower service per invocation.
///
/// Errors from `poll_ready` and `call` are both reported as `ResilienceError::Inner`.
#[derive(Debug, Clone)]
pub struct ServiceCall<S> {
    service: S,
}

impl<S> ServiceCall<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> Call for ServiceCall<S>
where
    S: Service<Context> + Clone + Send + Sync + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;

    async fn call(&self, ctx: Context) -> Result<Self::Response, ResilienceError<Self::Error>> {
        let mut service = self.service.clone();
        futures::future::poll_fn(|cx| service.poll_ready(cx))
            .await
            .map_err(ResilienceError::Inner)?;
        service.call(ctx).await.map_err(ResilienceError::Inner)
    }
}
