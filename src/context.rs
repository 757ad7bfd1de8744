//! Cancellation context observed by every decorator.
//!
//! A [`Context`] carries an optional monotonic deadline, a cancellation flag, and, once it
//! has ended, a terminal [`ContextError`]. The transition is one-way: after the first
//! observation of an ending, [`Context::err`] keeps returning the same value.
//!
//! Contexts form a tree. A child ends when its parent ends (and reports the parent's
//! reason), and its deadline is never later than the parent's.
//!
//! ```rust
//! use lifeline::{Context, ContextError};
//! use std::time::Duration;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let root = Context::background();
//! let request = root.with_timeout(Duration::from_millis(5));
//! assert_eq!(request.done().await, ContextError::DeadlineExceeded);
//! assert!(root.err().is_none());
//! # });
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    reason: OnceLock<ContextError>,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn err(&self) -> Option<ContextError> {
        if let Some(reason) = self.reason.get() {
            return Some(*reason);
        }
        let observed = self
            .parent
            .as_ref()
            .and_then(|parent| parent.err())
            .or_else(|| {
                self.deadline
                    .filter(|deadline| Instant::now() >= *deadline)
                    .map(|_| ContextError::DeadlineExceeded)
            })
            .or_else(|| self.token.is_cancelled().then_some(ContextError::Canceled))?;
        Some(self.settle(observed))
    }

    /// First writer wins; later endings keep the original reason.
    fn settle(&self, reason: ContextError) -> ContextError {
        let settled = *self.reason.get_or_init(|| reason);
        self.token.cancel();
        settled
    }
}

/// Cancellation context handed to every call.
///
/// Clones share the same underlying state, so cancelling any clone ends them all.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A root context with no deadline that only ends when cancelled.
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                deadline: None,
                reason: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Derive a child that ends with this context or when cancelled on its own.
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline)
    }

    /// Derive a child plus a guard that cancels it when dropped.
    pub fn with_cancel(&self) -> (Self, CancelGuard) {
        let child = self.child();
        let guard = child.drop_guard();
        (child, guard)
    }

    /// Derive a child whose deadline is `timeout` from now (or the parent's, if earlier).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now().checked_add(timeout);
        match deadline {
            Some(at) => self.with_deadline(at),
            None => self.child(),
        }
    }

    /// Derive a child that expires at `at` (or at the parent's deadline, if earlier).
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(parent) if parent < at => parent,
            _ => at,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                deadline,
                reason: OnceLock::new(),
                parent: Some(self.inner.clone()),
            }),
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.inner.settle(ContextError::Canceled);
    }

    /// Cancel this context when the returned guard is dropped.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard { ctx: Some(self.clone()) }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The terminal error once the context has ended, `None` while it is live.
    pub fn err(&self) -> Option<ContextError> {
        self.inner.err()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Wait until the context ends and return why.
    pub async fn done(&self) -> ContextError {
        if let Some(reason) = self.err() {
            return reason;
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.err().unwrap_or(ContextError::Canceled)
    }
}

/// Cancels its context on drop.
#[derive(Debug)]
pub struct CancelGuard {
    ctx: Option<Context>,
}

impl CancelGuard {
    /// Give up the guard without cancelling.
    pub fn disarm(mut self) -> Context {
        // ctx is only taken here or in drop
        self.ctx.take().unwrap_or_default()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_is_live_until_cancelled() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());

        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert_eq!(ctx.done().await, ContextError::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_one_way_and_idempotent() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        assert!(ctx.err().is_none());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        // A later cancel does not rewrite the reason.
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn done_wakes_at_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(3));
        let start = Instant::now();
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn child_reports_parent_reason() {
        let parent = Context::background();
        let child = parent.child();
        let grandchild = child.with_timeout(Duration::from_secs(60));

        parent.cancel();
        assert_eq!(grandchild.done().await, ContextError::Canceled);
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn child_never_outlives_parent_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
        assert!(child.remaining().unwrap() <= Duration::from_millis(50));

        assert_eq!(child.done().await, ContextError::DeadlineExceeded);
        assert_eq!(parent.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn with_cancel_guard_scopes_the_child() {
        let parent = Context::background();
        let (child, guard) = parent.with_cancel();
        assert!(!child.is_done());
        drop(guard);
        assert_eq!(child.done().await, ContextError::Canceled);
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn drop_guard_cancels() {
        let ctx = Context::background();
        {
            let _guard = ctx.drop_guard();
        }
        assert_eq!(ctx.err(), Some(ContextError::Canceled));

        let live = Context::background();
        let guard = live.drop_guard();
        let _ = guard.disarm();
        assert!(live.err().is_none());
    }
}
