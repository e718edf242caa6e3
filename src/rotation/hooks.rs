//! Best-effort, time-bounded notification hooks.
//!
//! Every invocation runs on its own task with its own [`HookContext`]. The
//! context is cancelled once the hook returns or its timeout elapses,
//! whichever comes first. Panics and overruns are logged at the dispatch
//! boundary and never reach the refresh loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::bundle::BundleInfo;
use crate::Error;

/// Hook invoked after each successful rotation.
pub type RotateHook = Arc<dyn Fn(HookContext, BundleInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// Hook invoked after each failed issuance.
pub type ErrorHook = Arc<dyn Fn(HookContext, Arc<Error>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancellation scope handed to a hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    token: CancellationToken,
    deadline: Instant,
}

impl HookContext {
    fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Instant after which the context is cancelled.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolves once the hook's time budget is spent.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Whether the time budget is already spent.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Wrap an async closure as a [`RotateHook`].
pub fn rotate_hook<F, Fut>(f: F) -> RotateHook
where
    F: Fn(HookContext, BundleInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx, info| Box::pin(f(ctx, info)))
}

/// Wrap an async closure as an [`ErrorHook`].
pub fn error_hook<F, Fut>(f: F) -> ErrorHook
where
    F: Fn(HookContext, Arc<Error>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx, err| Box::pin(f(ctx, err)))
}

/// Spawn `make(ctx)` detached, bounded by `timeout`.
///
/// Returns immediately; the caller never waits on the hook. `make` itself
/// runs on the blocking pool, so a closure body that blocks or panics before
/// returning its future is isolated like the future is.
pub(crate) fn dispatch<F>(name: &'static str, timeout: Duration, make: F)
where
    F: FnOnce(HookContext) -> BoxFuture<'static, ()> + Send + 'static,
{
    let ctx = HookContext::new(timeout);
    let token = ctx.token.clone();
    let deadline = ctx.deadline;
    let hook = tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || make(ctx)).await {
            Ok(fut) => fut.await,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!(hook = name, error = %e, "Hook setup cancelled"),
        }
    });

    tokio::spawn(async move {
        let _cancel_on_exit = token.clone().drop_guard();
        tokio::select! {
            joined = hook => match joined {
                Ok(()) => debug!(hook = name, "Hook completed"),
                Err(e) if e.is_panic() => warn!(hook = name, "Hook panicked"),
                Err(e) => warn!(hook = name, error = %e, "Hook task failed"),
            },
            () = tokio::time::sleep_until(deadline) => {
                warn!(hook = name, timeout_ms = timeout.as_millis(), "Hook exceeded timeout");
            }
        }
    });
}
