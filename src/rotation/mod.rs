//! In-process certificate rotation.
//!
//! [`Manager`] owns the active [`Bundle`], refreshes it from an [`Issuer`] on
//! a background loop, and hands the current leaf to the TLS layer on every
//! handshake.
//!
//! # Architecture
//!
//! ```text
//! Manager::run ── Issuer::issue ──▶ Bundle ──▶ ArcSwapOption (atomic store)
//!      │                                              │
//!      ├─ on_rotate(BundleInfo)   (detached task)     ├─▶ Manager::current()
//!      └─ on_error(Arc<Error>)    (detached task)     └─▶ CertResolver (per handshake)
//! ```
//!
//! Renewal happens at two thirds of the leaf lifetime, floored at
//! `min_refresh` and jittered by up to a tenth. Failures back off by a fixed
//! `error_backoff` and retry forever; the last good bundle keeps serving.

pub mod bundle;
pub mod hooks;
pub mod schedule;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustls::sign::CertifiedKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use bundle::{Bundle, BundleInfo};
pub use hooks::{ErrorHook, HookContext, RotateHook, error_hook, rotate_hook};

use crate::config::RotationConfig;
use crate::{Error, Result};

/// Default floor between two refreshes.
pub const DEFAULT_MIN_REFRESH: Duration = Duration::from_secs(30);
/// Default wait after a failed issuance.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(15);
/// Default time budget for a single hook invocation.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Issuer contract
// ─────────────────────────────────────────────────────────────────────────────

/// Produces a freshly issued [`Bundle`].
///
/// Implementations must derive `not_after` from the issued certificate and
/// must not cache, retry or schedule; the [`Manager`] owns all of that.
/// Cancellation is by dropping the returned future.
#[async_trait]
pub trait Issuer: Send + Sync {
    /// Issue a new bundle.
    async fn issue(&self) -> Result<Bundle>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Clock used for scheduling; injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Manager tuning and hooks.
///
/// Zero durations fall back to the `DEFAULT_*` constants.
#[derive(Clone, Default)]
pub struct Options {
    /// Floor for the wait between successful refreshes.
    pub min_refresh: Duration,
    /// Fixed wait after a failed issuance.
    pub error_backoff: Duration,
    /// Time budget per hook invocation.
    pub hook_timeout: Duration,
    /// Called after each successful rotation.
    pub on_rotate: Option<RotateHook>,
    /// Called after each failed issuance.
    pub on_error: Option<ErrorHook>,
    /// Clock override.
    pub now: Option<Clock>,
}

impl Options {
    /// Options seeded from the `rotation` config section.
    #[must_use]
    pub fn from_config(config: &RotationConfig) -> Self {
        Self {
            min_refresh: config.min_refresh,
            error_backoff: config.error_backoff,
            hook_timeout: config.hook_timeout,
            ..Self::default()
        }
    }

    /// Set the rotate hook.
    #[must_use]
    pub fn with_on_rotate(mut self, hook: RotateHook) -> Self {
        self.on_rotate = Some(hook);
        self
    }

    /// Set the error hook.
    #[must_use]
    pub fn with_on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Override the clock.
    #[must_use]
    pub fn with_clock(mut self, now: Clock) -> Self {
        self.now = Some(now);
        self
    }

    fn normalized(mut self) -> Self {
        if self.min_refresh.is_zero() {
            self.min_refresh = DEFAULT_MIN_REFRESH;
        }
        if self.error_backoff.is_zero() {
            self.error_backoff = DEFAULT_ERROR_BACKOFF;
        }
        if self.hook_timeout.is_zero() {
            self.hook_timeout = DEFAULT_HOOK_TIMEOUT;
        }
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("min_refresh", &self.min_refresh)
            .field("error_backoff", &self.error_backoff)
            .field("hook_timeout", &self.hook_timeout)
            .field("on_rotate", &self.on_rotate.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("custom_clock", &self.now.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Rotates certificates in-process and swaps them atomically.
///
/// Share it as `Arc<Manager>`: one task drives [`Manager::run`], any number
/// of handshakes read through [`Manager::current`] and the certificate
/// accessors.
pub struct Manager {
    issuer: Arc<dyn Issuer>,
    current: ArcSwapOption<Bundle>,
    next_refresh: Mutex<Option<DateTime<Utc>>>,
    opts: Options,
}

impl Manager {
    /// Manager with default options.
    pub fn new(issuer: Arc<dyn Issuer>) -> Self {
        Self::with_options(issuer, Options::default())
    }

    /// Manager with explicit options.
    pub fn with_options(issuer: Arc<dyn Issuer>, opts: Options) -> Self {
        Self {
            issuer,
            current: ArcSwapOption::empty(),
            next_refresh: Mutex::new(None),
            opts: opts.normalized(),
        }
    }

    /// Effective options after defaults were applied.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// The active bundle, or [`Error::NotReady`] before the first issuance.
    ///
    /// Lock-free; never waits on the refresh loop.
    pub fn current(&self) -> Result<Arc<Bundle>> {
        self.current.load_full().ok_or(Error::NotReady)
    }

    /// Scheduled renewal time computed after the last successful refresh.
    #[must_use]
    pub fn next_refresh(&self) -> Option<DateTime<Utc>> {
        *self.next_refresh.lock()
    }

    /// Leaf to present when acting as a TLS server.
    pub fn server_certificate(&self) -> Result<Arc<CertifiedKey>> {
        self.current().map(|b| b.certified_key())
    }

    /// Leaf to present when acting as a TLS client.
    pub fn client_certificate(&self) -> Result<Arc<CertifiedKey>> {
        self.current().map(|b| b.certified_key())
    }

    /// Issue and store one bundle synchronously. Does not schedule anything.
    pub async fn start(&self) -> Result<()> {
        self.refresh().await.map(|_| ())
    }

    /// Refresh until `cancel` fires.
    ///
    /// Issuance failures are reported through the error hook and retried
    /// after `error_backoff`; they never end the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.current().is_err() {
            match self.refresh_or_cancel(&cancel).await {
                None => return,
                Some(Err(e)) => self.on_error(e),
                Some(Ok(_)) => {}
            }
        }

        loop {
            let Some(outcome) = self.refresh_or_cancel(&cancel).await else {
                return;
            };

            let wait = match outcome {
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.opts.error_backoff.as_millis(),
                        "Certificate refresh failed"
                    );
                    self.on_error(e);
                    self.opts.error_backoff
                }
                Ok((bundle, next)) => {
                    self.on_rotate(&bundle);
                    let wait = schedule::refresh_wait(next, self.now(), self.opts.min_refresh);
                    info!(
                        not_after = %bundle.not_after(),
                        next_refresh = %next,
                        wait_secs = wait.as_secs(),
                        "Certificate rotated"
                    );
                    wait
                }
            };

            if !sleep_or_cancel(&cancel, wait).await {
                return;
            }
        }
    }

    async fn refresh_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Option<Result<(Arc<Bundle>, DateTime<Utc>)>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Rotation loop cancelled during issuance");
                None
            }
            outcome = self.refresh() => Some(outcome),
        }
    }

    /// Issue, store, and compute the next renewal time.
    async fn refresh(&self) -> Result<(Arc<Bundle>, DateTime<Utc>)> {
        let bundle = Arc::new(self.issuer.issue().await?);
        self.current.store(Some(Arc::clone(&bundle)));

        let now = self.now();
        let next = schedule::next_refresh(now, bundle.not_after());
        *self.next_refresh.lock() = Some(next);
        debug!(not_after = %bundle.not_after(), next_refresh = %next, "Bundle stored");
        Ok((bundle, next))
    }

    fn on_rotate(&self, bundle: &Bundle) {
        let Some(hook) = self.opts.on_rotate.clone() else {
            return;
        };
        let info = bundle.info();
        hooks::dispatch("on_rotate", self.opts.hook_timeout, move |ctx| hook(ctx, info));
    }

    fn on_error(&self, err: Error) {
        let Some(hook) = self.opts.on_error.clone() else {
            return;
        };
        let err = Arc::new(err);
        hooks::dispatch("on_error", self.opts.hook_timeout, move |ctx| hook(ctx, err));
    }

    fn now(&self) -> DateTime<Utc> {
        self.opts.now.as_ref().map_or_else(Utc::now, |now| now())
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("ready", &self.current.load().is_some())
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

/// Sleep for `wait`; `false` when cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, wait: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => {
            debug!("Rotation loop cancelled");
            false
        }
        () = tokio::time::sleep(wait) => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
