//! Cancellation tokens and per-slot request supersession.
//!
//! A [`CancellationToken`] is a cheap, clonable flag that in-flight work polls
//! (or awaits) to learn it has become obsolete. A [`RequestCanceller`] owns one
//! logical slot: issuing a new token cancels whichever token was live before,
//! so at most one fetch cycle per slot can ever commit its result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token for cooperative cancellation of async operations.
///
/// This token can be cloned and shared across tasks. When `cancel()` is called
/// on any clone, all clones will observe the cancellation.
///
/// # Example
///
/// ```
/// use donorlink_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation, and every task
    /// parked in [`cancelled`](Self::cancelled) is woken.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    ///
    /// Intended for `tokio::select!` against a transport future so the
    /// transport call is dropped as soon as the token fires.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel() can't slip between.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::LoaderError {
    fn from(_: CancelledError) -> Self {
        crate::error::LoaderError::Cancelled
    }
}

#[derive(Debug, Default)]
struct Slot {
    live: Option<CancellationToken>,
    issued: u64,
    disposed: bool,
}

/// Issues one live cancellation token per logical slot.
///
/// Token issue, supersession and result commit all happen under the same
/// lock, so a superseded cycle can never apply its result after a newer cycle
/// has started.
#[derive(Debug, Default)]
pub struct RequestCanceller {
    slot: Mutex<Slot>,
}

impl RequestCanceller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the previously issued token (if any) and return a fresh one.
    ///
    /// Fails with [`LoaderError::Disposed`](crate::LoaderError::Disposed) once
    /// the slot has been disposed.
    pub fn new_token(&self) -> crate::Result<CancellationToken> {
        let mut slot = self.lock();
        if slot.disposed {
            return Err(crate::LoaderError::Disposed);
        }
        if let Some(previous) = slot.live.take() {
            if !previous.is_cancelled() {
                debug!(cycle = slot.issued, "Superseding in-flight request");
            }
            previous.cancel();
        }
        slot.issued += 1;
        let token = CancellationToken::new();
        slot.live = Some(token.clone());
        Ok(token)
    }

    /// Run `apply` only if `token` is still the live, uncancelled token.
    ///
    /// Returns `None` (and does not run `apply`) for superseded or cancelled
    /// tokens. The slot lock is held while `apply` runs.
    pub fn commit<R>(&self, token: &CancellationToken, apply: impl FnOnce() -> R) -> Option<R> {
        let slot = self.lock();
        let is_live = !slot.disposed
            && !token.is_cancelled()
            && slot.live.as_ref().is_some_and(|live| live.same_as(token));
        if is_live {
            Some(apply())
        } else {
            None
        }
    }

    /// Cancel the live token without disposing the slot.
    pub fn cancel_current(&self) {
        if let Some(live) = self.lock().live.take() {
            live.cancel();
        }
    }

    /// Cancel the live token and refuse to issue any more.
    pub fn dispose(&self) {
        let mut slot = self.lock();
        slot.disposed = true;
        if let Some(live) = slot.live.take() {
            live.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Number of tokens issued so far.
    pub fn issued(&self) -> u64 {
        self.lock().issued
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
