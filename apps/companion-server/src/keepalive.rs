//! Process keep-alive accounting.
//!
//! Every in-flight request holds the process open. When the last hold is
//! released the idle clock starts; the inactivity watchdog shuts the server
//! down once it has been idle for the configured timeout.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

struct Inner {
    holds: AtomicUsize,
    released: AtomicU64,
    idle_since: Mutex<Instant>,
    changed: Notify,
}

#[derive(Clone)]
pub(crate) struct KeepAlive {
    inner: Arc<Inner>,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAlive {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                holds: AtomicUsize::new(0),
                released: AtomicU64::new(0),
                idle_since: Mutex::new(Instant::now()),
                changed: Notify::new(),
            }),
        }
    }

    pub(crate) fn hold(&self) -> HoldGuard {
        self.inner.holds.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
        HoldGuard {
            inner: Some(self.inner.clone()),
        }
    }

    /// Requests currently holding the process open.
    pub(crate) fn active(&self) -> usize {
        self.inner.holds.load(Ordering::SeqCst)
    }

    /// Holds released since startup.
    pub(crate) fn released_total(&self) -> u64 {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Resolve once no request has been in flight for `timeout`.
    pub(crate) async fn idle_for(&self, timeout: Duration) {
        loop {
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.active() > 0 {
                changed.await;
                continue;
            }
            let deadline = *self
                .inner
                .idle_since
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                + timeout;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if self.active() == 0 {
                        info!(timeout_secs = timeout.as_secs(), "no requests in flight; idle timeout reached");
                        return;
                    }
                }
                _ = &mut changed => {}
            }
        }
    }
}

/// Releases its hold exactly once, on drop or [`HoldGuard::release`].
pub(crate) struct HoldGuard {
    inner: Option<Arc<Inner>>,
}

impl HoldGuard {
    pub(crate) fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(inner) = self.inner.take() {
            let remaining = inner.holds.fetch_sub(1, Ordering::SeqCst) - 1;
            inner.released.fetch_add(1, Ordering::SeqCst);
            if remaining == 0 {
                *inner
                    .idle_since
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
            }
            debug!(remaining, "keep-alive hold released");
            inner.changed.notify_waiters();
        }
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
