//! Cancellation signal source and pollable tokens.

use super::Disposable;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct TokenInner {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl TokenInner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

/// One-shot cancellation signal. Disposing the source raises the signal.
///
/// Cancellation here is cooperative: raising the signal flips a flag that
/// running work is expected to poll, and fires any registered callbacks
/// exactly once. It never preempts work already in flight.
#[derive(Clone)]
pub struct CancellationSource {
    inner: Arc<TokenInner>,
}

impl CancellationSource {
    /// Creates an unsignalled source.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Hands out a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: self.inner.clone(),
        }
    }

    /// Raises the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns true once the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for CancellationSource {
    fn dispose(&self) {
        self.cancel();
    }

    fn is_disposed(&self) -> bool {
        self.is_cancelled()
    }
}

/// Cheap cloneable handle observing a [`CancellationSource`].
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Returns a token that can never be cancelled.
    pub fn never() -> Self {
        CancellationSource::new().token()
    }

    /// Returns true once the source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Registers a callback to run when the source is cancelled.
    ///
    /// If the source is already cancelled the callback runs immediately, on
    /// the calling thread. Each callback runs at most once.
    pub fn register<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            callback();
            return;
        }
        let mut callbacks = self.inner.callbacks.lock();
        // cancel() flips the flag before draining; re-check under the lock so
        // a late registration cannot be left behind unfired
        if self.inner.cancelled.load(Ordering::Acquire) {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }
}
