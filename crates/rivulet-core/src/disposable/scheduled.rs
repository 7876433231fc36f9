//! Disposable whose disposal is routed through a scheduler.

use super::{empty, Disposable, DisposableRef};
use crate::scheduler::SchedulerRef;
use parking_lot::Mutex;

/// Pairs a disposable with the scheduler it should be disposed on.
///
/// Disposing this container schedules the inner disposal instead of running
/// it on the caller's thread. Used when teardown must happen with the same
/// execution-context affinity as the work it cancels.
pub struct ScheduledDisposable {
    scheduler: SchedulerRef,
    inner: Mutex<Option<DisposableRef>>,
}

impl ScheduledDisposable {
    /// Binds `inner` to `scheduler` for disposal.
    pub fn new(scheduler: SchedulerRef, inner: DisposableRef) -> Self {
        Self {
            scheduler,
            inner: Mutex::new(Some(inner)),
        }
    }

    /// The scheduler disposal is routed through.
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// Returns the inner disposable, if not yet disposed.
    pub fn inner(&self) -> Option<DisposableRef> {
        self.inner.lock().clone()
    }
}

impl Disposable for ScheduledDisposable {
    fn dispose(&self) {
        let inner = self.inner.lock().take();
        if let Some(inner) = inner {
            self.scheduler.schedule(Box::new(move |_| {
                inner.dispose();
                empty()
            }));
        }
    }

    fn is_disposed(&self) -> bool {
        self.inner.lock().is_none()
    }
}
