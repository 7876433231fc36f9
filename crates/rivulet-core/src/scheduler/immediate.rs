//! Inline execution on the calling thread.

use super::{Scheduler, SchedulerRef};
use crate::disposable::DisposableRef;
use crate::queue::ScheduleFn;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Runs work synchronously on the calling thread.
///
/// `schedule_after` blocks the caller until the due time, then runs inline.
/// Recursive scheduling from inside an action also runs inline, so deeply
/// recursive work grows the caller's stack; use [`super::CurrentThreadScheduler`]
/// when a trampoline is needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl ImmediateScheduler {
    /// Creates an immediate scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, action: ScheduleFn) -> DisposableRef {
        let handle: SchedulerRef = Arc::new(Self);
        // The work has already run by the time we return, so the handle we
        // hand back is whatever the action itself produced
        action(&handle)
    }

    fn schedule_after(&self, delay: Duration, action: ScheduleFn) -> DisposableRef {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.schedule(action)
    }
}
