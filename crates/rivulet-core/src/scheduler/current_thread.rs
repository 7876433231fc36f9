//! Trampolined execution on the calling thread.

use super::{Scheduler, SchedulerRef};
use crate::clock;
use crate::disposable::DisposableRef;
use crate::queue::{DueQueue, ScheduleFn, ScheduledItem};
use std::cell::RefCell;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

thread_local! {
    // Present while this thread is draining its trampoline queue
    static TRAMPOLINE: RefCell<Option<DueQueue>> = const { RefCell::new(None) };
}

// Clears the trampoline even if a drained item panics, so the thread is not
// stuck in "nested" mode afterwards
struct TrampolineGuard;

impl Drop for TrampolineGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|queue| *queue.borrow_mut() = None);
    }
}

/// Runs work on the calling thread through a thread-local trampoline.
///
/// The outermost schedule call installs a due-time queue and drains it in
/// `(due, sequence)` order, sleeping until each item is due; schedule calls
/// made from inside a running item enqueue instead of recursing, which keeps
/// recursive scheduling at constant stack depth.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentThreadScheduler;

impl CurrentThreadScheduler {
    /// Creates a current-thread scheduler.
    pub fn new() -> Self {
        Self
    }

    /// Returns true if no trampoline is active on the calling thread, i.e.
    /// a schedule call here would start draining rather than enqueue.
    pub fn is_schedule_required() -> bool {
        TRAMPOLINE.with(|queue| queue.borrow().is_none())
    }
}

impl Scheduler for CurrentThreadScheduler {
    fn schedule(&self, action: ScheduleFn) -> DisposableRef {
        self.schedule_after(Duration::ZERO, action)
    }

    fn schedule_after(&self, delay: Duration, action: ScheduleFn) -> DisposableRef {
        let item = ScheduledItem::new(clock::now() + delay, action);

        let nested = TRAMPOLINE.with(|queue| {
            let mut queue = queue.borrow_mut();
            match queue.as_mut() {
                Some(queue) => {
                    queue.enqueue(item.clone());
                    true
                }
                None => {
                    let mut fresh = DueQueue::new();
                    fresh.enqueue(item.clone());
                    *queue = Some(fresh);
                    false
                }
            }
        });

        if !nested {
            let _guard = TrampolineGuard;
            let handle: SchedulerRef = Arc::new(Self);
            loop {
                let next =
                    TRAMPOLINE.with(|queue| queue.borrow_mut().as_mut().unwrap().dequeue());
                let Some(next) = next else { break };
                let wait = next.due().saturating_since(clock::now());
                if !wait.is_zero() {
                    thread::sleep(wait);
                }
                next.invoke(&handle);
            }
        }

        item
    }
}
