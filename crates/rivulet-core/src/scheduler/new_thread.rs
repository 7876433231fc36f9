//! One dedicated thread per top-level unit of work.

use super::{periodic, EventLoopScheduler, PeriodicFn, PeriodicScheduler, Scheduler};
use crate::disposable::DisposableRef;
use crate::queue::ScheduleFn;
use std::time::Duration;

/// Spins up a private, exit-when-idle event loop for each top-level
/// scheduling request.
///
/// Meant for long-running work that should not occupy a pool slot for its
/// whole duration. Recursive schedule calls from inside an action land on
/// the same private loop; once that loop drains, its thread exits on its
/// own. Cancellation is cooperative, by disposing the returned handle, never
/// by thread interruption.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewThreadScheduler;

impl NewThreadScheduler {
    /// Creates a new-thread scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for NewThreadScheduler {
    fn schedule(&self, action: ScheduleFn) -> DisposableRef {
        self.schedule_after(Duration::ZERO, action)
    }

    fn schedule_after(&self, delay: Duration, action: ScheduleFn) -> DisposableRef {
        let worker = EventLoopScheduler::exit_when_idle();
        worker.schedule_after(delay, action)
    }
}

impl PeriodicScheduler for NewThreadScheduler {
    fn schedule_periodic(&self, period: Duration, tick: PeriodicFn) -> DisposableRef {
        if period.is_zero() {
            periodic::spawn_tight_loop(tick)
        } else {
            periodic::spawn_periodic_thread(period, tick)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::{empty, Disposable};
    use crate::scheduler::SchedulerExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_each_request_gets_its_own_thread() {
        let scheduler = NewThreadScheduler::new();
        let (tx, rx) = mpsc::channel();

        for _ in 0..2 {
            let tx = tx.clone();
            scheduler.schedule_fn(move || {
                tx.send(thread::current().id()).unwrap();
            });
        }

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_recursive_work_shares_the_private_loop() {
        let scheduler = NewThreadScheduler::new();
        let (tx, rx) = mpsc::channel();

        scheduler.schedule(Box::new(move |inner| {
            let outer_thread = thread::current().id();
            let tx = tx.clone();
            inner.schedule_fn(move || {
                tx.send(thread::current().id() == outer_thread).unwrap();
            });
            empty()
        }));

        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_delayed_work_waits() {
        let scheduler = NewThreadScheduler::new();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();

        scheduler.schedule_fn_after(Duration::from_millis(30), move || {
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_before_due_suppresses_execution() {
        let scheduler = NewThreadScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();

        let handle = scheduler.schedule_fn_after(Duration::from_millis(60), move || {
            r.store(true, Ordering::SeqCst);
        });
        handle.dispose();

        thread::sleep(Duration::from_millis(120));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
