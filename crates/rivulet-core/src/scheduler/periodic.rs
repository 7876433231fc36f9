//! Dedicated-thread periodic execution.
//!
//! Two shapes: a fixed-rate loop waiting out each period on a condvar, and a
//! tight spin loop for zero-period requests, which platform timers cannot
//! express. Cancellation is cooperative in both: the thread polls a disposed
//! flag between ticks and is never interrupted mid-tick.

use super::{panic_message, PeriodicFn};
use crate::disposable::{self, DisposableRef};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Runs `tick` every `period` on a dedicated thread.
///
/// Fixed-rate: the next due time is `previous + period`, not `finish +
/// period`, so a slow tick does not push the whole series back. Disposing
/// the handle stops the loop before its next tick.
pub(crate) fn spawn_periodic_thread(period: Duration, mut tick: PeriodicFn) -> DisposableRef {
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let thread_gate = gate.clone();

    thread::Builder::new()
        .name("rivulet-periodic".to_string())
        .spawn(move || {
            let (cancelled, wake) = &*thread_gate;
            let mut next = Instant::now() + period;
            loop {
                {
                    let mut cancelled = cancelled.lock();
                    loop {
                        if *cancelled {
                            return;
                        }
                        if wake.wait_until(&mut cancelled, next).timed_out() {
                            break;
                        }
                    }
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| tick())) {
                    eprintln!(
                        "rivulet-periodic: periodic action panicked, stopping: {}",
                        panic_message(payload.as_ref())
                    );
                    return;
                }
                next += period;
            }
        })
        .expect("failed to spawn periodic thread");

    disposable::from_fn(move || {
        *gate.0.lock() = true;
        gate.1.notify_one();
    })
}

/// Runs `tick` back to back on a dedicated thread, as fast as possible.
///
/// Used for zero-period requests: the loop checks the disposed flag before
/// every tick, so disposal takes effect within one tick.
pub(crate) fn spawn_tight_loop(mut tick: PeriodicFn) -> DisposableRef {
    let cancelled = Arc::new(AtomicBool::new(false));
    let thread_cancelled = cancelled.clone();

    thread::Builder::new()
        .name("rivulet-periodic".to_string())
        .spawn(move || loop {
            if thread_cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| tick())) {
                eprintln!(
                    "rivulet-periodic: periodic action panicked, stopping: {}",
                    panic_message(payload.as_ref())
                );
                return;
            }
        })
        .expect("failed to spawn periodic thread");

    disposable::from_fn(move || {
        cancelled.store(true, Ordering::Release);
    })
}
