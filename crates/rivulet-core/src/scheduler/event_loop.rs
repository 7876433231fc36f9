//! Dedicated single-thread event loop scheduler.

use super::{panic_message, Scheduler, SchedulerRef};
use crate::clock::{self, Timestamp};
use crate::disposable::{Disposable, DisposableRef};
use crate::error::CoreError;
use crate::queue::{DueQueue, ScheduleFn, ScheduledItem};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(0);

struct LoopState {
    // Not-yet-due items, ordered by (due, sequence)
    queue: DueQueue,
    // Due items waiting to run, in order
    ready: VecDeque<Arc<ScheduledItem>>,
    thread_running: bool,
    disposed: bool,
}

struct LoopCore {
    gate: Mutex<LoopState>,
    wake: Condvar,
    exit_when_idle: bool,
    loop_id: u64,
}

/// Serializes all submitted work onto one background thread.
///
/// The loop owns a due-time queue and a ready FIFO behind a single gate. On
/// each wake it drains everything due into the ready list, re-arms a single
/// condvar deadline for the next pending item, and runs the whole ready list
/// outside the lock, so timer usage stays constant no matter how many items
/// are pending. With [`EventLoopScheduler::exit_when_idle`], the thread
/// exits once both lists are empty and a later schedule call spawns a fresh
/// one.
#[derive(Clone)]
pub struct EventLoopScheduler {
    core: Arc<LoopCore>,
}

impl EventLoopScheduler {
    /// Creates an event loop whose thread blocks while idle.
    pub fn new() -> Self {
        Self::with_options(false)
    }

    /// Creates an event loop whose thread exits while idle.
    pub fn exit_when_idle() -> Self {
        Self::with_options(true)
    }

    fn with_options(exit_when_idle: bool) -> Self {
        Self {
            core: Arc::new(LoopCore {
                gate: Mutex::new(LoopState {
                    queue: DueQueue::new(),
                    ready: VecDeque::new(),
                    thread_running: false,
                    disposed: false,
                }),
                wake: Condvar::new(),
                exit_when_idle,
                loop_id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            }),
        }
    }

    /// Schedules work at an absolute time, failing if the loop has been
    /// shut down.
    pub fn try_schedule_at(
        &self,
        due: Timestamp,
        action: ScheduleFn,
    ) -> Result<DisposableRef, CoreError> {
        let item = ScheduledItem::new(due, action);
        {
            let mut state = self.core.gate.lock();
            if state.disposed {
                return Err(CoreError::SchedulerShutDown);
            }
            state.queue.enqueue(item.clone());
            if !state.thread_running {
                state.thread_running = true;
                self.spawn_thread();
            }
        }
        self.core.wake.notify_one();
        Ok(item)
    }

    /// Stops the loop. Pending items are cancelled; an item already being
    /// invoked completes on the loop thread. Idempotent.
    pub fn shutdown(&self) {
        let cancelled = {
            let mut state = self.core.gate.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            let mut cancelled = state.queue.drain();
            cancelled.extend(state.ready.drain(..));
            cancelled
        };
        self.core.wake.notify_one();
        for item in cancelled {
            item.dispose();
        }
    }

    fn spawn_thread(&self) {
        let this = self.clone();
        thread::Builder::new()
            .name(format!("rivulet-loop-{}", self.core.loop_id))
            .spawn(move || this.run_loop())
            .expect("failed to spawn event loop thread");
    }

    fn run_loop(&self) {
        let handle: SchedulerRef = Arc::new(self.clone());
        loop {
            let batch: Vec<Arc<ScheduledItem>> = {
                let mut state = self.core.gate.lock();
                loop {
                    if state.disposed {
                        state.thread_running = false;
                        return;
                    }

                    // 1. Drain everything due into the ready list
                    let now = clock::now();
                    while let Some(item) = state.queue.peek() {
                        if item.due() > now {
                            break;
                        }
                        state.queue.dequeue();
                        state.ready.push_back(item);
                    }

                    if !state.ready.is_empty() {
                        break state.ready.drain(..).collect();
                    }

                    // 2. Arm a single deadline for the next pending item, or
                    // block (or exit) when nothing is pending
                    match state.queue.peek() {
                        Some(next) => {
                            let wait = next.due().saturating_since(clock::now());
                            self.core.wake.wait_for(&mut state, wait);
                        }
                        None => {
                            if self.core.exit_when_idle {
                                state.thread_running = false;
                                return;
                            }
                            self.core.wake.wait(&mut state);
                        }
                    }
                }
            };

            // 3. Run the whole ready batch outside the gate. One failing
            // item must not stop the ones behind it; a shutdown landing
            // mid-batch cancels the items not yet started.
            for item in batch {
                if self.core.gate.lock().disposed {
                    item.dispose();
                    continue;
                }
                if let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(|| item.invoke(&handle)))
                {
                    eprintln!(
                        "rivulet-loop-{}: scheduled action panicked: {}",
                        self.core.loop_id,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

impl Default for EventLoopScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EventLoopScheduler {
    fn schedule(&self, action: ScheduleFn) -> DisposableRef {
        self.schedule_at(clock::now(), action)
    }

    fn schedule_after(&self, delay: Duration, action: ScheduleFn) -> DisposableRef {
        self.schedule_at(clock::now() + delay, action)
    }

    fn schedule_at(&self, due: Timestamp, action: ScheduleFn) -> DisposableRef {
        self.try_schedule_at(due, action)
            .expect("scheduled work on an event loop after shutdown")
    }
}

impl Disposable for EventLoopScheduler {
    fn dispose(&self) {
        self.shutdown();
    }

    fn is_disposed(&self) -> bool {
        self.core.gate.lock().disposed
    }
}
