//! Virtual-time scheduler for deterministic replay.

use super::{Scheduler, SchedulerRef};
use crate::clock::{Stopwatch, Timestamp};
use crate::disposable::{Disposable, DisposableRef};
use crate::queue::{DueQueue, ScheduleFn, ScheduledItem};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct VirtualState {
    clock: Timestamp,
    queue: DueQueue,
    enabled: bool,
    running: bool,
}

/// Drives the work-item queue from a simulated clock.
///
/// [`VirtualTimeScheduler::start`] pops the earliest pending item, advances
/// the clock to exactly that item's due time, never further, and invokes it;
/// ties run in submission order. Because the clock only moves when work is
/// popped, a run over the same submissions replays identically, which is
/// what makes time-dependent compositions testable without wall-clock
/// flakiness.
#[derive(Clone)]
pub struct VirtualTimeScheduler {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualTimeScheduler {
    /// Creates a scheduler with its clock at [`Timestamp::ZERO`].
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Creates a scheduler with its clock at the given time.
    pub fn starting_at(clock: Timestamp) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                clock,
                queue: DueQueue::new(),
                enabled: false,
                running: false,
            })),
        }
    }

    /// Runs pending work in `(due, sequence)` order until the queue is
    /// empty or [`VirtualTimeScheduler::stop`] is called.
    ///
    /// Panics if called re-entrantly from work it is itself running.
    pub fn start(&self) {
        {
            let mut state = self.state.lock();
            assert!(
                !state.running,
                "virtual time scheduler is already running"
            );
            state.running = true;
            state.enabled = true;
        }

        let handle: SchedulerRef = Arc::new(self.clone());
        loop {
            // The gate is released before each invocation so work can
            // schedule more work on this same scheduler
            let next = {
                let mut state = self.state.lock();
                if !state.enabled {
                    None
                } else {
                    match state.queue.dequeue() {
                        Some(item) => {
                            if item.due() > state.clock {
                                state.clock = item.due();
                            }
                            Some(item)
                        }
                        None => {
                            state.enabled = false;
                            None
                        }
                    }
                }
            };

            match next {
                Some(item) => item.invoke(&handle),
                None => break,
            }
        }

        self.state.lock().running = false;
    }

    /// Stops the run. Observed before the next item is popped; the item
    /// currently being invoked still completes.
    pub fn stop(&self) {
        self.state.lock().enabled = false;
    }

    /// Runs pending work due at or before `target`, then sets the clock to
    /// `target`.
    ///
    /// The clock never moves backward: a target earlier than the current
    /// clock still runs nothing and leaves the clock where it was.
    pub fn advance_to(&self, target: Timestamp) {
        {
            let mut state = self.state.lock();
            assert!(
                !state.running,
                "virtual time scheduler is already running"
            );
            state.running = true;
        }

        let handle: SchedulerRef = Arc::new(self.clone());
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.peek() {
                    Some(item) if item.due() <= target => {
                        state.queue.dequeue();
                        if item.due() > state.clock {
                            state.clock = item.due();
                        }
                        Some(item)
                    }
                    _ => None,
                }
            };

            match next {
                Some(item) => item.invoke(&handle),
                None => break,
            }
        }

        let mut state = self.state.lock();
        if target > state.clock {
            state.clock = target;
        }
        state.running = false;
    }

    /// Runs pending work due within the next `amount` of virtual time.
    pub fn advance_by(&self, amount: Duration) {
        let target = self.now() + amount;
        self.advance_to(target);
    }

    /// Moves the clock forward without running any work.
    pub fn sleep(&self, amount: Duration) {
        let mut state = self.state.lock();
        state.clock = state.clock + amount;
    }

    /// Number of items still pending.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Default for VirtualTimeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn now(&self) -> Timestamp {
        self.state.lock().clock
    }

    fn schedule(&self, action: ScheduleFn) -> DisposableRef {
        let due = self.now();
        self.schedule_at(due, action)
    }

    fn schedule_after(&self, delay: Duration, action: ScheduleFn) -> DisposableRef {
        // Relative to the simulated clock, not wall time
        let due = self.now() + delay;
        self.schedule_at(due, action)
    }

    fn schedule_at(&self, due: Timestamp, action: ScheduleFn) -> DisposableRef {
        let item = ScheduledItem::new(due, action);
        self.state.lock().queue.enqueue(item.clone());
        Arc::new(VirtualHandle {
            state: self.state.clone(),
            item,
        })
    }

    fn start_stopwatch(&self) -> Box<dyn Stopwatch> {
        Box::new(VirtualStopwatch {
            state: self.state.clone(),
            started: self.now(),
        })
    }
}

// Cancellation handle that eagerly removes the item from the queue
struct VirtualHandle {
    state: Arc<Mutex<VirtualState>>,
    item: Arc<ScheduledItem>,
}

impl Disposable for VirtualHandle {
    fn dispose(&self) {
        self.state.lock().queue.remove(&self.item);
        self.item.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.item.is_disposed()
    }
}

struct VirtualStopwatch {
    state: Arc<Mutex<VirtualState>>,
    started: Timestamp,
}

impl Stopwatch for VirtualStopwatch {
    fn elapsed(&self) -> Duration {
        self.state.lock().clock.saturating_since(self.started)
    }
}
