//! Worker-pool scheduler with a dedicated timer thread.
//!
//! Workers pick up items from the global injector or steal from each other;
//! delayed items wait on a single timer thread that posts them to the
//! injector when due. Recursive schedule calls made from a worker thread
//! push to that worker's local deque for cache locality.

use super::{panic_message, PeriodicFn, PeriodicScheduler, Scheduler, SchedulerRef};
use crate::clock;
use crate::disposable::{self, Disposable, DisposableRef};
use crate::queue::{next_sequence, ScheduleFn, ScheduledItem};
use crate::scheduler::periodic;
use crossbeam_deque::{Injector, Stealer, Worker as WorkerDeque};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

thread_local! {
    // Present while the current thread is a pool worker
    static WORKER_CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

struct WorkerContext {
    pool: Weak<PoolCore>,
    local: Rc<WorkerDeque<Arc<ScheduledItem>>>,
}

// Clears the worker context when the worker loop exits, panicking or not
struct WorkerContextGuard;

impl Drop for WorkerContextGuard {
    fn drop(&mut self) {
        WORKER_CONTEXT.with(|context| *context.borrow_mut() = None);
    }
}

struct PoolCore {
    injector: Injector<Arc<ScheduledItem>>,
    stealers: Vec<Stealer<Arc<ScheduledItem>>>,
    timer: TimerThread,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Scheduler that dispatches work onto a pool of worker threads.
///
/// Clones share the same pool. The process-wide default instance is
/// [`ThreadPoolScheduler::shared`]; private pools are constructed with
/// [`ThreadPoolScheduler::new`] and torn down with
/// [`ThreadPoolScheduler::shutdown`].
#[derive(Clone)]
pub struct ThreadPoolScheduler {
    core: Arc<PoolCore>,
}

impl ThreadPoolScheduler {
    /// Creates a pool with the specified number of workers.
    /// If `worker_count` is 0, defaults to the number of CPU cores.
    pub fn new(worker_count: usize) -> Self {
        let count = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        let mut locals = Vec::new();
        let mut stealers = Vec::new();
        for _ in 0..count {
            let local = WorkerDeque::new_lifo();
            stealers.push(local.stealer());
            locals.push(local);
        }

        let core = Arc::new(PoolCore {
            injector: Injector::new(),
            stealers,
            timer: TimerThread::new(),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        });
        let scheduler = Self { core: core.clone() };

        let mut handles = Vec::new();
        for (id, local) in locals.into_iter().enumerate() {
            let this = scheduler.clone();
            let handle = thread::Builder::new()
                .name(format!("rivulet-worker-{id}"))
                .spawn(move || this.worker_loop(id, local))
                .expect("failed to spawn pool worker thread");
            handles.push(handle);
        }
        *core.workers.lock() = handles;

        core.timer.start(core.clone());

        scheduler
    }

    /// The process-wide shared pool, created on first use with one worker
    /// per CPU core. Never shut down explicitly; its threads live for the
    /// rest of the process.
    pub fn shared() -> &'static ThreadPoolScheduler {
        static SHARED: Lazy<ThreadPoolScheduler> = Lazy::new(|| ThreadPoolScheduler::new(0));
        &SHARED
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.core.stealers.len()
    }

    /// Stops the timer and worker threads and waits for them to exit.
    ///
    /// Idempotent. Pending items never run. Must not be called from one of
    /// the pool's own worker threads.
    pub fn shutdown(&self) {
        if self.core.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.timer.stop();
        let handles = std::mem::take(&mut *self.core.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn push(&self, item: Arc<ScheduledItem>) {
        let pushed_local = WORKER_CONTEXT.with(|context| {
            if let Some(context) = context.borrow().as_ref() {
                if let Some(pool) = context.pool.upgrade() {
                    if Arc::ptr_eq(&pool, &self.core) {
                        context.local.push(item.clone());
                        return true;
                    }
                }
            }
            false
        });
        if !pushed_local {
            self.core.injector.push(item);
        }
    }

    fn worker_loop(&self, id: usize, local: WorkerDeque<Arc<ScheduledItem>>) {
        let local = Rc::new(local);
        WORKER_CONTEXT.with(|context| {
            *context.borrow_mut() = Some(WorkerContext {
                pool: Arc::downgrade(&self.core),
                local: local.clone(),
            });
        });
        let _guard = WorkerContextGuard;

        let handle: SchedulerRef = Arc::new(self.clone());
        loop {
            if self.core.shutdown.load(Ordering::Acquire) {
                break;
            }

            let item = match Self::find_work(&local, &self.core.stealers, &self.core.injector) {
                Some(item) => item,
                None => {
                    // No work available; sleep briefly to avoid busy-waiting.
                    // Delayed items are handled by the timer thread.
                    thread::sleep(Duration::from_micros(100));
                    continue;
                }
            };

            // One failing item must not take the worker down with it
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| item.invoke(&handle))) {
                eprintln!(
                    "rivulet-worker-{id}: scheduled action panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }

        #[cfg(debug_assertions)]
        eprintln!("rivulet-worker-{id} shutting down");
    }

    /// Find work: local pop, then steal, then inject
    fn find_work(
        local: &WorkerDeque<Arc<ScheduledItem>>,
        stealers: &[Stealer<Arc<ScheduledItem>>],
        injector: &Injector<Arc<ScheduledItem>>,
    ) -> Option<Arc<ScheduledItem>> {
        // 1. Try local deque (LIFO, cache locality)
        if let Some(item) = local.pop() {
            return Some(item);
        }

        // 2. Try stealing from other workers, then the global injector
        loop {
            if let Some(item) = Self::steal_from_others(stealers) {
                return Some(item);
            }

            match injector.steal() {
                crossbeam_deque::Steal::Success(item) => return Some(item),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        None
    }

    fn steal_from_others(stealers: &[Stealer<Arc<ScheduledItem>>]) -> Option<Arc<ScheduledItem>> {
        use rand::Rng;

        if stealers.is_empty() {
            return None;
        }

        // Randomly select a victim and sweep from there
        let start = rand::thread_rng().gen_range(0..stealers.len());
        for i in 0..stealers.len() {
            let stealer = &stealers[(start + i) % stealers.len()];
            loop {
                match stealer.steal() {
                    crossbeam_deque::Steal::Success(item) => return Some(item),
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }

        None
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn schedule(&self, action: ScheduleFn) -> DisposableRef {
        let item = ScheduledItem::new(clock::now(), action);
        self.push(item.clone());
        item
    }

    fn schedule_after(&self, delay: Duration, action: ScheduleFn) -> DisposableRef {
        if delay.is_zero() {
            return self.schedule(action);
        }
        let item = ScheduledItem::new(clock::now() + delay, action);
        self.core
            .timer
            .register(Instant::now() + delay, TimerTask::Fire(item.clone()));
        item
    }
}

impl PeriodicScheduler for ThreadPoolScheduler {
    fn schedule_periodic(&self, period: Duration, tick: PeriodicFn) -> DisposableRef {
        if period.is_zero() {
            return periodic::spawn_tight_loop(tick);
        }

        let state = Arc::new(RecurringState {
            tick: Mutex::new(tick),
            cancelled: AtomicBool::new(false),
        });
        self.core.timer.register(
            Instant::now() + period,
            TimerTask::Recur {
                state: state.clone(),
                period,
            },
        );
        disposable::from_fn(move || {
            state.cancelled.store(true, Ordering::Release);
        })
    }
}

/// Shared state of one periodic registration.
struct RecurringState {
    tick: Mutex<PeriodicFn>,
    cancelled: AtomicBool,
}

enum TimerTask {
    /// Post the item to the pool when due
    Fire(Arc<ScheduledItem>),
    /// Post a tick to the pool when due, then re-arm
    Recur {
        state: Arc<RecurringState>,
        period: Duration,
    },
}

struct TimerEntry {
    wake_at: Instant,
    sequence: u64,
    task: TimerTask,
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

/// Timer thread for efficient delayed dispatch.
///
/// Instead of polling for due items, the thread waits on a condvar timeout
/// armed for the earliest pending wake time. One thread and one armed
/// deadline serve the whole pool regardless of how many items are pending.
struct TimerThread {
    pending: Mutex<BinaryHeap<TimerEntry>>,
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    fn new() -> Self {
        Self {
            pending: Mutex::new(BinaryHeap::new()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    fn start(&self, core: Arc<PoolCore>) {
        let handle = thread::Builder::new()
            .name("rivulet-timer".to_string())
            .spawn(move || core.timer.run_loop(&core.injector))
            .expect("failed to spawn timer thread");
        *self.handle.lock() = Some(handle);
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn register(&self, wake_at: Instant, task: TimerTask) {
        let mut pending = self.pending.lock();
        pending.push(TimerEntry {
            wake_at,
            sequence: next_sequence(),
            task,
        });
        // The new entry may be earlier than the currently armed deadline
        self.notify.notify_one();
    }

    fn run_loop(&self, injector: &Injector<Arc<ScheduledItem>>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let mut pending = self.pending.lock();

            // Re-check shutdown after acquiring the lock to close the race:
            // stop() may set the flag and notify between our first check and
            // the lock, which would otherwise lose the wakeup.
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = Instant::now();
            while let Some(entry) = pending.peek() {
                if entry.wake_at > now {
                    break;
                }
                let entry = pending.pop().unwrap();
                match entry.task {
                    TimerTask::Fire(item) => {
                        if !item.is_disposed() {
                            injector.push(item);
                        }
                    }
                    TimerTask::Recur { state, period } => {
                        if state.cancelled.load(Ordering::Acquire) {
                            continue;
                        }
                        injector.push(make_tick_item(&state));
                        pending.push(TimerEntry {
                            wake_at: entry.wake_at + period,
                            sequence: next_sequence(),
                            task: TimerTask::Recur { state, period },
                        });
                    }
                }
            }

            match pending.peek() {
                Some(next) => {
                    let wake_at = next.wake_at;
                    // Wait until the earliest deadline; wakes early if a new
                    // entry is registered
                    self.notify.wait_until(&mut pending, wake_at);
                }
                None => {
                    self.notify.wait(&mut pending);
                }
            }
        }

        #[cfg(debug_assertions)]
        eprintln!("rivulet-timer shutting down");
    }
}

fn make_tick_item(state: &Arc<RecurringState>) -> Arc<ScheduledItem> {
    let state = state.clone();
    ScheduledItem::new(
        clock::now(),
        Box::new(move |_| {
            if !state.cancelled.load(Ordering::Acquire) {
                // The tick mutex also serializes overlapping ticks when the
                // period is shorter than a tick takes to run
                let mut tick = state.tick.lock();
                let result = panic::catch_unwind(AssertUnwindSafe(|| (*tick)()));
                if let Err(payload) = result {
                    eprintln!(
                        "rivulet-timer: periodic action panicked, stopping: {}",
                        panic_message(payload.as_ref())
                    );
                    state.cancelled.store(true, Ordering::Release);
                }
            }
            disposable::empty()
        }),
    )
}
