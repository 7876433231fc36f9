//! Rivulet Concurrency Core
//!
//! The scheduling and resource-lifecycle substrate under the Rivulet stream
//! library:
//! - **Disposables**: idempotent, thread-safe release capabilities
//!   (`disposable` module)
//! - **Clock**: comparable timestamps and stopwatches decoupled from the
//!   wall clock (`clock` module)
//! - **Queue**: the due-time/sequence ordered work-item queue every
//!   queue-driven strategy shares (`queue` module)
//! - **Schedulers**: immediate, trampoline, thread pool, dedicated event
//!   loop, new-thread, and virtual-time strategies behind one trait
//!   (`scheduler` module)
//! - **Tasks**: cooperative execution with completion outcomes, cancellation
//!   signals, and rendezvous continuations (`task` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use rivulet_core::{Disposable, SchedulerExt, VirtualTimeScheduler};
//! use std::time::Duration;
//!
//! let scheduler = VirtualTimeScheduler::new();
//! scheduler.schedule_fn_after(Duration::from_millis(10), || println!("later"));
//! scheduler.schedule_fn(|| println!("now"));
//!
//! // Deterministic: runs both items in due order on this thread
//! scheduler.start();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod clock;
pub mod disposable;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use clock::{Stopwatch, Timestamp};
pub use disposable::{
    CancellationSource, CancellationToken, CompositeDisposable, Disposable, DisposableRef,
    RefCountDisposable, ScheduledDisposable, SerialDisposable, SingleAssignmentDisposable,
};
pub use error::CoreError;
pub use queue::{DueQueue, ScheduleFn, ScheduledItem};
pub use scheduler::{
    CurrentThreadScheduler, EventLoopScheduler, ImmediateScheduler, NewThreadScheduler,
    PeriodicFn, PeriodicScheduler, Scheduler, SchedulerExt, SchedulerRef, ThreadPoolScheduler,
    VirtualTimeScheduler,
};
pub use task::{Outcome, Rendezvous, TaskExecutor, TaskFn, TaskHandle};
