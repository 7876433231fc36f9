//! Cooperative task execution over a scheduler.
//!
//! An explicit continuation-record layer: actions are posted through a
//! scheduler, resolve a completion latch to completed, cancelled, or failed,
//! and thread a cooperative cancellation token through to the running
//! closure. There is no coroutine transform here; a "suspension" is just a
//! closure handed back to the owning scheduler.

use crate::disposable::{
    self, CancellationSource, CancellationToken, Disposable, DisposableRef,
    SingleAssignmentDisposable,
};
use crate::scheduler::{panic_message, SchedulerRef};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// How a task finished.
///
/// Cancellation is its own outcome, never conflated with failure: a task
/// whose cancellation signal was raised resolves to `Cancelled` even if its
/// closure ran to completion after observing the signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The action ran to completion.
    Completed,
    /// The cancellation signal was raised before or during the action.
    Cancelled,
    /// The action panicked; the payload's message is preserved.
    Failed(String),
}

struct CompletionState {
    outcome: Mutex<Option<Outcome>>,
    signal: Condvar,
}

impl CompletionState {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            signal: Condvar::new(),
        }
    }

    // First resolution wins; later ones are no-ops
    fn resolve(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.signal.notify_all();
        }
    }
}

/// An action run as a task: receives the scheduler it runs under and the
/// task's cancellation token to poll.
pub type TaskFn = Box<dyn FnOnce(&SchedulerRef, &CancellationToken) + Send>;

/// Handle to a task in flight: completion latch plus cancellation.
///
/// Disposing the handle best-effort cancels the task: it raises the
/// cancellation signal and revokes the pending work item, but it never
/// aborts a closure that has already started running.
#[derive(Clone)]
pub struct TaskHandle {
    completion: Arc<CompletionState>,
    cancel: CancellationSource,
    pending: Arc<SingleAssignmentDisposable>,
}

impl TaskHandle {
    /// Blocks until the task resolves.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.completion.outcome.lock();
        while slot.is_none() {
            self.completion.signal.wait(&mut slot);
        }
        slot.clone().unwrap()
    }

    /// Blocks until the task resolves or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut slot = self.completion.outcome.lock();
        if slot.is_none() {
            self.completion.signal.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }

    /// The outcome, if the task has resolved.
    pub fn outcome(&self) -> Option<Outcome> {
        self.completion.outcome.lock().clone()
    }

    /// Returns true once the task has resolved.
    pub fn is_done(&self) -> bool {
        self.outcome().is_some()
    }

    /// The task's cancellation token, for handing to collaborators.
    pub fn token(&self) -> CancellationToken {
        self.cancel.token()
    }
}

impl Disposable for TaskHandle {
    fn dispose(&self) {
        // The registered cancel callback resolves the latch and revokes the
        // pending item
        self.cancel.cancel();
    }

    fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs actions as tasks on a captured scheduler.
pub struct TaskExecutor {
    scheduler: SchedulerRef,
}

impl TaskExecutor {
    /// Creates an executor submitting to `scheduler`.
    pub fn new(scheduler: SchedulerRef) -> Self {
        Self { scheduler }
    }

    /// The scheduler tasks are submitted to.
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// Submits an action with a fresh cancellation signal.
    pub fn spawn(&self, action: TaskFn) -> TaskHandle {
        self.execute(action, CancellationSource::new())
    }

    /// Submits an action under a caller-provided cancellation signal.
    ///
    /// The signal is checked before the action is invoked and passed into
    /// it for cooperative polling. Raising it, from the caller's clone or by
    /// disposing the handle, resolves the task to [`Outcome::Cancelled`].
    pub fn execute(&self, action: TaskFn, cancel: CancellationSource) -> TaskHandle {
        let completion = Arc::new(CompletionState::new());
        let pending = Arc::new(SingleAssignmentDisposable::new());
        let token = cancel.token();

        {
            let completion = completion.clone();
            let pending = pending.clone();
            token.register(move || {
                completion.resolve(Outcome::Cancelled);
                pending.dispose();
            });
        }

        let item = {
            let completion = completion.clone();
            let token = token.clone();
            self.scheduler.schedule(Box::new(move |scheduler| {
                if token.is_cancelled() {
                    completion.resolve(Outcome::Cancelled);
                    return disposable::empty();
                }
                match panic::catch_unwind(AssertUnwindSafe(|| action(scheduler, &token))) {
                    Ok(()) => {
                        if token.is_cancelled() {
                            completion.resolve(Outcome::Cancelled);
                        } else {
                            completion.resolve(Outcome::Completed);
                        }
                    }
                    Err(payload) => {
                        completion
                            .resolve(Outcome::Failed(panic_message(payload.as_ref()).to_string()));
                    }
                }
                disposable::empty()
            }))
        };
        // If cancellation already fired, the disposed slot revokes the item
        // on assignment
        let _ = pending.set(item);

        TaskHandle {
            completion,
            cancel,
            pending,
        }
    }

    /// Returns a rendezvous bound to this executor's scheduler and the
    /// given token.
    pub fn rendezvous(&self, token: CancellationToken) -> Rendezvous {
        Rendezvous::new(self.scheduler.clone(), token)
    }
}

/// Resumes continuations on a specific scheduler's execution context.
///
/// After an arbitrary suspension, whichever thread completed the antecedent
/// operation calls [`Rendezvous::continue_with`]; the continuation is
/// re-posted through the owning scheduler instead of running inline, which
/// restores execution-context affinity lost across the suspension point.
pub struct Rendezvous {
    scheduler: SchedulerRef,
    token: CancellationToken,
}

impl Rendezvous {
    /// Binds a rendezvous to a scheduler and cancellation token.
    pub fn new(scheduler: SchedulerRef, token: CancellationToken) -> Self {
        Self { scheduler, token }
    }

    /// The scheduler continuations are re-posted through.
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// The cancellation token gating continuations.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Posts a continuation through the owning scheduler.
    ///
    /// A continuation whose token is already cancelled is suppressed; the
    /// token is re-checked on the scheduler's context before running.
    pub fn continue_with<F>(&self, continuation: F) -> DisposableRef
    where
        F: FnOnce(&SchedulerRef) + Send + 'static,
    {
        if self.token.is_cancelled() {
            return disposable::empty();
        }
        let token = self.token.clone();
        self.scheduler.schedule(Box::new(move |scheduler| {
            if !token.is_cancelled() {
                continuation(scheduler);
            }
            disposable::empty()
        }))
    }
}
