//! Disposable resources: idempotent, thread-safe "release exactly once".
//!
//! Every schedule operation hands back a disposable cancellation handle, and
//! every owned resource (timer, thread, subscription) is torn down through
//! one of these primitives. The global contract: `dispose` is idempotent,
//! never returns an error, and after a container disposes, no member is left
//! both registered and un-disposed.

mod cancellation;
mod composite;
mod ref_count;
mod scheduled;
mod serial;
mod single_assignment;

pub use cancellation::{CancellationSource, CancellationToken};
pub use composite::CompositeDisposable;
pub use ref_count::RefCountDisposable;
pub use scheduled::ScheduledDisposable;
pub use serial::SerialDisposable;
pub use single_assignment::SingleAssignmentDisposable;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

/// A capability representing "release this resource exactly once".
pub trait Disposable: Send + Sync {
    /// Releases the resource. Idempotent: calls after the first do nothing.
    fn dispose(&self);

    /// Returns true once the resource has been released.
    fn is_disposed(&self) -> bool;
}

/// Shared handle to a disposable resource.
pub type DisposableRef = Arc<dyn Disposable>;

/// Inert disposable that owns nothing.
struct EmptyDisposable;

impl Disposable for EmptyDisposable {
    fn dispose(&self) {}

    fn is_disposed(&self) -> bool {
        true
    }
}

static EMPTY: Lazy<DisposableRef> = Lazy::new(|| Arc::new(EmptyDisposable));

/// Returns the shared inert disposable. Disposing it is a no-op.
pub fn empty() -> DisposableRef {
    EMPTY.clone()
}

/// One-shot disposable that runs a closure on first dispose.
struct ActionDisposable {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposable for ActionDisposable {
    fn dispose(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    fn is_disposed(&self) -> bool {
        self.action.lock().is_none()
    }
}

/// Wraps a release closure in a disposable. The closure runs at most once.
pub fn from_fn<F>(f: F) -> DisposableRef
where
    F: FnOnce() + Send + 'static,
{
    Arc::new(ActionDisposable {
        action: Mutex::new(Some(Box::new(f))),
    })
}
