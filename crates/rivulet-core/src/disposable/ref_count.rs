//! Primary/dependent ref-counted disposable.

use super::{empty, Disposable, DisposableRef};
use crate::error::CoreError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct RefCountState {
    underlying: Option<DisposableRef>,
    dependents: usize,
    primary_disposed: bool,
}

/// Wraps a primary disposable that releases only after both the container
/// itself and every outstanding dependent handle have been disposed, in any
/// order.
pub struct RefCountDisposable {
    state: Mutex<RefCountState>,
    strict: bool,
}

impl RefCountDisposable {
    /// Wraps `underlying` in a new ref-counted container.
    pub fn new(underlying: DisposableRef) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefCountState {
                underlying: Some(underlying),
                dependents: 0,
                primary_disposed: false,
            }),
            strict: false,
        })
    }

    /// Like [`RefCountDisposable::new`], but dependent acquisition after the
    /// container is disposed is an error instead of yielding an inert handle.
    pub fn strict(underlying: DisposableRef) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefCountState {
                underlying: Some(underlying),
                dependents: 0,
                primary_disposed: false,
            }),
            strict: true,
        })
    }

    /// Acquires a dependent handle that holds the underlying resource open.
    ///
    /// After the container has been disposed, this returns an inert handle,
    /// or [`CoreError::Disposed`] in strict mode.
    pub fn dependent(self: &Arc<Self>) -> Result<DisposableRef, CoreError> {
        let mut state = self.state.lock();
        if state.primary_disposed {
            if self.strict {
                return Err(CoreError::Disposed);
            }
            return Ok(empty());
        }
        state.dependents += 1;
        Ok(Arc::new(DependentDisposable {
            owner: Arc::clone(self),
            disposed: AtomicBool::new(false),
        }))
    }

    /// Number of outstanding dependent handles.
    pub fn dependent_count(&self) -> usize {
        self.state.lock().dependents
    }

    fn release_dependent(&self) {
        let to_dispose = {
            let mut state = self.state.lock();
            state.dependents -= 1;
            if state.primary_disposed && state.dependents == 0 {
                state.underlying.take()
            } else {
                None
            }
        };
        if let Some(underlying) = to_dispose {
            underlying.dispose();
        }
    }
}

impl Disposable for RefCountDisposable {
    fn dispose(&self) {
        let to_dispose = {
            let mut state = self.state.lock();
            if state.primary_disposed {
                return;
            }
            state.primary_disposed = true;
            if state.dependents == 0 {
                state.underlying.take()
            } else {
                None
            }
        };
        if let Some(underlying) = to_dispose {
            underlying.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().primary_disposed
    }
}

struct DependentDisposable {
    owner: Arc<RefCountDisposable>,
    disposed: AtomicBool,
}

impl Disposable for DependentDisposable {
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.owner.release_dependent();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::from_fn;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, DisposableRef) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let d = from_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, d)
    }

    // All interleavings of {primary, dep1, dep2} must dispose the underlying
    // resource exactly once, only after the last of the three.
    fn run_order(order: [usize; 3]) {
        let (count, underlying) = counting();
        let rc = RefCountDisposable::new(underlying);
        let dep1 = rc.dependent().unwrap();
        let dep2 = rc.dependent().unwrap();

        let steps: [&dyn Fn(); 3] = [&|| rc.dispose(), &|| dep1.dispose(), &|| dep2.dispose()];
        for (i, step) in order.iter().enumerate() {
            steps[*step]();
            let expected = if i == 2 { 1 } else { 0 };
            assert_eq!(
                count.load(Ordering::SeqCst),
                expected,
                "order {order:?}, step {i}"
            );
        }
    }

    #[test]
    fn test_disposal_order_independence() {
        run_order([0, 1, 2]);
        run_order([1, 0, 2]);
        run_order([1, 2, 0]);
    }

    #[test]
    fn test_dependent_after_dispose_is_inert() {
        let (count, underlying) = counting();
        let rc = RefCountDisposable::new(underlying);
        rc.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let late = rc.dependent().unwrap();
        assert!(late.is_disposed());
        late.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strict_dependent_after_dispose_is_error() {
        let (_, underlying) = counting();
        let rc = RefCountDisposable::strict(underlying);
        rc.dispose();
        assert!(matches!(rc.dependent(), Err(CoreError::Disposed)));
    }

    #[test]
    fn test_dependent_dispose_is_idempotent() {
        let (count, underlying) = counting();
        let rc = RefCountDisposable::new(underlying);
        let dep = rc.dependent().unwrap();

        dep.dispose();
        dep.dispose();
        assert_eq!(rc.dependent_count(), 0);

        rc.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_primary_dispose_is_idempotent() {
        let (count, underlying) = counting();
        let rc = RefCountDisposable::new(underlying);

        rc.dispose();
        rc.dispose();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
