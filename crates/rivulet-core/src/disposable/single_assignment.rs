//! Atomic single-assignment disposable slot.

use super::{Disposable, DisposableRef};
use crate::error::CoreError;
use parking_lot::Mutex;

enum Slot {
    Empty,
    Set(DisposableRef),
    Disposed,
}

/// Holds zero or one inner disposable; assigning twice is an error.
///
/// Disposing before assignment is legal and makes the eventual assignment
/// dispose its value immediately. This is the primitive that lets a schedule
/// operation return a handle before the work item's own cleanup exists.
pub struct SingleAssignmentDisposable {
    slot: Mutex<Slot>,
}

impl SingleAssignmentDisposable {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Assigns the inner disposable.
    ///
    /// If the slot was already disposed, `inner` is disposed immediately and
    /// the call still succeeds. A second assignment fails with
    /// [`CoreError::AlreadyAssigned`].
    pub fn set(&self, inner: DisposableRef) -> Result<(), CoreError> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Empty => {
                *slot = Slot::Set(inner);
                Ok(())
            }
            Slot::Set(_) => Err(CoreError::AlreadyAssigned),
            Slot::Disposed => {
                drop(slot);
                inner.dispose();
                Ok(())
            }
        }
    }

    /// Returns the currently assigned inner disposable, if any.
    pub fn inner(&self) -> Option<DisposableRef> {
        match &*self.slot.lock() {
            Slot::Set(d) => Some(d.clone()),
            _ => None,
        }
    }
}

impl Default for SingleAssignmentDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for SingleAssignmentDisposable {
    fn dispose(&self) {
        let prev = {
            let mut slot = self.slot.lock();
            std::mem::replace(&mut *slot, Slot::Disposed)
        };
        // Inner disposal happens outside the lock
        if let Slot::Set(d) = prev {
            d.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Disposed)
    }
}
