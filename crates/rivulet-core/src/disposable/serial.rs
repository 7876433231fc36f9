//! Mutable disposable slot with swap-and-dispose-old semantics.

use super::{Disposable, DisposableRef};
use parking_lot::Mutex;

struct SerialSlot {
    current: Option<DisposableRef>,
    disposed: bool,
}

/// Holds zero or one inner disposable; assigning a new one disposes the
/// previous one. Once the container is disposed, future assignments dispose
/// the incoming value and keep nothing.
pub struct SerialDisposable {
    slot: Mutex<SerialSlot>,
}

impl SerialDisposable {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(SerialSlot {
                current: None,
                disposed: false,
            }),
        }
    }

    /// Replaces the inner disposable, disposing the one it displaces.
    pub fn set(&self, inner: DisposableRef) {
        let old = {
            let mut slot = self.slot.lock();
            if slot.disposed {
                // Container is gone; the incoming value is released instead
                Some(inner)
            } else {
                slot.current.replace(inner)
            }
        };
        if let Some(old) = old {
            old.dispose();
        }
    }

    /// Returns the current inner disposable, if any.
    pub fn inner(&self) -> Option<DisposableRef> {
        self.slot.lock().current.clone()
    }
}

impl Default for SerialDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for SerialDisposable {
    fn dispose(&self) {
        let current = {
            let mut slot = self.slot.lock();
            if slot.disposed {
                return;
            }
            slot.disposed = true;
            slot.current.take()
        };
        if let Some(current) = current {
            current.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.slot.lock().disposed
    }
}
