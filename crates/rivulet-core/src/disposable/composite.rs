//! Thread-safe dynamic set of disposables.

use super::{Disposable, DisposableRef};
use parking_lot::Mutex;
use std::sync::Arc;

/// An unordered, resizable set of disposables that are released together.
///
/// Disposing the composite disposes every member and clears the set; adding
/// to an already-disposed composite disposes the added item immediately, so
/// no member can ever be left registered and un-disposed.
pub struct CompositeDisposable {
    // None means the container itself has been disposed
    members: Mutex<Option<Vec<DisposableRef>>>,
}

impl CompositeDisposable {
    /// Creates an empty composite.
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Some(Vec::new())),
        }
    }

    /// Creates a composite owning the given disposables.
    pub fn from_disposables<I>(items: I) -> Self
    where
        I: IntoIterator<Item = DisposableRef>,
    {
        Self {
            members: Mutex::new(Some(items.into_iter().collect())),
        }
    }

    /// Adds a member, or disposes it immediately if the composite is gone.
    pub fn add(&self, item: DisposableRef) {
        let rejected = {
            let mut members = self.members.lock();
            match members.as_mut() {
                Some(members) => {
                    members.push(item);
                    None
                }
                None => Some(item),
            }
        };
        if let Some(item) = rejected {
            item.dispose();
        }
    }

    /// Removes and disposes a member, by identity.
    ///
    /// Returns true if the item was present. Removing an absent item (or
    /// removing from a disposed composite) returns false and disposes
    /// nothing.
    pub fn remove(&self, item: &DisposableRef) -> bool {
        let found = {
            let mut members = self.members.lock();
            match members.as_mut() {
                Some(members) => {
                    match members.iter().position(|m| Arc::ptr_eq(m, item)) {
                        Some(index) => Some(members.swap_remove(index)),
                        None => None,
                    }
                }
                None => None,
            }
        };
        match found {
            Some(removed) => {
                removed.dispose();
                true
            }
            None => false,
        }
    }

    /// Number of members currently registered.
    pub fn len(&self) -> usize {
        self.members.lock().as_ref().map_or(0, Vec::len)
    }

    /// Returns true if no members are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disposes and removes every member, leaving the composite usable.
    pub fn clear(&self) {
        let drained = {
            let mut members = self.members.lock();
            members.as_mut().map(std::mem::take)
        };
        if let Some(drained) = drained {
            for member in drained {
                member.dispose();
            }
        }
    }
}

impl Default for CompositeDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for CompositeDisposable {
    fn dispose(&self) {
        let members = self.members.lock().take();
        if let Some(members) = members {
            for member in members {
                member.dispose();
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.members.lock().is_none()
    }
}
