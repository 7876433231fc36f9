//! Due-time ordered work-item queue.
//!
//! Every queue-driven scheduler (event loop, virtual time, trampoline) shares
//! this structure: a binary min-heap of [`ScheduledItem`]s ordered by
//! `(due, sequence)`. The sequence tie-break makes simultaneously-due items
//! run in submission order, which is what keeps virtual-time test traces
//! reproducible.

use crate::clock::Timestamp;
use crate::disposable::{Disposable, DisposableRef, SingleAssignmentDisposable};
use crate::scheduler::SchedulerRef;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// A unit of work: runs with the logical scheduler handle it was submitted
/// under, and returns the disposable guarding whatever it scheduled in turn.
pub type ScheduleFn = Box<dyn FnOnce(&SchedulerRef) -> DisposableRef + Send>;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Allocates the next submission sequence number.
pub(crate) fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A pending unit of work with its due time and tie-break sequence.
///
/// The item doubles as the cancellation handle its scheduler returns:
/// disposing it before invocation suppresses the work, and disposing it
/// afterwards releases whatever disposable the work returned (covering
/// recursive scheduling). Due time and sequence are fixed at creation; the
/// cancelled flag moves false to true exactly once.
pub struct ScheduledItem {
    due: Timestamp,
    sequence: u64,
    action: Mutex<Option<ScheduleFn>>,
    cancelled: AtomicBool,
    // Holds the disposable the action returns once it has run
    run_slot: SingleAssignmentDisposable,
}

impl ScheduledItem {
    /// Creates an item due at `due`.
    pub fn new(due: Timestamp, action: ScheduleFn) -> Arc<Self> {
        Arc::new(Self {
            due,
            sequence: next_sequence(),
            action: Mutex::new(Some(action)),
            cancelled: AtomicBool::new(false),
            run_slot: SingleAssignmentDisposable::new(),
        })
    }

    /// The item's due time.
    pub fn due(&self) -> Timestamp {
        self.due
    }

    /// The item's submission sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Runs the action unless the item has been cancelled.
    ///
    /// The cancelled flag is re-checked here, after any dequeue, so a cancel
    /// that lands between dequeue and invocation still suppresses execution.
    pub fn invoke(&self, scheduler: &SchedulerRef) {
        if self.cancelled.load(AtomicOrdering::Acquire) {
            return;
        }
        let action = self.action.lock().take();
        if let Some(action) = action {
            let result = action(scheduler);
            // A concurrent cancel may have disposed the slot already, in
            // which case the slot releases the result for us
            let _ = self.run_slot.set(result);
        }
    }
}

impl Disposable for ScheduledItem {
    fn dispose(&self) {
        if !self.cancelled.swap(true, AtomicOrdering::AcqRel) {
            self.action.lock().take();
            self.run_slot.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

// Reverse ordering for min-heap (earliest due time first, then lowest
// sequence)
struct QueueEntry(Arc<ScheduledItem>);

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.due == other.0.due && self.0.sequence == other.0.sequence
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .due
            .cmp(&self.0.due)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending items ordered by `(due, sequence)`.
///
/// Cancelled items are discarded lazily when they reach the front;
/// [`DueQueue::remove`] is the eager path for a caller that knows which
/// item it is cancelling.
pub struct DueQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl DueQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Inserts an item.
    pub fn enqueue(&mut self, item: Arc<ScheduledItem>) {
        self.heap.push(QueueEntry(item));
    }

    /// Returns the earliest pending item without removing it.
    pub fn peek(&mut self) -> Option<Arc<ScheduledItem>> {
        self.discard_cancelled();
        self.heap.peek().map(|entry| entry.0.clone())
    }

    /// Removes and returns the earliest pending item.
    pub fn dequeue(&mut self) -> Option<Arc<ScheduledItem>> {
        self.discard_cancelled();
        self.heap.pop().map(|entry| entry.0)
    }

    /// Removes a specific item, by identity. Returns true if it was queued.
    pub fn remove(&mut self, item: &Arc<ScheduledItem>) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| !Arc::ptr_eq(&entry.0, item));
        self.heap.len() != before
    }

    /// Removes and returns every queued item, pending or cancelled.
    pub fn drain(&mut self) -> Vec<Arc<ScheduledItem>> {
        std::mem::take(&mut self.heap)
            .into_iter()
            .map(|entry| entry.0)
            .collect()
    }

    /// Number of pending (non-cancelled) items.
    pub fn len(&self) -> usize {
        self.heap
            .iter()
            .filter(|entry| !entry.0.is_disposed())
            .count()
    }

    /// Returns true if no pending items remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if entry.0.is_disposed() {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}

impl Default for DueQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::empty;
    use std::time::Duration;

    fn item_at(millis: u64) -> Arc<ScheduledItem> {
        ScheduledItem::new(
            Timestamp::from_offset(Duration::from_millis(millis)),
            Box::new(|_| empty()),
        )
    }

    #[test]
    fn test_dequeue_in_due_order() {
        let mut queue = DueQueue::new();
        let a = item_at(30);
        let b = item_at(10);
        let c = item_at(20);
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());
        queue.enqueue(c.clone());

        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &b));
        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &c));
        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &a));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_fifo_among_equal_due_times() {
        let mut queue = DueQueue::new();
        let first = item_at(100);
        let second = item_at(100);
        queue.enqueue(second.clone());
        queue.enqueue(first.clone());

        // Submission order, not insertion order, breaks the tie
        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &first));
        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &second));
    }

    #[test]
    fn test_cancelled_items_are_skipped() {
        let mut queue = DueQueue::new();
        let a = item_at(10);
        let b = item_at(20);
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());

        a.dispose();
        assert_eq!(queue.len(), 1);
        assert!(Arc::ptr_eq(&queue.peek().unwrap(), &b));
    }

    #[test]
    fn test_remove_by_identity() {
        let mut queue = DueQueue::new();
        let a = item_at(10);
        let b = item_at(20);
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &b));
    }

    #[test]
    fn test_item_dispose_drops_unran_action() {
        let item = item_at(10);
        item.dispose();
        assert!(item.is_disposed());

        // Invoking a cancelled item is a no-op
        let scheduler: SchedulerRef =
            Arc::new(crate::scheduler::ImmediateScheduler::new());
        item.invoke(&scheduler);
    }
}
