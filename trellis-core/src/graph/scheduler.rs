//! Update Scheduler
//!
//! In batched mode, watcher notifications are not executed inside the write
//! that caused them. Instead the watcher is queued here, and
//! `Runtime::flush` drains the queue.
//!
//! # Algorithm
//!
//! 1. `enqueue` records a watcher id once; duplicates are ignored while the
//!    id is still pending.
//! 2. A flush is a sequence of passes. Each pass takes the whole pending
//!    queue, so a watcher runs at most once per pass.
//! 3. Watchers queued while a pass runs (including ones that already ran in
//!    it) form the next pass.
//! 4. Per-watcher run counts are kept for the whole flush; a watcher that
//!    exceeds the limit is reported as a circular update and dropped.

use std::collections::HashMap;

use indexmap::IndexSet;

use super::node::DerivationId;

#[derive(Debug, Default)]
pub struct UpdateScheduler {
    queue: IndexSet<DerivationId>,
    flushing: bool,
    run_counts: HashMap<DerivationId, u32>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a derivation. Returns false if it was already pending.
    pub fn enqueue(&mut self, id: DerivationId) -> bool {
        self.queue.insert(id)
    }

    /// Drop a pending derivation (used on teardown).
    pub fn cancel(&mut self, id: DerivationId) -> bool {
        self.queue.shift_remove(&id)
    }

    pub fn is_pending(&self, id: DerivationId) -> bool {
        self.queue.contains(&id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Mark the start of a flush. Returns false if one is already running.
    pub fn begin_flush(&mut self) -> bool {
        if self.flushing {
            return false;
        }
        self.flushing = true;
        self.run_counts.clear();
        true
    }

    pub fn end_flush(&mut self) {
        self.flushing = false;
        self.run_counts.clear();
    }

    /// Take every pending id, in queue order, as one pass.
    pub fn take_pass(&mut self) -> Vec<DerivationId> {
        self.queue.drain(..).collect()
    }

    /// Count a run of `id` in the current flush. Returns false once the
    /// count exceeds `limit`.
    pub fn record_run(&mut self, id: DerivationId, limit: u32) -> bool {
        let count = self.run_counts.entry(id).or_insert(0);
        *count += 1;
        *count <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> DerivationId {
        DerivationId::from_parts(n, 0)
    }

    #[test]
    fn enqueue_deduplicates() {
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.enqueue(id(1)));
        assert!(!scheduler.enqueue(id(1)));
        assert!(scheduler.enqueue(id(2)));
        assert_eq!(scheduler.pending(), 2);
    }

    #[test]
    fn pass_preserves_queue_order() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.enqueue(id(3));
        scheduler.enqueue(id(1));
        scheduler.enqueue(id(2));

        assert_eq!(scheduler.take_pass(), vec![id(3), id(1), id(2)]);
        assert_eq!(scheduler.pending(), 0);

        // Requeue after the pass was taken lands in the next pass.
        assert!(scheduler.enqueue(id(3)));
        assert_eq!(scheduler.take_pass(), vec![id(3)]);
    }

    #[test]
    fn cancel_removes_pending() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.enqueue(id(1));
        scheduler.enqueue(id(2));
        assert!(scheduler.cancel(id(1)));
        assert!(!scheduler.is_pending(id(1)));
        assert_eq!(scheduler.take_pass(), vec![id(2)]);
    }

    #[test]
    fn flush_is_not_reentrant() {
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.begin_flush());
        assert!(!scheduler.begin_flush());
        scheduler.end_flush();
        assert!(scheduler.begin_flush());
    }

    #[test]
    fn run_limit_is_per_flush() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.begin_flush();
        assert!(scheduler.record_run(id(1), 2));
        assert!(scheduler.record_run(id(1), 2));
        assert!(!scheduler.record_run(id(1), 2));
        scheduler.end_flush();

        scheduler.begin_flush();
        assert!(scheduler.record_run(id(1), 2));
    }
}
