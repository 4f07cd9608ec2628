//! Change-tracked value holders.
//!
//! [`Tracked`] is the generic dirty-bit holder: it remembers the last value
//! an owner committed and reports dirty whenever the current value differs.
//! [`TrackedCounter`] is its lock-free `u32` counterpart for frame counters,
//! where concurrent requests race to advance the same value and mutation
//! must be compare-and-set rather than read-modify-write under a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// A value paired with its last committed state.
///
/// `set` only touches the current value; `accept_changes` commits it and
/// `rollback` discards it. Immediately after construction, accept, or
/// rollback the holder reports clean.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    current: T,
    committed: T,
}

impl<T: Clone + PartialEq> Tracked<T> {
    /// Create a clean holder.
    pub fn new(value: T) -> Self {
        Self {
            current: value.clone(),
            committed: value,
        }
    }

    /// Current (possibly uncommitted) value.
    pub const fn get(&self) -> &T {
        &self.current
    }

    /// Last committed value.
    pub const fn committed(&self) -> &T {
        &self.committed
    }

    /// Update the current value without committing it.
    pub fn set(&mut self, value: T) {
        self.current = value;
    }

    /// True when the current value differs from the committed one.
    pub fn is_dirty(&self) -> bool {
        self.current != self.committed
    }

    /// Make the current value the new committed value.
    pub fn accept_changes(&mut self) {
        self.committed = self.current.clone();
    }

    /// Discard the current value, reverting to the committed one.
    pub fn rollback(&mut self) {
        self.current = self.committed.clone();
    }
}

/// Lock-free change-tracked `u32` for frame counters.
///
/// Same commit/rollback contract as [`Tracked`], with mutation through
/// atomic compare-and-set so concurrent requests for one device can never
/// interleave a read-modify-write.
#[derive(Debug)]
pub struct TrackedCounter {
    current: AtomicU32,
    committed: AtomicU32,
}

impl TrackedCounter {
    /// Create a clean counter.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            current: AtomicU32::new(value),
            committed: AtomicU32::new(value),
        }
    }

    /// Current (possibly uncommitted) value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }

    /// Last committed value.
    #[must_use]
    pub fn committed(&self) -> u32 {
        self.committed.load(Ordering::SeqCst)
    }

    /// Overwrite the current value without committing (reset path).
    pub fn set(&self, value: u32) {
        self.current.store(value, Ordering::SeqCst);
    }

    /// Move the current value forward to `value` if it is ahead of the
    /// present one. Returns whether the counter moved. Concurrent callers
    /// converge on the maximum.
    pub fn advance_to(&self, value: u32) -> bool {
        self.current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (value > current).then_some(value)
            })
            .is_ok()
    }

    /// Increment the current value, returning the new value. Each caller
    /// observes a distinct result.
    pub fn increment(&self) -> u32 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True when the current value differs from the committed one.
    pub fn is_dirty(&self) -> bool {
        self.value() != self.committed()
    }

    /// How far the current value has advanced past the committed one.
    /// Zero when the counter was reset below its committed baseline.
    #[must_use]
    pub fn pending_delta(&self) -> u32 {
        self.value().saturating_sub(self.committed())
    }

    /// Make the current value the new committed value.
    pub fn accept_changes(&self) {
        self.committed.store(self.value(), Ordering::SeqCst);
    }

    /// Discard the current value, reverting to the committed one.
    pub fn rollback(&self) {
        self.current.store(self.committed(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn tracked_is_clean_after_construction() {
        let field = Tracked::new(5u32);
        assert!(!field.is_dirty());
        assert_eq!(*field.get(), 5);
        assert_eq!(*field.committed(), 5);
    }

    #[test]
    fn set_dirties_until_accept() {
        let mut field = Tracked::new(1u32);
        field.set(2);
        assert!(field.is_dirty());
        field.accept_changes();
        assert!(!field.is_dirty());
        assert_eq!(*field.committed(), 2);
    }

    #[test]
    fn set_back_to_committed_is_clean() {
        let mut field = Tracked::new(1u32);
        field.set(2);
        field.set(1);
        assert!(!field.is_dirty());
    }

    #[test]
    fn rollback_restores_last_accepted() {
        let mut field = Tracked::new(String::from("a"));
        field.set(String::from("b"));
        field.accept_changes();
        field.set(String::from("c"));
        field.rollback();
        assert!(!field.is_dirty());
        assert_eq!(field.get(), "b");
    }

    /// Replays an arbitrary op sequence against a reference model: dirty iff
    /// current differs from last accepted, and rollback restores exactly the
    /// last accepted value.
    #[derive(Debug, Clone)]
    enum Op {
        Set(u32),
        Accept,
        Rollback,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u32>().prop_map(Op::Set),
            Just(Op::Accept),
            Just(Op::Rollback),
        ]
    }

    proptest! {
        #[test]
        fn tracked_laws_hold_for_any_sequence(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut field = Tracked::new(0u32);
            let mut model_current = 0u32;
            let mut model_committed = 0u32;

            for op in ops {
                match op {
                    Op::Set(v) => {
                        field.set(v);
                        model_current = v;
                    }
                    Op::Accept => {
                        field.accept_changes();
                        model_committed = model_current;
                    }
                    Op::Rollback => {
                        field.rollback();
                        model_current = model_committed;
                    }
                }
                prop_assert_eq!(*field.get(), model_current);
                prop_assert_eq!(*field.committed(), model_committed);
                prop_assert_eq!(field.is_dirty(), model_current != model_committed);
            }
        }
    }

    #[test]
    fn counter_advance_only_moves_forward() {
        let counter = TrackedCounter::new(10);
        assert!(counter.advance_to(12));
        assert!(!counter.advance_to(11));
        assert!(!counter.advance_to(12));
        assert_eq!(counter.value(), 12);
        assert!(counter.is_dirty());
        assert_eq!(counter.pending_delta(), 2);
    }

    #[test]
    fn counter_rollback_restores_committed() {
        let counter = TrackedCounter::new(3);
        counter.advance_to(9);
        counter.rollback();
        assert_eq!(counter.value(), 3);
        assert!(!counter.is_dirty());
    }

    #[test]
    fn counter_reset_below_baseline_has_zero_delta() {
        let counter = TrackedCounter::new(100);
        counter.set(0);
        assert!(counter.is_dirty());
        assert_eq!(counter.pending_delta(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_increments_yield_distinct_values() {
        let counter = Arc::new(TrackedCounter::new(0));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move { counter.increment() }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.expect("task"));
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 32);
        assert_eq!(counter.value(), 32);
    }
}
