//! FIFO of items with no current improving move, gated by a change tag.
//!
//! A natural first design stores `tag`/`valid` as closures injected at
//! construction, captured over a shared `Lookup` reference. Rust's borrow
//! checker doesn't like a queue holding a closure that aliases the very
//! `Lookup` the engine needs `&mut` access to elsewhere, so `current_tag` is
//! threaded through `dequeue` as a per-call closure instead -- same
//! semantics (a tag snapshotted at enqueue time, read lazily at dequeue
//! time), just not held across the queue's whole lifetime.

use std::collections::VecDeque;

pub struct HoldoutQueue<T> {
    primary: VecDeque<(T, u64)>,
    leftover: VecDeque<(T, u64)>,
}

impl<T> Default for HoldoutQueue<T> {
    fn default() -> Self {
        HoldoutQueue {
            primary: VecDeque::new(),
            leftover: VecDeque::new(),
        }
    }
}

impl<T> HoldoutQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `(item, tag)` at the end of the primary queue.
    pub fn enqueue(&mut self, item: T, tag: u64) {
        self.primary.push_back((item, tag));
    }

    /// Pops from the front of the primary queue until an entry's current tag
    /// (via `current_tag`) has advanced past its snapshot; invalid entries
    /// are pushed to the back of leftover, preserving relative order.
    pub fn dequeue(&mut self, mut current_tag: impl FnMut(&T) -> u64) -> Option<T> {
        while let Some((item, tag)) = self.primary.pop_front() {
            if current_tag(&item) > tag {
                return Some(item);
            }
            self.leftover.push_back((item, tag));
        }
        None
    }

    /// Swaps primary and leftover. Used by the engine after draining the
    /// heap, to retry held-out items whose world may have changed.
    pub fn recycle(&mut self) {
        std::mem::swap(&mut self.primary, &mut self.leftover);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holdout_validity_gate() {
        let mut q: HoldoutQueue<&str> = HoldoutQueue::new();
        let mut changes: std::collections::HashMap<&str, u64> = Default::default();
        changes.insert("D", 0);

        q.enqueue("D", 0);
        assert_eq!(q.dequeue(|d| changes[d]), None);

        q.recycle();
        assert_eq!(q.dequeue(|d| changes[d]), None);

        *changes.get_mut("D").unwrap() += 1;
        q.recycle();
        assert_eq!(q.dequeue(|d| changes[d]), Some("D"));
    }

    #[test]
    fn fifo_order_preserved_across_recycle() {
        let mut q: HoldoutQueue<i32> = HoldoutQueue::new();
        q.enqueue(1, 0);
        q.enqueue(2, 0);
        q.enqueue(3, 0);
        // Nothing valid yet; all three land in leftover, in order.
        assert_eq!(q.dequeue(|_| 0), None);
        q.recycle();
        // Only item 2's tag has advanced; 1 is re-queued ahead of 3 before it.
        assert_eq!(q.dequeue(|x| if *x == 2 { 1 } else { 0 }), Some(2));
        // 1 and 3 are still invalid and preserved, in original order, in
        // this call's leftover.
        assert_eq!(q.dequeue(|_| 0), None);
        q.recycle();
        assert_eq!(q.dequeue(|_| 1), Some(1));
        assert_eq!(q.dequeue(|_| 1), Some(3));
    }
}
