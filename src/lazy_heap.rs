//! Max-priority queue over small identifiers, with lazy update/delete.
//!
//! `update` doesn't search-and-fix the heap in place: it tombstones the old
//! entry via a shared flag and pushes a fresh one, the usual "superseding
//! entry" trick for a `BinaryHeap` that needs decrease/increase-key support.
//! `Ord` on the entry compares key only, so the max-heap falls out of
//! `BinaryHeap`'s own max-heap default with no reversal needed. The
//! capacity-bounded prune-and-rebuild (`max_elems`, `prune`) exists because a
//! redistricting run updates the same handful of districts over and over, so
//! tombstones would otherwise accumulate without bound.

use std::cell::Cell;
use std::collections::BinaryHeap;
use std::hash::Hash;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::EngineError;

struct HeapEntry<Id, K> {
    key: K,
    id: Id,
    alive: Rc<Cell<bool>>,
}

impl<Id, K: PartialEq> PartialEq for HeapEntry<Id, K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<Id, K: Eq> Eq for HeapEntry<Id, K> {}
impl<Id, K: Ord> PartialOrd for HeapEntry<Id, K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<Id, K: Ord> Ord for HeapEntry<Id, K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// A max-heap keyed by `K`, identified by `Id`, supporting amortized
/// O(log n) `update`.
pub struct LazyHeap<Id: Eq + Hash + Clone, K: Ord + Clone> {
    heap: BinaryHeap<HeapEntry<Id, K>>,
    index: FxHashMap<Id, Rc<Cell<bool>>>,
    max_elems: Option<usize>,
}

impl<Id: Eq + Hash + Clone, K: Ord + Clone> LazyHeap<Id, K> {
    pub fn new(max_elems: Option<usize>) -> Self {
        LazyHeap {
            heap: BinaryHeap::new(),
            index: FxHashMap::default(),
            max_elems,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.index.contains_key(id)
    }

    /// Inserts `id` with a fresh node under `key`. If this would exceed
    /// `max_elems`, prunes tombstoned nodes first; if it's still full after
    /// pruning, fails with [`EngineError::HeapCapacity`].
    pub fn push(&mut self, id: Id, key: K) -> Result<(), EngineError> {
        if let Some(max) = self.max_elems {
            if self.heap.len() >= max {
                self.prune();
                if self.heap.len() >= max {
                    return Err(EngineError::HeapCapacity);
                }
            }
        }
        let alive = Rc::new(Cell::new(true));
        self.index.insert(id.clone(), alive.clone());
        self.heap.push(HeapEntry { key, id, alive });
        Ok(())
    }

    /// Removes and returns the top live id, skipping tombstoned nodes.
    /// Fails with [`EngineError::HeapEmpty`] once no live entries remain.
    pub fn pop(&mut self) -> Result<Id, EngineError> {
        while let Some(entry) = self.heap.pop() {
            if entry.alive.get() {
                self.index.remove(&entry.id);
                return Ok(entry.id);
            }
        }
        Err(EngineError::HeapEmpty)
    }

    /// Tombstones the previous node for `id` (if any) and pushes a fresh one
    /// under the new key.
    pub fn update(&mut self, id: Id, key: K) -> Result<(), EngineError> {
        if let Some(old) = self.index.get(&id) {
            old.set(false);
        }
        self.push(id, key)
    }

    fn prune(&mut self) {
        let survivors: Vec<_> = self.heap.drain().filter(|e| e.alive.get()).collect();
        self.heap = BinaryHeap::from(survivors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_returns_nonincreasing_order() {
        let mut heap: LazyHeap<&str, i32> = LazyHeap::new(None);
        heap.push("d1", 3).unwrap();
        heap.push("d2", 2).unwrap();
        heap.push("d3", 1).unwrap();
        heap.update("d3", 5).unwrap();

        assert_eq!(heap.pop().unwrap(), "d3");
        assert_eq!(heap.pop().unwrap(), "d1");
        assert_eq!(heap.pop().unwrap(), "d2");
        assert!(matches!(heap.pop(), Err(EngineError::HeapEmpty)));
    }

    #[test]
    fn update_at_capacity_prunes_its_own_tombstone_eagerly() {
        let mut heap: LazyHeap<i32, i32> = LazyHeap::new(Some(2));
        heap.push(1, 1).unwrap();
        heap.push(2, 2).unwrap();
        // The heap is already at capacity, so `update`'s internal `push`
        // prunes first; the just-tombstoned node for `1` is the only dead
        // one, so pruning makes room and the heap stays at two live nodes
        // rather than growing to three.
        heap.update(1, 10).unwrap();
        assert_eq!(heap.len(), 2);

        // Both remaining nodes are live, so a third distinct id still has
        // nothing to prune and still exceeds capacity.
        assert!(matches!(heap.push(3, 3), Err(EngineError::HeapCapacity)));

        assert_eq!(heap.pop().unwrap(), 1);
        assert_eq!(heap.pop().unwrap(), 2);
    }

    #[test]
    fn capacity_exceeded_after_pruning_is_fatal() {
        let mut heap: LazyHeap<i32, i32> = LazyHeap::new(Some(2));
        heap.push(1, 1).unwrap();
        heap.push(2, 2).unwrap();
        assert!(matches!(heap.push(3, 3), Err(EngineError::HeapCapacity)));
    }
}
