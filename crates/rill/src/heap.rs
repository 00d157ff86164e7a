//! Slot arena for script values.
//!
//! Every script value lives in a [`Heap`]: a `Vec` of slots plus a free list
//! of recycled indices, keyed by copyable [`HeapId`] handles. Each slot
//! carries a reference count; [`Heap::inc_ref`] / [`Heap::dec_ref`] adjust
//! it, and a count reaching zero frees the slot (recursively releasing the
//! counts held by its child map) and recycles the index.
//!
//! Rust's `Drop` cannot decrement heap counts because it has no access to
//! the heap, so owning handles implement [`DropWithHeap`] and must be
//! released explicitly on every code path. The `ref-count-panic` feature
//! (see `reference.rs`) turns a forgotten release into a panic in tests.

use std::{cell::Cell, collections::BTreeMap, fmt};

use crate::{
    resource::{NoLimitTracker, ResourceError, ResourceTracker},
    value::Var,
};

/// Index of a value slot in the heap. Stable for the lifetime of the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId(usize);

impl HeapId {
    #[inline]
    fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Slot {
    refcount: Cell<usize>,
    var: Var,
}

/// Arena of script values with reference-counted slots.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker = NoLimitTracker> {
    entries: Vec<Option<Slot>>,
    free_list: Vec<HeapId>,
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub(crate) fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
        }
    }

    pub(crate) fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Allocates a new slot with a reference count of 1, owned by the caller.
    ///
    /// Returns `Err(ResourceError)` if the allocation would exceed the
    /// tracker's configured limits.
    pub(crate) fn allocate(&mut self, var: Var) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| var.estimate_size())?;

        let slot = Slot {
            refcount: Cell::new(1),
            var,
        };
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(slot);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(slot));
            id
        };
        Ok(id)
    }

    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub(crate) fn get(&self, id: HeapId) -> &Var {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: value already freed")
            .var
    }

    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut Var {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: value already freed")
            .var
    }

    /// Increments the reference count of a live slot.
    ///
    /// Uses interior mutability for the count so only shared heap access is
    /// required; this avoids borrow conflicts during child and scope lookups.
    pub(crate) fn inc_ref(&self, id: HeapId) {
        let slot = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: value already freed");
        slot.refcount.set(slot.refcount.get() + 1);
    }

    /// Decrements the reference count and frees the value (plus the counts
    /// held on its children) once it hits zero.
    ///
    /// Freed slot ids go on the free list for reuse. Child cleanup recurses;
    /// cyclic structures cannot reach this path because a cycle keeps every
    /// participant's count above zero.
    pub(crate) fn dec_ref(&mut self, id: HeapId) {
        let var = {
            let slot = self
                .entries
                .get_mut(id.index())
                .expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: value already freed");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                return;
            }
            slot.take().expect("Heap::dec_ref: value already freed").var
        };

        self.tracker.on_free(|| var.estimate_size());
        for (_, child) in var.into_children() {
            self.dec_ref(child);
        }
        self.free_list.push(id);
    }

    /// Current reference count of a live slot. Diagnostic.
    pub(crate) fn ref_count(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.refcount.get())
    }

    /// Takes a snapshot of heap occupancy.
    pub(crate) fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for slot in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_type.entry(slot.var.kind_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
        }
    }
}

/// Snapshot of heap state at a point in time.
///
/// Captures object counts by type plus slot occupancy. Useful for asserting
/// that scripts release what they allocate; compare two snapshots with
/// [`HeapStats::diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live values on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live values by type name, ordered for stable display.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

impl HeapStats {
    /// Computes the difference between `self` ("before") and `other` ("after").
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let mut objects_by_type_delta = BTreeMap::new();
        for (&name, &count) in &self.objects_by_type {
            let after = other.objects_by_type.get(name).copied().unwrap_or(0);
            objects_by_type_delta.insert(name, after as isize - count as isize);
        }
        for (&name, &count) in &other.objects_by_type {
            objects_by_type_delta.entry(name).or_insert(count as isize);
        }
        HeapDiff {
            live_objects_delta: other.live_objects as isize - self.live_objects as isize,
            total_slots_delta: other.total_slots as isize - self.total_slots as isize,
            objects_by_type_delta,
        }
    }
}

/// Difference between two heap snapshots. Positive deltas mean growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDiff {
    /// Change in live value count (`after - before`).
    pub live_objects_delta: isize,
    /// Change in total slot count.
    pub total_slots_delta: isize,
    /// Per-type deltas for types present in either snapshot.
    pub objects_by_type_delta: BTreeMap<&'static str, isize>,
}

impl HeapDiff {
    /// Returns `true` when no live-object or per-type change occurred.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_objects_delta == 0 && self.objects_by_type_delta.values().all(|&v| v == 0)
    }
}

impl fmt::Display for HeapDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "HeapDiff: no changes");
        }
        write!(
            f,
            "HeapDiff: {:+} live objects, {:+} slots",
            self.live_objects_delta, self.total_slots_delta
        )?;
        for (&type_name, &delta) in &self.objects_by_type_delta {
            if delta != 0 {
                write!(f, "\n  {type_name}: {delta:+}")?;
            }
        }
        Ok(())
    }
}

/// Types that hold heap reference counts and need heap access to release them.
///
/// Must be called on every code path, success and failure alike; early return or error
/// propagation alike; a missed call leaks a reference count.
pub(crate) trait DropWithHeap<T: ResourceTracker> {
    /// Consume `self` and decrement the reference counts it holds.
    fn drop_with_heap(self, heap: &mut Heap<T>);
}

impl<T: ResourceTracker> DropWithHeap<T> for HeapId {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        heap.dec_ref(self);
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Option<U> {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Vec<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Var;

    #[test]
    fn slots_are_recycled() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = heap.allocate(Var::int(1)).unwrap();
        let b = heap.allocate(Var::int(2)).unwrap();
        assert_eq!(heap.stats().live_objects, 2);

        heap.dec_ref(a);
        assert_eq!(heap.stats().live_objects, 1);
        assert_eq!(heap.stats().free_slots, 1);

        let c = heap.allocate(Var::int(3)).unwrap();
        assert_eq!(heap.stats().total_slots, 2, "freed slot should be reused");
        heap.dec_ref(b);
        heap.dec_ref(c);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn shared_values_survive_one_release() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = heap.allocate(Var::str("shared".to_owned())).unwrap();
        heap.inc_ref(a);
        assert_eq!(heap.ref_count(a), 2);
        heap.dec_ref(a);
        assert_eq!(heap.get(a).as_string_scalar(), "shared");
        heap.dec_ref(a);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn diff_reports_growth() {
        let mut heap = Heap::new(NoLimitTracker);
        let before = heap.stats();
        let id = heap.allocate(Var::int(7)).unwrap();
        let diff = before.diff(&heap.stats());
        assert_eq!(diff.live_objects_delta, 1);
        assert_eq!(diff.objects_by_type_delta.get("Int"), Some(&1));
        heap.dec_ref(id);
        assert!(before.diff(&heap.stats()).is_empty());
    }
}
