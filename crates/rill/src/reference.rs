//! Named handles to heap values.
//!
//! A [`VarRef`] is what expression evaluation passes around: a target value
//! id, an optional name, and (for references that denote a live slot in a
//! parent's child map) the parent id and an `owned` flag. The handle holds
//! one reference count on its target (and one on its parent, when present),
//! so every `VarRef` must be released with [`VarRef::release`] or the
//! [`DropWithHeap`] impl on every code path. With the `ref-count-panic`
//! feature enabled, dropping an unreleased handle panics, which is how the
//! test suite catches leaked counts.

use crate::{
    error::{Exception, RunResult},
    heap::{DropWithHeap, Heap, HeapId},
    resource::ResourceTracker,
    value::Var,
};

/// A named, possibly slot-owning handle to a heap value.
#[derive(Debug)]
pub(crate) struct VarRef {
    name: Option<String>,
    target: HeapId,
    parent: Option<HeapId>,
    owned: bool,
    #[cfg(feature = "ref-count-panic")]
    released: bool,
}

impl VarRef {
    fn from_parts(name: Option<String>, target: HeapId, parent: Option<HeapId>, owned: bool) -> Self {
        Self {
            name,
            target,
            parent,
            owned,
            #[cfg(feature = "ref-count-panic")]
            released: false,
        }
    }

    /// Wraps a target id whose reference count the caller transfers in
    /// (typically straight from `Heap::allocate`). Anonymous and unowned.
    pub(crate) fn adopt(target: HeapId) -> Self {
        Self::from_parts(None, target, None, false)
    }

    /// A fresh transient reference to an existing value; increments its count.
    pub(crate) fn alias(heap: &Heap<impl ResourceTracker>, target: HeapId) -> Self {
        heap.inc_ref(target);
        Self::from_parts(None, target, None, false)
    }

    /// A reference denoting the live slot `parent.children[name]`;
    /// increments both counts.
    pub(crate) fn slot(heap: &Heap<impl ResourceTracker>, name: &str, parent: HeapId, target: HeapId) -> Self {
        heap.inc_ref(target);
        heap.inc_ref(parent);
        Self::from_parts(Some(name.to_owned()), target, Some(parent), true)
    }

    /// Attaches a name to an unowned reference (unresolved identifiers).
    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn id(&self) -> HeapId {
        self.target
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The id of the parent whose child map this reference denotes, if any.
    pub(crate) fn parent_id(&self) -> Option<HeapId> {
        self.parent
    }

    /// Whether this reference is the owning entry in its parent's child map.
    pub(crate) fn is_owned(&self) -> bool {
        self.owned
    }

    pub(crate) fn var<'h>(&self, heap: &'h Heap<impl ResourceTracker>) -> &'h Var {
        heap.get(self.target)
    }

    /// Repoints this reference, and for owning references the parent's
    /// slot, at `new_target`. The caller keeps its own count on
    /// `new_target`; the old target loses the counts it held here.
    pub(crate) fn reassign(&mut self, heap: &mut Heap<impl ResourceTracker>, new_target: HeapId) {
        if new_target == self.target {
            return;
        }
        let old = self.target;
        heap.inc_ref(new_target);
        if self.owned
            && let (Some(parent), Some(name)) = (self.parent, self.name.as_deref())
        {
            // add_child consumes one count and releases the slot's old one.
            heap.inc_ref(new_target);
            heap.add_child(parent, name, new_target);
        }
        self.target = new_target;
        // The old target keeps living if anything else still points at it.
        heap.dec_ref(old);
    }

    /// Promotes an unowned named reference to a slot of `scope` (used for
    /// implicit globals on assignment).
    pub(crate) fn promote(&mut self, heap: &mut Heap<impl ResourceTracker>, scope: HeapId) -> RunResult<()> {
        let Some(name) = self.name.clone() else {
            return Err(Exception::eval("Trying to assign to an un-named reference"));
        };
        heap.inc_ref(self.target);
        heap.add_child(scope, &name, self.target);
        heap.inc_ref(scope);
        if let Some(old_parent) = self.parent.replace(scope) {
            heap.dec_ref(old_parent);
        }
        self.owned = true;
        Ok(())
    }

    /// Releases the counts held by this reference.
    pub(crate) fn release(mut self, heap: &mut Heap<impl ResourceTracker>) {
        #[cfg(feature = "ref-count-panic")]
        {
            self.released = true;
        }
        heap.dec_ref(self.target);
        if let Some(parent) = self.parent.take() {
            heap.dec_ref(parent);
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for VarRef {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.release(heap);
    }
}

/// Catches reference handles that are dropped without heap-aware cleanup.
/// Only enabled with the `ref-count-panic` feature; used to verify the
/// evaluator's release discipline in tests.
#[cfg(feature = "ref-count-panic")]
impl Drop for VarRef {
    fn drop(&mut self) {
        if !self.released && !std::thread::panicking() {
            panic!("VarRef to {:?} dropped without release() - this is a reference counting bug", self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn slot_reassign_moves_both_counts() {
        let mut heap = Heap::new(NoLimitTracker);
        let parent = heap.allocate(Var::object()).unwrap();
        let old = heap.allocate(Var::int(1)).unwrap();
        heap.add_child(parent, "x", old);

        let mut slot = heap.find_child(parent, "x").unwrap().unwrap();
        assert!(slot.is_owned());
        assert_eq!(slot.name(), Some("x"));

        let new = heap.allocate(Var::int(2)).unwrap();
        slot.reassign(&mut heap, new);
        heap.dec_ref(new);
        slot.release(&mut heap);

        assert_eq!(heap.get(heap.get(parent).children()["x"]).as_int(), 2);
        heap.dec_ref(parent);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn promote_installs_a_global() {
        let mut heap = Heap::new(NoLimitTracker);
        let root = heap.allocate(Var::object()).unwrap();
        let value = heap.allocate(Var::undefined()).unwrap();
        let mut unbound = VarRef::adopt(value).with_name("g");
        assert!(!unbound.is_owned());

        unbound.promote(&mut heap, root).unwrap();
        assert!(unbound.is_owned());
        assert!(heap.get(root).children().contains_key("g"));

        unbound.release(&mut heap);
        heap.dec_ref(root);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn unnamed_promotion_fails() {
        let mut heap = Heap::new(NoLimitTracker);
        let root = heap.allocate(Var::object()).unwrap();
        let value = heap.allocate(Var::int(3)).unwrap();
        let mut anon = VarRef::adopt(value);
        assert!(anon.promote(&mut heap, root).is_err());
        anon.release(&mut heap);
        heap.dec_ref(root);
    }
}
