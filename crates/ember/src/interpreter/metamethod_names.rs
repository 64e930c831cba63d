use super::heap::{GarbageCollector, Heap};
use super::StringRef;

/// The metamethod names recognized by the VM, interned once at startup.
pub struct MetamethodNames {
    /// Constructor, called when a prototype Object is called like a function
    pub init: StringRef,
    /// Field read fallback `object.key`
    pub index: StringRef,
    /// Field write hook `object.key =`
    pub newindex: StringRef,
    /// Table of per-field getters
    pub getter: StringRef,
    /// Table of per-field setters
    pub setter: StringRef,
    /// Yields an iterator state for `for ... in`
    pub iter: StringRef,
    /// The per-step function invoked by the iterator protocol
    pub next: StringRef,
    /// String conversion, used by concatenation and `tostring`
    pub tostring: StringRef,
    /// Equality override for `==` between distinct Objects
    pub equal: StringRef,
}

impl MetamethodNames {
    pub(crate) fn new(gc: &mut GarbageCollector, heap: &mut Heap) -> Self {
        Self {
            init: StringRef(heap.intern_bytes_to_ref(gc, b"__init")),
            index: StringRef(heap.intern_bytes_to_ref(gc, b"__index")),
            newindex: StringRef(heap.intern_bytes_to_ref(gc, b"__newindex")),
            getter: StringRef(heap.intern_bytes_to_ref(gc, b"__getter")),
            setter: StringRef(heap.intern_bytes_to_ref(gc, b"__setter")),
            iter: StringRef(heap.intern_bytes_to_ref(gc, b"__iter")),
            next: StringRef(heap.intern_bytes_to_ref(gc, b"__next")),
            tostring: StringRef(heap.intern_bytes_to_ref(gc, b"__tostring")),
            equal: StringRef(heap.intern_bytes_to_ref(gc, b"__equal")),
        }
    }
}
