use super::ref_counter::CounterRef;

/// A key paired with a live marker: while any `HeapRef` for a key exists,
/// the garbage collector treats that key as a root.
#[derive(Clone)]
pub(crate) struct HeapRef<K> {
    pub(super) key: K,
    pub(super) counter_ref: CounterRef,
}

impl<K: Copy> HeapRef<K> {
    pub(crate) fn key(&self) -> K {
        self.key
    }
}

impl<K: PartialEq> PartialEq for HeapRef<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Eq> Eq for HeapRef<K> {}

impl<K: std::fmt::Debug> std::fmt::Debug for HeapRef<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.key)
    }
}

impl<K: std::hash::Hash> std::hash::Hash for HeapRef<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
