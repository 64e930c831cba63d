use super::{Heap, StorageKey};
use crate::interpreter::execution::CallContext;
use crate::interpreter::heap::{ObjectKey, TableKey, UpValueKey};
use crate::interpreter::up_values::UpValue;
use crate::interpreter::value_stack::{StackValue, ValueStack};
use crate::FastHashSet;

/// Configuration for the garbage collector.
#[derive(Clone)]
pub struct GarbageCollectorConfig {
    /// used_memory_after_collection * pause / 100 = threshold for the next
    /// collection.
    ///
    /// Default is 200
    pub pause: usize,
}

impl Default for GarbageCollectorConfig {
    fn default() -> Self {
        Self { pause: 200 }
    }
}

const INITIAL_THRESHOLD: usize = 1024 * 1024;

/// Everything reachable at collection time. Objects are allocated live;
/// collection only runs between instructions, and never while frozen.
pub(crate) struct GcRoots<'a> {
    pub(crate) value_stack: &'a ValueStack,
    pub(crate) call_stack: &'a [CallContext],
    pub(crate) open_up_values: &'a [(usize, UpValueKey)],
    pub(crate) globals: TableKey,
    pub(crate) proto_registry: &'a [Option<ObjectKey>],
    pub(crate) extra: &'a [StorageKey],
}

pub(crate) struct GarbageCollector {
    used_memory: usize,
    next_collection: usize,
    freeze_count: usize,
    pub(crate) config: GarbageCollectorConfig,
    /// marked keys survive the sweep; gray is the pending traversal queue
    marked: FastHashSet<StorageKey>,
    gray: Vec<StorageKey>,
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self {
            used_memory: 0,
            next_collection: INITIAL_THRESHOLD,
            freeze_count: 0,
            config: Default::default(),
            marked: Default::default(),
            gray: Default::default(),
        }
    }
}

impl GarbageCollector {
    pub(crate) fn used_memory(&self) -> usize {
        self.used_memory
    }

    pub(crate) fn modify_used_memory(&mut self, change: isize) {
        self.used_memory = (self.used_memory as isize + change).max(0) as usize;
    }

    /// Freezing is recursive: a count, not a flag.
    pub(crate) fn freeze(&mut self) {
        self.freeze_count += 1;
    }

    pub(crate) fn unfreeze(&mut self) {
        self.freeze_count = self.freeze_count.saturating_sub(1);
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.freeze_count > 0
    }

    pub(crate) fn should_collect(&self) -> bool {
        self.freeze_count == 0 && self.used_memory >= self.next_collection
    }

    pub(crate) fn collect(&mut self, heap: &mut Heap, roots: GcRoots) {
        self.mark_roots(heap, roots);

        while let Some(key) = self.gray.pop() {
            self.traverse(heap, key);
        }

        self.sweep(heap);

        self.marked.clear();
        self.next_collection = (self.used_memory * self.config.pause / 100)
            .max(INITIAL_THRESHOLD);
    }

    fn mark_roots(&mut self, heap: &mut Heap, roots: GcRoots) {
        // embedder anchors; drop the entries nothing holds anymore
        heap.ref_roots.retain(|_, counter| counter.count() > 0);

        let anchored: Vec<StorageKey> = heap.ref_roots.keys().copied().collect();
        for key in anchored {
            self.mark_key(key);
        }

        for value in roots.value_stack.iter() {
            self.mark_value(*value);
        }

        for call in roots.call_stack {
            self.mark_key(StorageKey::Closure(call.closure));

            if let Some(object_key) = call.constructed {
                self.mark_key(StorageKey::Object(object_key));
            }
        }

        for &(_, up_value_key) in roots.open_up_values {
            self.mark_key(StorageKey::UpValue(up_value_key));
        }

        self.mark_key(StorageKey::Table(roots.globals));

        for proto in roots.proto_registry.iter().flatten() {
            self.mark_key(StorageKey::Object(*proto));
        }

        for &key in roots.extra {
            self.mark_key(key);
        }
    }

    fn mark_value(&mut self, value: StackValue) {
        if let Some(key) = value.as_storage_key() {
            self.mark_key(key);
        }
    }

    fn mark_key(&mut self, key: StorageKey) {
        if self.marked.insert(key) {
            self.gray.push(key);
        }
    }

    fn traverse(&mut self, heap: &Heap, key: StorageKey) {
        match key {
            StorageKey::Bytes(_) | StorageKey::NativeFunction(_) => {}
            StorageKey::Table(key) => {
                let Some(table) = heap.get_table(key) else {
                    crate::debug_unreachable!();
                    #[cfg(not(debug_assertions))]
                    return;
                };

                for value in &table.list {
                    self.mark_value(*value);
                }

                for (map_key, value) in &table.map {
                    self.mark_value(map_key.into());
                    self.mark_value(*value);
                }
            }
            StorageKey::Object(key) => {
                let Some(object) = heap.get_object(key) else {
                    crate::debug_unreachable!();
                    #[cfg(not(debug_assertions))]
                    return;
                };

                if let Some(proto) = object.proto {
                    self.mark_key(StorageKey::Object(proto));
                }

                for (map_key, value) in &object.fields {
                    self.mark_value(map_key.into());
                    self.mark_value(*value);
                }
            }
            StorageKey::Function(key) => {
                let Some(proto) = heap.get_fn_proto(key) else {
                    crate::debug_unreachable!();
                    #[cfg(not(debug_assertions))]
                    return;
                };

                for constant in &proto.chunk.constants {
                    self.mark_value(*constant);
                }
            }
            StorageKey::Closure(key) => {
                let Some(closure) = heap.get_closure(key) else {
                    crate::debug_unreachable!();
                    #[cfg(not(debug_assertions))]
                    return;
                };

                self.mark_key(StorageKey::Function(closure.fn_key));

                for up_value_key in &closure.up_values {
                    self.mark_key(StorageKey::UpValue(*up_value_key));
                }
            }
            StorageKey::UpValue(key) => {
                let Some(up_value) = heap.get_up_value(key) else {
                    crate::debug_unreachable!();
                    #[cfg(not(debug_assertions))]
                    return;
                };

                // open upvalues point into the stack, which is its own root
                if let UpValue::Closed(value) = up_value {
                    self.mark_value(*value);
                }
            }
        }
    }

    fn sweep(&mut self, heap: &mut Heap) {
        let dead: Vec<StorageKey> = heap
            .storage
            .keys()
            .filter(|key| !self.marked.contains(key))
            .collect();

        for key in dead {
            match key {
                StorageKey::Bytes(key) => {
                    let Some(bytes) = heap.storage.byte_strings.remove(key) else {
                        continue;
                    };
                    // interned strings are weak roots: evict on collection
                    heap.byte_strings.remove(&bytes);
                    self.modify_used_memory(
                        -((std::mem::size_of_val(&bytes) + bytes.heap_size()) as isize),
                    );
                }
                StorageKey::Table(key) => {
                    let Some(table) = heap.storage.tables.remove(key) else {
                        continue;
                    };
                    self.modify_used_memory(
                        -((std::mem::size_of_val(&table) + table.heap_size()) as isize),
                    );
                }
                StorageKey::Object(key) => {
                    let Some(object) = heap.storage.objects.remove(key) else {
                        continue;
                    };
                    self.modify_used_memory(
                        -((std::mem::size_of_val(&object) + object.heap_size()) as isize),
                    );
                }
                StorageKey::Function(key) => {
                    let Some(proto) = heap.storage.functions.remove(key) else {
                        continue;
                    };
                    self.modify_used_memory(
                        -((std::mem::size_of::<crate::interpreter::function::FnProto>()
                            + proto.heap_size()) as isize),
                    );
                }
                StorageKey::Closure(key) => {
                    let Some(closure) = heap.storage.closures.remove(key) else {
                        continue;
                    };
                    self.modify_used_memory(
                        -((std::mem::size_of_val(&closure) + closure.heap_size()) as isize),
                    );
                }
                StorageKey::NativeFunction(key) => {
                    let Some(function) = heap.storage.native_functions.remove(key) else {
                        continue;
                    };
                    self.modify_used_memory(-(std::mem::size_of_val(&function) as isize));
                }
                StorageKey::UpValue(key) => {
                    let Some(up_value) = heap.storage.up_values.remove(key) else {
                        continue;
                    };
                    self.modify_used_memory(-(up_value.heap_size() as isize));
                }
            }
        }
    }
}
