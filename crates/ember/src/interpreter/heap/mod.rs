mod garbage_collector;
mod heap_ref;
mod ref_counter;

pub use garbage_collector::GarbageCollectorConfig;
pub(crate) use garbage_collector::{GarbageCollector, GcRoots};
pub(crate) use heap_ref::HeapRef;
pub(crate) use ref_counter::RefCounter;

use super::byte_string::ByteString;
use super::function::{Closure, FnProto};
use super::native_function::NativeFunction;
use super::object::Object;
use super::table::Table;
use super::up_values::UpValue;
use crate::{BuildFastHasher, FastHashMap};
use indexmap::IndexMap;
use std::rc::Rc;

#[derive(Default)]
pub(crate) struct Storage {
    pub(super) byte_strings: slotmap::SlotMap<BytesKey, ByteString>,
    pub(super) tables: slotmap::SlotMap<TableKey, Table>,
    pub(super) objects: slotmap::SlotMap<ObjectKey, Object>,
    pub(super) functions: slotmap::SlotMap<FnKey, Rc<FnProto>>,
    pub(super) closures: slotmap::SlotMap<ClosureKey, Closure>,
    pub(super) native_functions: slotmap::SlotMap<NativeFnKey, NativeFunction>,
    pub(super) up_values: slotmap::SlotMap<UpValueKey, UpValue>,
}

impl Storage {
    pub(crate) const BYTE_STRINGS_TAG: u64 = 0;
    pub(crate) const TABLES_TAG: u64 = 1;
    pub(crate) const OBJECTS_TAG: u64 = 2;
    pub(crate) const FUNCTIONS_TAG: u64 = 3;
    pub(crate) const CLOSURES_TAG: u64 = 4;
    pub(crate) const NATIVE_FUNCTIONS_TAG: u64 = 5;

    pub(crate) fn key_to_id(key: slotmap::KeyData, tag: u64) -> u64 {
        let mask = u32::MAX as u64;
        (key.as_ffi() & mask) | (tag << 32)
    }

    fn keys(&self) -> impl Iterator<Item = StorageKey> + '_ {
        self.byte_strings
            .keys()
            .map(StorageKey::from)
            .chain(self.tables.keys().map(StorageKey::from))
            .chain(self.objects.keys().map(StorageKey::from))
            .chain(self.functions.keys().map(StorageKey::from))
            .chain(self.closures.keys().map(StorageKey::from))
            .chain(self.native_functions.keys().map(StorageKey::from))
            .chain(self.up_values.keys().map(StorageKey::from))
    }
}

macro_rules! object_key_struct {
    ($name:ident, $storage_variant:ident) => {
        slotmap::new_key_type! {
            pub(crate) struct $name;
        }

        impl $name {
            pub(crate) fn as_ffi(self) -> u64 {
                self.0.as_ffi()
            }

            pub(crate) fn from_ffi(n: u64) -> Self {
                Self(slotmap::KeyData::from_ffi(n))
            }

            #[allow(unused)]
            pub(crate) fn data(self) -> slotmap::KeyData {
                self.0
            }
        }

        impl From<$name> for StorageKey {
            fn from(key: $name) -> StorageKey {
                StorageKey::$storage_variant(key)
            }
        }

        impl From<&$name> for StorageKey {
            fn from(key: &$name) -> StorageKey {
                StorageKey::$storage_variant(*key)
            }
        }
    };
}

object_key_struct!(BytesKey, Bytes);
object_key_struct!(TableKey, Table);
object_key_struct!(ObjectKey, Object);
object_key_struct!(FnKey, Function);
object_key_struct!(ClosureKey, Closure);
object_key_struct!(NativeFnKey, NativeFunction);
object_key_struct!(UpValueKey, UpValue);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub(crate) enum StorageKey {
    Bytes(BytesKey),
    Table(TableKey),
    Object(ObjectKey),
    Function(FnKey),
    Closure(ClosureKey),
    NativeFunction(NativeFnKey),
    UpValue(UpValueKey),
}

pub(crate) struct Heap {
    pub(crate) storage: Storage,
    pub(crate) byte_strings: FastHashMap<ByteString, BytesKey>,
    pub(crate) ref_roots: IndexMap<StorageKey, RefCounter, BuildFastHasher>,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            storage: Storage::default(),
            byte_strings: Default::default(),
            ref_roots: Default::default(),
        }
    }

    pub(crate) fn contains(&self, key: StorageKey) -> bool {
        match key {
            StorageKey::Bytes(key) => self.storage.byte_strings.contains_key(key),
            StorageKey::Table(key) => self.storage.tables.contains_key(key),
            StorageKey::Object(key) => self.storage.objects.contains_key(key),
            StorageKey::Function(key) => self.storage.functions.contains_key(key),
            StorageKey::Closure(key) => self.storage.closures.contains_key(key),
            StorageKey::NativeFunction(key) => self.storage.native_functions.contains_key(key),
            StorageKey::UpValue(key) => self.storage.up_values.contains_key(key),
        }
    }

    /// Interns a byte sequence: creating a string that matches an existing
    /// one returns the existing key.
    pub(crate) fn intern_bytes(
        &mut self,
        gc: &mut GarbageCollector,
        bytes: &[u8],
    ) -> BytesKey {
        if let Some(&key) = self.byte_strings.get(bytes) {
            return key;
        }

        let string = ByteString::from(bytes);
        let key = self.storage.byte_strings.insert(string.clone());
        gc.modify_used_memory((string.heap_size() + std::mem::size_of_val(&string)) as _);
        self.byte_strings.insert(string, key);
        key
    }

    pub(crate) fn intern_bytes_to_ref(
        &mut self,
        gc: &mut GarbageCollector,
        bytes: &[u8],
    ) -> HeapRef<BytesKey> {
        let key = self.intern_bytes(gc, bytes);
        self.create_ref(key)
    }

    pub(crate) fn create_table(&mut self, gc: &mut GarbageCollector) -> TableKey {
        let table = Table::default();
        gc.modify_used_memory((table.heap_size() + std::mem::size_of::<Table>()) as _);

        self.storage.tables.insert(table)
    }

    pub(crate) fn create_object(
        &mut self,
        gc: &mut GarbageCollector,
        proto: Option<ObjectKey>,
    ) -> ObjectKey {
        let object = Object {
            proto,
            ..Default::default()
        };
        gc.modify_used_memory((object.heap_size() + std::mem::size_of::<Object>()) as _);

        self.storage.objects.insert(object)
    }

    pub(crate) fn store_fn_proto(
        &mut self,
        gc: &mut GarbageCollector,
        proto: FnProto,
    ) -> FnKey {
        gc.modify_used_memory((proto.heap_size() + std::mem::size_of::<FnProto>()) as _);

        self.storage.functions.insert(Rc::new(proto))
    }

    pub(crate) fn store_closure(
        &mut self,
        gc: &mut GarbageCollector,
        closure: Closure,
    ) -> ClosureKey {
        gc.modify_used_memory((closure.heap_size() + std::mem::size_of_val(&closure)) as _);

        self.storage.closures.insert(closure)
    }

    pub(crate) fn store_native_fn(
        &mut self,
        gc: &mut GarbageCollector,
        function: NativeFunction,
    ) -> NativeFnKey {
        gc.modify_used_memory(std::mem::size_of_val(&function) as _);

        self.storage.native_functions.insert(function)
    }

    pub(crate) fn store_up_value(
        &mut self,
        gc: &mut GarbageCollector,
        up_value: UpValue,
    ) -> UpValueKey {
        gc.modify_used_memory(up_value.heap_size() as _);

        self.storage.up_values.insert(up_value)
    }

    /// Anchors a key against collection for as long as the returned ref (or
    /// any clone) is alive.
    pub(crate) fn create_ref<K: Copy + Into<StorageKey>>(&mut self, key: K) -> HeapRef<K> {
        let storage_key = key.into();
        let counter_ref = match self.ref_roots.entry(storage_key) {
            indexmap::map::Entry::Occupied(entry) => entry.get().create_counter_ref(),
            indexmap::map::Entry::Vacant(entry) => {
                let ref_counter = RefCounter::default();
                let counter_ref = ref_counter.create_counter_ref();
                entry.insert(ref_counter);
                counter_ref
            }
        };

        HeapRef { key, counter_ref }
    }

    pub(crate) fn get_bytes(&self, key: BytesKey) -> Option<&ByteString> {
        self.storage.byte_strings.get(key)
    }

    pub(crate) fn get_table(&self, key: TableKey) -> Option<&Table> {
        self.storage.tables.get(key)
    }

    pub(crate) fn get_table_mut(&mut self, key: TableKey) -> Option<&mut Table> {
        self.storage.tables.get_mut(key)
    }

    pub(crate) fn get_object(&self, key: ObjectKey) -> Option<&Object> {
        self.storage.objects.get(key)
    }

    pub(crate) fn get_object_mut(&mut self, key: ObjectKey) -> Option<&mut Object> {
        self.storage.objects.get_mut(key)
    }

    pub(crate) fn get_fn_proto(&self, key: FnKey) -> Option<&Rc<FnProto>> {
        self.storage.functions.get(key)
    }

    pub(crate) fn get_closure(&self, key: ClosureKey) -> Option<&Closure> {
        self.storage.closures.get(key)
    }

    pub(crate) fn get_native_fn(&self, key: NativeFnKey) -> Option<&NativeFunction> {
        self.storage.native_functions.get(key)
    }

    pub(crate) fn get_up_value(&self, key: UpValueKey) -> Option<&UpValue> {
        self.storage.up_values.get(key)
    }

    pub(crate) fn get_up_value_mut(&mut self, key: UpValueKey) -> Option<&mut UpValue> {
        self.storage.up_values.get_mut(key)
    }
}
