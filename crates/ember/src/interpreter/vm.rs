use super::execution::CallContext;
use super::heap::{
    GarbageCollector, GarbageCollectorConfig, GcRoots, Heap, NativeFnKey, ObjectKey, StorageKey,
    TableKey, UpValueKey,
};
use super::metamethod_names::MetamethodNames;
use super::multi::MultiValue;
use super::native_function::NativeFunction;
use super::object::ObjectKind;
use super::value_stack::ValueStack;
use super::{FunctionRef, ObjectRef, StringRef, TableRef};
use crate::errors::RuntimeError;
use std::rc::Rc;

#[derive(Clone)]
pub struct VmLimits {
    /// Maximum operand stack height.
    pub stack_size: usize,
    /// Maximum call frame depth.
    pub call_depth: usize,
    /// Maximum metamethod re-entry depth.
    pub metamethod_depth: usize,
    /// Maximum prototype chain length walked during field lookup.
    pub proto_chain_depth: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            stack_size: 1_000_000,
            call_depth: 250,
            metamethod_depth: 100,
            proto_chain_depth: 100,
        }
    }
}

/// A single interpreter state. States share nothing: the heap, globals,
/// interned strings, and prototype registry are all per-state.
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) gc: GarbageCollector,
    pub(crate) value_stack: ValueStack,
    pub(crate) call_stack: Vec<CallContext>,
    /// Open upvalues sorted by stack slot; at most one per slot.
    pub(crate) open_up_values: Vec<(usize, UpValueKey)>,
    pub(crate) globals: TableKey,
    pub(crate) proto_registry: [Option<ObjectKey>; ObjectKind::COUNT],
    pub(crate) metamethod_names: Rc<MetamethodNames>,
    pub(crate) limits: VmLimits,
    /// Re-entry depth of calls made from inside instructions.
    pub(crate) meta_depth: usize,
    /// Shared `__next` implementation for bare-table iteration.
    pub(crate) table_next_fn: Option<NativeFnKey>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut gc = GarbageCollector::default();
        let mut heap = Heap::new();

        let metamethod_names = MetamethodNames::new(&mut gc, &mut heap);
        let globals = heap.create_table(&mut gc);

        Self {
            heap,
            gc,
            value_stack: ValueStack::default(),
            call_stack: Vec::new(),
            open_up_values: Vec::new(),
            globals,
            proto_registry: [None; ObjectKind::COUNT],
            metamethod_names: Rc::new(metamethod_names),
            limits: VmLimits::default(),
            meta_depth: 0,
            table_next_fn: None,
        }
    }

    #[inline]
    pub fn limits(&self) -> &VmLimits {
        &self.limits
    }

    #[inline]
    pub fn set_limits(&mut self, limits: VmLimits) {
        self.limits = limits;
    }

    #[inline]
    pub fn gc_used_memory(&self) -> usize {
        self.gc.used_memory()
    }

    #[inline]
    pub fn gc_config_mut(&mut self) -> &mut GarbageCollectorConfig {
        &mut self.gc.config
    }

    /// Runs a full mark/sweep cycle now, unless the collector is frozen.
    pub fn gc_collect(&mut self) {
        if self.gc.is_frozen() {
            return;
        }

        let extra: Vec<StorageKey> = self
            .table_next_fn
            .iter()
            .map(|&key| StorageKey::NativeFunction(key))
            .collect();

        self.gc.collect(
            &mut self.heap,
            GcRoots {
                value_stack: &self.value_stack,
                call_stack: &self.call_stack,
                open_up_values: &self.open_up_values,
                globals: self.globals,
                proto_registry: &self.proto_registry,
                extra: &extra,
            },
        );
    }

    /// Called at allocation sites; collections only happen between
    /// instructions, never mid-write.
    pub(crate) fn maybe_collect_garbage(&mut self) {
        if self.gc.should_collect() {
            self.gc_collect();
        }
    }

    #[inline]
    pub fn context(&mut self) -> VmContext<'_> {
        VmContext { vm: self }
    }
}

pub struct VmContext<'vm> {
    pub(crate) vm: &'vm mut Vm,
}

impl VmContext<'_> {
    #[inline]
    pub fn limits(&self) -> &VmLimits {
        self.vm.limits()
    }

    #[inline]
    pub fn set_limits(&mut self, limits: VmLimits) {
        self.vm.set_limits(limits);
    }

    #[inline]
    pub fn metamethod_names(&self) -> Rc<MetamethodNames> {
        self.vm.metamethod_names.clone()
    }

    #[inline]
    pub fn gc_used_memory(&self) -> usize {
        self.vm.gc_used_memory()
    }

    #[inline]
    pub fn gc_collect(&mut self) {
        self.vm.gc_collect()
    }

    #[inline]
    pub fn gc_config_mut(&mut self) -> &mut GarbageCollectorConfig {
        self.vm.gc_config_mut()
    }

    /// Postpones collections until the matching [VmContext::unfreeze_gc].
    /// Freezing is counted and may nest.
    #[inline]
    pub fn freeze_gc(&mut self) {
        self.vm.gc.freeze();
    }

    #[inline]
    pub fn unfreeze_gc(&mut self) {
        self.vm.gc.unfreeze();
    }

    pub fn intern_string(&mut self, bytes: &[u8]) -> StringRef {
        let gc = &mut self.vm.gc;
        let heap = &mut self.vm.heap;
        let heap_key = heap.intern_bytes(gc, bytes);
        let heap_ref = heap.create_ref(heap_key);

        // test after creating the ref to avoid collecting the new value
        self.vm.maybe_collect_garbage();

        StringRef(heap_ref)
    }

    pub fn create_table(&mut self) -> TableRef {
        let gc = &mut self.vm.gc;
        let heap = &mut self.vm.heap;
        let heap_key = heap.create_table(gc);
        let heap_ref = heap.create_ref(heap_key);

        self.vm.maybe_collect_garbage();

        TableRef(heap_ref)
    }

    pub fn create_object(&mut self) -> ObjectRef {
        let gc = &mut self.vm.gc;
        let heap = &mut self.vm.heap;
        let heap_key = heap.create_object(gc, None);
        let heap_ref = heap.create_ref(heap_key);

        self.vm.maybe_collect_garbage();

        ObjectRef(heap_ref)
    }

    pub fn create_function(
        &mut self,
        callback: impl Fn(MultiValue, &mut VmContext) -> Result<MultiValue, RuntimeError> + 'static,
    ) -> FunctionRef {
        let gc = &mut self.vm.gc;
        let heap = &mut self.vm.heap;
        let key = heap.store_native_fn(gc, NativeFunction::from(callback));
        let heap_ref = heap.create_ref(StorageKey::NativeFunction(key));

        self.vm.maybe_collect_garbage();

        FunctionRef(heap_ref)
    }

    /// The current globals table.
    pub fn globals(&mut self) -> TableRef {
        let key = self.vm.globals;
        TableRef(self.vm.heap.create_ref(key))
    }

    /// Replaces the globals table wholesale. In-flight frames see the new
    /// table on their next global access.
    pub fn set_globals(&mut self, globals: &TableRef) {
        self.vm.globals = globals.0.key();
    }

    /// The default prototype for a built-in kind, if registered.
    pub fn proto_object(&mut self, kind: ObjectKind) -> Option<ObjectRef> {
        let key = self.vm.proto_registry[kind.index()]?;
        Some(ObjectRef(self.vm.heap.create_ref(key)))
    }

    /// Sets the default prototype for a built-in kind.
    pub fn register_proto_object(&mut self, kind: ObjectKind, proto: Option<&ObjectRef>) {
        self.vm.proto_registry[kind.index()] = proto.map(|proto| proto.0.key());
    }
}
