use super::chunk::Chunk;
use super::heap::{FnKey, UpValueKey};
use std::rc::Rc;
use thin_vec::ThinVec;

/// A compiled function prototype. Immutable after compilation; closures
/// share it through an `Rc`.
pub(crate) struct FnProto {
    pub(crate) module: Rc<str>,
    pub(crate) name: Rc<str>,
    pub(crate) arity: u8,
    pub(crate) variadic: bool,
    pub(crate) up_value_count: u8,
    pub(crate) chunk: Chunk,
}

impl FnProto {
    pub(crate) fn heap_size(&self) -> usize {
        // labels: weak count + strong count + data, each
        let labels = (std::mem::size_of::<usize>() * 2 + self.module.len())
            + (std::mem::size_of::<usize>() * 2 + self.name.len());

        labels + self.chunk.heap_size()
    }
}

/// A callable binding of a prototype and its captured upvalues. Closures,
/// not raw prototypes, are what the VM calls.
#[derive(Clone)]
pub(crate) struct Closure {
    pub(crate) fn_key: FnKey,
    pub(crate) proto: Rc<FnProto>,
    pub(crate) up_values: ThinVec<UpValueKey>,
}

impl Closure {
    pub(crate) fn heap_size(&self) -> usize {
        self.up_values.len() * std::mem::size_of::<UpValueKey>()
    }
}
