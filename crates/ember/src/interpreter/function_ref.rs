use super::heap::{Heap, HeapRef, Storage, StorageKey};
use super::multi::{FromMulti, IntoMulti};
use super::value_stack::StackValue;
use super::vm::VmContext;
use crate::errors::{RuntimeError, RuntimeErrorData};

/// An anchored handle to a callable: a closure or a native function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef(pub(crate) HeapRef<StorageKey>);

impl FunctionRef {
    #[inline]
    pub fn id(&self) -> u64 {
        match self.0.key() {
            StorageKey::Closure(key) => Storage::key_to_id(key.data(), Storage::CLOSURES_TAG),
            StorageKey::NativeFunction(key) => {
                Storage::key_to_id(key.data(), Storage::NATIVE_FUNCTIONS_TAG)
            }
            _ => unreachable!(),
        }
    }

    pub(crate) fn to_stack_value(&self) -> StackValue {
        match self.0.key() {
            StorageKey::Closure(key) => StackValue::Closure(key),
            StorageKey::NativeFunction(key) => StackValue::NativeFunction(key),
            _ => {
                crate::debug_unreachable!();
                #[cfg(not(debug_assertions))]
                StackValue::Nil
            }
        }
    }

    pub(crate) fn test_validity(&self, heap: &Heap) -> Result<(), RuntimeError> {
        let valid = match self.0.key() {
            StorageKey::Closure(key) => heap.get_closure(key).is_some(),
            StorageKey::NativeFunction(key) => heap.get_native_fn(key).is_some(),
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(RuntimeErrorData::InvalidRef.into())
        }
    }

    pub fn call<A: IntoMulti, R: FromMulti>(
        &self,
        args: A,
        ctx: &mut VmContext,
    ) -> Result<R, RuntimeError> {
        self.test_validity(&ctx.vm.heap)?;

        let args = args.into_multi(ctx)?;
        let callable = self.to_stack_value();

        let multi = ctx.vm.call_stack_value(callable, args)?;
        R::from_multi(multi, ctx)
    }
}
