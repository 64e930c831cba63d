use super::heap::{HeapRef, Storage, TableKey};
use super::value::{FromValue, IntoValue, Value};
use super::vm::VmContext;
use crate::errors::{RuntimeError, RuntimeErrorData};

/// An anchored handle to a Table. Tables never dispatch metamethods, so all
/// access is raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef(pub(crate) HeapRef<TableKey>);

impl TableRef {
    #[inline]
    pub fn id(&self) -> u64 {
        Storage::key_to_id(self.0.key().data(), Storage::TABLES_TAG)
    }

    pub fn get<K: IntoValue, V: FromValue>(
        &self,
        key: K,
        ctx: &mut VmContext,
    ) -> Result<V, RuntimeError> {
        let key = key.into_value(ctx)?.to_stack_value();

        let Some(table) = ctx.vm.heap.get_table(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        let value = table.get(key);
        let value = Value::from_stack_value(&mut ctx.vm.heap, value);

        V::from_value(value, ctx)
    }

    pub fn set<K: IntoValue, V: IntoValue>(
        &self,
        key: K,
        value: V,
        ctx: &mut VmContext,
    ) -> Result<(), RuntimeError> {
        let key = key.into_value(ctx)?;
        let value = value.into_value(ctx)?;

        // invalid keys stored in the heap would poison later reads
        key.test_validity(&ctx.vm.heap)?;
        value.test_validity(&ctx.vm.heap)?;

        let Some(table) = ctx.vm.heap.get_table_mut(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        let original_size = table.heap_size();
        table.set(key.to_stack_value(), value.to_stack_value());
        let new_size = table.heap_size();

        ctx.vm
            .gc
            .modify_used_memory(new_size as isize - original_size as isize);

        Ok(())
    }

    /// Length of the dense list part.
    pub fn list_len(&self, ctx: &VmContext) -> Result<usize, RuntimeError> {
        let Some(table) = ctx.vm.heap.get_table(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        Ok(table.list_len())
    }

    /// Steps the table in insertion order; `Nil` starts, `None` means done.
    pub fn next<P: IntoValue, K: FromValue, V: FromValue>(
        &self,
        previous_key: P,
        ctx: &mut VmContext,
    ) -> Result<Option<(K, V)>, RuntimeError> {
        let previous_key = previous_key.into_value(ctx)?.to_stack_value();

        let Some(table) = ctx.vm.heap.get_table(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        let Some((k, v)) = table.next(previous_key) else {
            return Ok(None);
        };

        let k = Value::from_stack_value(&mut ctx.vm.heap, k);
        let v = Value::from_stack_value(&mut ctx.vm.heap, v);

        let k = K::from_value(k, ctx)?;
        let v = V::from_value(v, ctx)?;

        Ok(Some((k, v)))
    }
}
