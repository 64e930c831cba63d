use super::heap::{HeapRef, ObjectKey, Storage};
use super::value::{FromValue, IntoValue, Value};
use super::vm::VmContext;
use crate::errors::{RuntimeError, RuntimeErrorData};

/// An anchored handle to an Object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef(pub(crate) HeapRef<ObjectKey>);

impl ObjectRef {
    #[inline]
    pub fn id(&self) -> u64 {
        Storage::key_to_id(self.0.key().data(), Storage::OBJECTS_TAG)
    }

    /// Reads an own field, without prototype traversal or metamethods.
    pub fn raw_get<K: IntoValue, V: FromValue>(
        &self,
        key: K,
        ctx: &mut VmContext,
    ) -> Result<V, RuntimeError> {
        let key = key.into_value(ctx)?.to_stack_value();

        let Some(object) = ctx.vm.heap.get_object(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        let value = object.get(key);
        let value = Value::from_stack_value(&mut ctx.vm.heap, value);

        V::from_value(value, ctx)
    }

    /// Writes an own field, without metamethods.
    pub fn raw_set<K: IntoValue, V: IntoValue>(
        &self,
        key: K,
        value: V,
        ctx: &mut VmContext,
    ) -> Result<(), RuntimeError> {
        let key = key.into_value(ctx)?;
        let value = value.into_value(ctx)?;

        key.test_validity(&ctx.vm.heap)?;
        value.test_validity(&ctx.vm.heap)?;

        let Some(object) = ctx.vm.heap.get_object_mut(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        let original_size = object.heap_size();
        object.set(key.to_stack_value(), value.to_stack_value());
        let new_size = object.heap_size();

        ctx.vm
            .gc
            .modify_used_memory(new_size as isize - original_size as isize);

        Ok(())
    }

    /// Reads a field with the full lookup: own fields, prototype chain,
    /// `__getter`, `__index`.
    pub fn get<K: IntoValue, V: FromValue>(
        &self,
        key: K,
        ctx: &mut VmContext,
    ) -> Result<V, RuntimeError> {
        let key = key.into_value(ctx)?.to_stack_value();

        let receiver = super::value_stack::StackValue::Object(self.0.key());
        let value = ctx.vm.get_field(receiver, key)?;
        let value = Value::from_stack_value(&mut ctx.vm.heap, value);

        V::from_value(value, ctx)
    }

    pub fn proto(&self, ctx: &mut VmContext) -> Result<Option<ObjectRef>, RuntimeError> {
        let Some(object) = ctx.vm.heap.get_object(self.0.key()) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        let proto = object.proto;

        Ok(proto.map(|key| ObjectRef(ctx.vm.heap.create_ref(key))))
    }

    /// Reassigns the prototype. Errors when the new chain would pass through
    /// this object.
    pub fn set_proto(
        &self,
        proto: Option<&ObjectRef>,
        ctx: &mut VmContext,
    ) -> Result<(), RuntimeError> {
        let target = self.0.key();
        let proto_key = proto.map(|proto| proto.0.key());

        if let Some(proto_key) = proto_key {
            if ctx.vm.heap.get_object(proto_key).is_none() {
                return Err(RuntimeErrorData::InvalidRef.into());
            }

            ctx.vm.check_proto_cycle(target, proto_key)?;
        }

        let Some(object) = ctx.vm.heap.get_object_mut(target) else {
            return Err(RuntimeErrorData::InvalidRef.into());
        };

        object.proto = proto_key;

        Ok(())
    }
}
