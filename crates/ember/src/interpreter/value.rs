use super::byte_string::ByteString;
use super::heap::Heap;
use super::value_stack::StackValue;
use super::vm::VmContext;
use super::{FunctionRef, ObjectRef, StringRef, TableRef};
use crate::errors::{RuntimeError, RuntimeErrorData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeName {
    Nil,
    Bool,
    Number,
    String,
    Table,
    Object,
    Function,
}

impl TypeName {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeName::Nil => "nil",
            TypeName::Bool => "boolean",
            TypeName::Number => "number",
            TypeName::String => "string",
            TypeName::Table => "table",
            TypeName::Object => "object",
            TypeName::Function => "function",
        }
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The embedder-facing value representation. Heap values are carried by
/// anchored refs, so holding a `Value` keeps its object alive.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(StringRef),
    Table(TableRef),
    Object(ObjectRef),
    Function(FunctionRef),
}

impl Default for Value {
    #[inline]
    fn default() -> Self {
        Self::Nil
    }
}

impl Value {
    #[inline]
    pub fn type_name(&self) -> TypeName {
        match self {
            Value::Nil => TypeName::Nil,
            Value::Bool(_) => TypeName::Bool,
            Value::Number(_) => TypeName::Number,
            Value::String(_) => TypeName::String,
            Value::Table(_) => TypeName::Table,
            Value::Object(_) => TypeName::Object,
            Value::Function(_) => TypeName::Function,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string_ref(&self) -> Option<&StringRef> {
        match self {
            Value::String(string_ref) => Some(string_ref),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table_ref(&self) -> Option<&TableRef> {
        match self {
            Value::Table(table_ref) => Some(table_ref),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object_ref(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object_ref) => Some(object_ref),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function_ref(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(function_ref) => Some(function_ref),
            _ => None,
        }
    }

    pub(crate) fn to_stack_value(&self) -> StackValue {
        match self {
            Value::Nil => StackValue::Nil,
            Value::Bool(b) => StackValue::Bool(*b),
            Value::Number(n) => StackValue::Number(*n),
            Value::String(string_ref) => StackValue::Bytes(string_ref.0.key()),
            Value::Table(table_ref) => StackValue::Table(table_ref.0.key()),
            Value::Object(object_ref) => StackValue::Object(object_ref.0.key()),
            Value::Function(function_ref) => function_ref.to_stack_value(),
        }
    }

    pub(crate) fn from_stack_value(heap: &mut Heap, value: StackValue) -> Self {
        use super::heap::StorageKey;

        match value {
            StackValue::Nil => Value::Nil,
            StackValue::Bool(b) => Value::Bool(b),
            StackValue::Number(n) => Value::Number(n),
            StackValue::Bytes(key) => Value::String(StringRef(heap.create_ref(key))),
            StackValue::Table(key) => Value::Table(TableRef(heap.create_ref(key))),
            StackValue::Object(key) => Value::Object(ObjectRef(heap.create_ref(key))),
            StackValue::Closure(key) => {
                Value::Function(FunctionRef(heap.create_ref(StorageKey::Closure(key))))
            }
            StackValue::NativeFunction(key) => {
                Value::Function(FunctionRef(heap.create_ref(StorageKey::NativeFunction(key))))
            }
            StackValue::Function(_) => {
                // raw prototypes never surface on the operand stack
                crate::debug_unreachable!();
                #[cfg(not(debug_assertions))]
                Value::Nil
            }
        }
    }

    pub(crate) fn test_validity(&self, heap: &Heap) -> Result<(), RuntimeError> {
        if self.to_stack_value().test_validity(heap) {
            Ok(())
        } else {
            Err(RuntimeErrorData::InvalidRef.into())
        }
    }
}

pub trait IntoValue {
    fn into_value(self, ctx: &mut VmContext) -> Result<Value, RuntimeError>;
}

pub trait FromValue: Sized {
    fn from_value(value: Value, ctx: &mut VmContext) -> Result<Self, RuntimeError>;
}

impl IntoValue for Value {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(self)
    }
}

impl FromValue for Value {
    #[inline]
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok(value)
    }
}

impl IntoValue for bool {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Bool(self))
    }
}

impl IntoValue for f64 {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Number(self))
    }
}

impl IntoValue for usize {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Number(self as f64))
    }
}

impl IntoValue for i64 {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Number(self as f64))
    }
}

impl IntoValue for &str {
    fn into_value(self, ctx: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::String(ctx.intern_string(self.as_bytes())))
    }
}

impl IntoValue for &[u8] {
    fn into_value(self, ctx: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::String(ctx.intern_string(self)))
    }
}

impl IntoValue for String {
    fn into_value(self, ctx: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::String(ctx.intern_string(self.as_bytes())))
    }
}

impl IntoValue for ByteString {
    fn into_value(self, ctx: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::String(ctx.intern_string(self.as_bytes())))
    }
}

impl IntoValue for StringRef {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::String(self))
    }
}

impl IntoValue for TableRef {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Table(self))
    }
}

impl IntoValue for ObjectRef {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Object(self))
    }
}

impl IntoValue for FunctionRef {
    #[inline]
    fn into_value(self, _: &mut VmContext) -> Result<Value, RuntimeError> {
        Ok(Value::Function(self))
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self, ctx: &mut VmContext) -> Result<Value, RuntimeError> {
        match self {
            Some(value) => value.into_value(ctx),
            None => Ok(Value::Nil),
        }
    }
}

fn type_error<T>(expected: TypeName, received: &Value) -> Result<T, RuntimeError> {
    Err(RuntimeErrorData::ExpectedType {
        expected,
        received: received.type_name(),
    }
    .into())
}

impl FromValue for bool {
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        Ok(value.is_truthy())
    }
}

impl FromValue for f64 {
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::Number(n) => Ok(n),
            _ => type_error(TypeName::Number, &value),
        }
    }
}

impl FromValue for usize {
    fn from_value(value: Value, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
        let n = f64::from_value(value, ctx)?;

        crate::languages::ember::coerce_index(n).ok_or_else(|| RuntimeErrorData::OutOfBounds.into())
    }
}

impl FromValue for ByteString {
    fn from_value(value: Value, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::String(string_ref) => Ok(string_ref.fetch(ctx)?.clone()),
            _ => type_error(TypeName::String, &value),
        }
    }
}

impl FromValue for StringRef {
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::String(string_ref) => Ok(string_ref),
            _ => type_error(TypeName::String, &value),
        }
    }
}

impl FromValue for TableRef {
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::Table(table_ref) => Ok(table_ref),
            _ => type_error(TypeName::Table, &value),
        }
    }
}

impl FromValue for ObjectRef {
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::Object(object_ref) => Ok(object_ref),
            _ => type_error(TypeName::Object, &value),
        }
    }
}

impl FromValue for FunctionRef {
    fn from_value(value: Value, _: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::Function(function_ref) => Ok(function_ref),
            _ => type_error(TypeName::Function, &value),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value, ctx: &mut VmContext) -> Result<Self, RuntimeError> {
        match value {
            Value::Nil => Ok(None),
            value => T::from_value(value, ctx).map(Some),
        }
    }
}
