mod api;
mod byte_string;
pub(crate) mod chunk;
pub(crate) mod execution;
pub(crate) mod function;
mod function_ref;
pub(crate) mod heap;
pub(crate) mod instruction;
mod metamethod_names;
mod multi;
pub(crate) mod native_function;
pub(crate) mod object;
mod object_ref;
mod string_ref;
pub(crate) mod table;
mod table_ref;
pub(crate) mod up_values;
pub(crate) mod value;
pub(crate) mod value_stack;
pub(crate) mod vm;

pub use byte_string::ByteString;
pub use function_ref::FunctionRef;
pub use heap::GarbageCollectorConfig;
pub use instruction::{ConstantIndex, OpCode, Register};
pub(crate) use instruction::INC_BIAS;
pub use metamethod_names::MetamethodNames;
pub use multi::{FromArg, FromArgs, FromMulti, IntoMulti, MultiValue};
pub use object::ObjectKind;
pub use object_ref::ObjectRef;
pub use string_ref::StringRef;
pub use table_ref::TableRef;
pub use value::{FromValue, IntoValue, TypeName, Value};
pub use vm::{Vm, VmContext, VmLimits};
