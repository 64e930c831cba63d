use crate::interpreter::{ByteString, TypeName};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorData {
    /// A script or embedder supplied error value.
    ByteString(ByteString),
    InvalidRef,
    InvalidInternalState,
    StackOverflow,
    CallDepthExceeded,
    MetamethodDepthExceeded,
    PrototypeChainTooLong,
    PrototypeCycle,
    InvalidCall(TypeName),
    MissingConstructor(TypeName),
    InvalidArithmetic(TypeName),
    InvalidCompare(TypeName, TypeName),
    AttemptToConcat(TypeName),
    AttemptToIndex(TypeName),
    NotIterable(TypeName),
    NoLength(TypeName),
    ExpectedType {
        expected: TypeName,
        received: TypeName,
    },
    BadArgument {
        position: usize,
        reason: Box<RuntimeErrorData>,
    },
    WrongArgumentCount {
        expected: usize,
        received: usize,
    },
    OutOfBounds,
}

impl std::fmt::Display for RuntimeErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ByteString(bytes) => std::fmt::Display::fmt(bytes, f),
            Self::InvalidRef => write!(f, "reference to a collected or foreign value"),
            Self::InvalidInternalState => write!(f, "invalid internal state"),
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::CallDepthExceeded => write!(f, "call stack overflow"),
            Self::MetamethodDepthExceeded => write!(f, "metamethod recursion too deep"),
            Self::PrototypeChainTooLong => write!(f, "prototype chain too long"),
            Self::PrototypeCycle => write!(f, "prototype assignment would create a cycle"),
            Self::InvalidCall(type_name) => {
                write!(f, "attempt to call a {} value", type_name)
            }
            Self::MissingConstructor(type_name) => {
                write!(f, "attempt to construct from a {} with no __init", type_name)
            }
            Self::InvalidArithmetic(type_name) => {
                write!(f, "attempt to perform arithmetic on a {} value", type_name)
            }
            Self::InvalidCompare(type_a, type_b) => {
                write!(f, "attempt to compare {} with {}", type_a, type_b)
            }
            Self::AttemptToConcat(type_name) => {
                write!(f, "attempt to concatenate a {} value", type_name)
            }
            Self::AttemptToIndex(type_name) => {
                write!(f, "attempt to index a {} value", type_name)
            }
            Self::NotIterable(type_name) => {
                write!(f, "attempt to iterate a {} value", type_name)
            }
            Self::NoLength(type_name) => {
                write!(f, "attempt to take the length of a {} value", type_name)
            }
            Self::ExpectedType { expected, received } => {
                write!(f, "expected {}, received {}", expected, received)
            }
            Self::BadArgument { position, reason } => {
                write!(f, "bad argument #{} ({})", position, reason)
            }
            Self::WrongArgumentCount { expected, received } => {
                write!(f, "expected {} arguments, got {}", expected, received)
            }
            Self::OutOfBounds => write!(f, "index out of bounds"),
        }
    }
}
