mod compilation_error;
mod runtime_error;
mod runtime_error_data;
mod stack_trace;
mod syntax_error;

pub use compilation_error::{CompilationError, CompilationErrors};
pub use runtime_error::RuntimeError;
pub use runtime_error_data::RuntimeErrorData;
pub use stack_trace::{StackTrace, StackTraceFrame};
pub use syntax_error::SyntaxError;
