mod ember_compiler;
mod ember_lexer;
mod ember_parsing;
mod ember_token;
pub mod std;

pub use ember_compiler::Compiler;
pub use ember_lexer::EmberLexer;
pub use ember_parsing::parse_number;
pub use ember_token::{EmberToken, EmberTokenLabel};

/// Converts an integral, in-range float to a usable array index.
pub fn coerce_index(float: f64) -> Option<usize> {
    if float.fract() != 0.0 || float < 0.0 || float >= (1u64 << 53) as f64 {
        return None;
    }

    Some(float as usize)
}
