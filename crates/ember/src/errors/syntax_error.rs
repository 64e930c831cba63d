use crate::languages::{line_and_col, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError<Label> {
    // lexer
    UnexpectedCharacter {
        offset: usize,
        line: usize,
        col: usize,
    },
    UnterminatedString {
        offset: usize,
        line: usize,
        col: usize,
    },
    UnterminatedComment {
        offset: usize,
        line: usize,
        col: usize,
    },
    // parser
    UnexpectedToken {
        label: Label,
        offset: usize,
        line: usize,
        col: usize,
    },
    UnexpectedEof,
}

impl<Label> SyntaxError<Label> {
    pub fn new_unexpected_character(source: &str, offset: usize) -> Self {
        let (line, col) = line_and_col(source, offset);

        Self::UnexpectedCharacter { offset, line, col }
    }

    pub fn new_unterminated_string(source: &str, offset: usize) -> Self {
        let (line, col) = line_and_col(source, offset);

        Self::UnterminatedString { offset, line, col }
    }

    pub fn new_unterminated_comment(source: &str, offset: usize) -> Self {
        let (line, col) = line_and_col(source, offset);

        Self::UnterminatedComment { offset, line, col }
    }

    pub fn new_unexpected_token(source: &str, token: Token<Label>) -> Self {
        let (line, col) = line_and_col(source, token.offset);

        Self::UnexpectedToken {
            label: token.label,
            offset: token.offset,
            line,
            col,
        }
    }
}

impl<Label: std::fmt::Debug> std::fmt::Display for SyntaxError<Label> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::UnexpectedCharacter { line, col, .. } => {
                write!(f, "{}:{}: unexpected character", line, col)
            }
            Self::UnterminatedString { line, col, .. } => {
                write!(f, "{}:{}: unterminated string", line, col)
            }
            Self::UnterminatedComment { line, col, .. } => {
                write!(f, "{}:{}: unterminated block comment", line, col)
            }
            Self::UnexpectedToken { label, line, col, .. } => {
                write!(f, "{}:{}: unexpected {:?}", line, col, label)
            }
            Self::UnexpectedEof => write!(f, "unexpected eof"),
        }
    }
}

impl<Label: std::fmt::Debug> std::error::Error for SyntaxError<Label> {}
