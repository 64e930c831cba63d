pub mod ember;
mod lexer;
mod token;

pub use lexer::Lexer;
pub use token::Token;

/// Resolves a byte offset in `source` to a 1-indexed `(line, col)` pair.
pub fn line_and_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let consumed = &source[..offset];

    let line = consumed.bytes().filter(|&b| b == b'\n').count() + 1;
    let col = consumed
        .rfind('\n')
        .map(|i| consumed[i + 1..].chars().count() + 1)
        .unwrap_or_else(|| consumed.chars().count() + 1);

    (line, col)
}

#[cfg(test)]
mod tests {
    use super::line_and_col;

    #[test]
    fn lines_and_cols() {
        let source = "ab\ncde\n\nf";

        assert_eq!(line_and_col(source, 0), (1, 1));
        assert_eq!(line_and_col(source, 1), (1, 2));
        assert_eq!(line_and_col(source, 3), (2, 1));
        assert_eq!(line_and_col(source, 5), (2, 3));
        assert_eq!(line_and_col(source, 8), (4, 1));
    }
}
