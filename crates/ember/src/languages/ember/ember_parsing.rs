use super::{EmberToken, EmberTokenLabel};
use crate::errors::SyntaxError;
use std::borrow::Cow;

/// Decodes a string literal token into its byte content, resolving escapes.
///
/// Expects a token produced by the lexer, quotes included.
pub(crate) fn parse_string<'source>(
    source: &'source str,
    token: EmberToken<'source>,
) -> Result<Cow<'source, [u8]>, SyntaxError<EmberTokenLabel>> {
    let bytes_slice = &token.content.as_bytes()[1..token.content.len() - 1];

    if !bytes_slice.contains(&b'\\') {
        return Ok(Cow::Borrowed(bytes_slice));
    }

    let mut bytes_vec = Vec::with_capacity(bytes_slice.len());
    let mut i = 0;

    while i < bytes_slice.len() {
        let b = bytes_slice[i];

        if b != b'\\' {
            bytes_vec.push(b);
            i += 1;
            continue;
        }

        i += 1;

        let Some(&escaped) = bytes_slice.get(i) else {
            break;
        };

        match escaped {
            b'a' => bytes_vec.push(7),
            b'b' => bytes_vec.push(8),
            b'f' => bytes_vec.push(12),
            b'n' => bytes_vec.push(b'\n'),
            b'r' => bytes_vec.push(b'\r'),
            b't' => bytes_vec.push(b'\t'),
            b'v' => bytes_vec.push(11),
            b'0' => bytes_vec.push(0),
            b'\\' | b'"' | b'\'' => bytes_vec.push(escaped),
            _ => {
                return Err(SyntaxError::new_unexpected_character(
                    source,
                    token.offset + i,
                ));
            }
        }

        i += 1;
    }

    Ok(Cow::Owned(bytes_vec))
}

/// Parses a decimal number with optional fraction and exponent. Trims input.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();

    if s.is_empty() {
        return None;
    }

    // reject the permissive forms f64::from_str allows (inf, nan, hex)
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }

    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::ember::EmberLexer;

    #[test]
    fn string_parsing() {
        let source = r#""\a \b \f \n \r \t \v \\ \" \'""#;
        let expected = b"\x07 \x08 \x0C \x0A \x0D \x09 \x0B \\ \" '";

        let lexer = EmberLexer::default();
        let mut token_iter = lexer.lex(source);
        let string = parse_string(source, token_iter.next().unwrap().unwrap()).unwrap();

        assert_eq!(&*string, expected);
    }

    #[test]
    fn plain_strings_borrow() {
        let source = r#""hello""#;

        let lexer = EmberLexer::default();
        let mut token_iter = lexer.lex(source);
        let string = parse_string(source, token_iter.next().unwrap().unwrap()).unwrap();

        assert!(matches!(string, Cow::Borrowed(b"hello")));
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number("3"), Some(3.0));
        assert_eq!(parse_number("345"), Some(345.0));
        assert_eq!(parse_number("3."), Some(3.0));
        assert_eq!(parse_number("3.1416"), Some(3.1416));
        assert_eq!(parse_number("314.16e-2"), Some(314.16e-2));
        assert_eq!(parse_number("0.31416E1"), Some(0.31416E1));
        assert_eq!(parse_number(" -1 "), Some(-1.0));
        assert_eq!(parse_number("+2.5"), Some(2.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("0x10"), None);
        assert_eq!(parse_number(""), None);
    }
}
