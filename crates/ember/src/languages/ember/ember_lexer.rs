use super::{EmberToken, EmberTokenLabel};
use crate::errors::SyntaxError;
use crate::languages::Lexer;
use std::collections::HashMap;

pub struct EmberLexer {
    lexer: Lexer<EmberTokenLabel>,
}

impl Default for EmberLexer {
    fn default() -> Self {
        let reserved_words = HashMap::from([
            ("and", EmberTokenLabel::And),
            ("break", EmberTokenLabel::Break),
            ("continue", EmberTokenLabel::Continue),
            ("do", EmberTokenLabel::Do),
            ("else", EmberTokenLabel::Else),
            ("elseif", EmberTokenLabel::ElseIf),
            ("end", EmberTokenLabel::End),
            ("false", EmberTokenLabel::False),
            ("for", EmberTokenLabel::For),
            ("function", EmberTokenLabel::Function),
            ("if", EmberTokenLabel::If),
            ("in", EmberTokenLabel::In),
            ("local", EmberTokenLabel::Local),
            ("nil", EmberTokenLabel::Nil),
            ("not", EmberTokenLabel::Not),
            ("or", EmberTokenLabel::Or),
            ("proto", EmberTokenLabel::Proto),
            ("return", EmberTokenLabel::Return),
            ("then", EmberTokenLabel::Then),
            ("true", EmberTokenLabel::True),
            ("var", EmberTokenLabel::Var),
            ("while", EmberTokenLabel::While),
        ]);

        let other_tokens = [
            ("+", EmberTokenLabel::Plus),
            ("++", EmberTokenLabel::PlusPlus),
            ("-", EmberTokenLabel::Minus),
            ("--", EmberTokenLabel::MinusMinus),
            ("*", EmberTokenLabel::Star),
            ("/", EmberTokenLabel::Slash),
            ("%", EmberTokenLabel::Percent),
            ("!", EmberTokenLabel::Bang),
            ("#", EmberTokenLabel::Pound),
            ("==", EmberTokenLabel::CmpEqual),
            ("!=", EmberTokenLabel::CmpNotEqual),
            ("<=", EmberTokenLabel::CmpLessEqual),
            (">=", EmberTokenLabel::CmpGreaterEqual),
            ("<", EmberTokenLabel::CmpLess),
            (">", EmberTokenLabel::CmpGreater),
            ("=", EmberTokenLabel::Assign),
            ("(", EmberTokenLabel::OpenParen),
            (")", EmberTokenLabel::CloseParen),
            ("{", EmberTokenLabel::OpenCurly),
            ("}", EmberTokenLabel::CloseCurly),
            ("[", EmberTokenLabel::OpenBracket),
            ("]", EmberTokenLabel::CloseBracket),
            (";", EmberTokenLabel::SemiColon),
            (":", EmberTokenLabel::Colon),
            (",", EmberTokenLabel::Comma),
            (".", EmberTokenLabel::Dot),
            ("..", EmberTokenLabel::DoubleDot),
            ("...", EmberTokenLabel::TripleDot),
        ];

        let mut lexer = Lexer::default();

        for (token, label) in other_tokens {
            lexer.add_token(label, token.into());
        }

        // numbers: decimal with optional fraction and exponent
        lexer.add_lexer(|source, start| {
            let substr = &source[start..];

            let valid_start = substr.starts_with(|c: char| c.is_ascii_digit())
                || (substr.starts_with('.')
                    && substr.as_bytes().get(1).is_some_and(|c| c.is_ascii_digit()));

            if !valid_start {
                return None;
            }

            let mut last_byte = b' ';

            let len = substr
                .bytes()
                .take_while(|&b| {
                    let accept = match b {
                        b'.' => true,
                        b'0'..=b'9' | b'e' | b'E' => true,
                        b'-' | b'+' => matches!(last_byte, b'e' | b'E'),
                        _ => false,
                    };
                    last_byte = b;
                    accept
                })
                .count();

            Some(Ok((EmberTokenLabel::Numeral, len)))
        });

        // reserved words and names
        lexer.add_lexer(move |source, start| {
            let first_char = source[start..].chars().next()?;

            if !first_char.is_alphabetic() && first_char != '_' {
                return None;
            }

            let word_len = source[start + first_char.len_utf8()..]
                .find(|c: char| !c.is_alphanumeric() && c != '_')
                .unwrap_or(source.len() - start - first_char.len_utf8())
                + first_char.len_utf8();

            let word = &source[start..start + word_len];

            if let Some(label) = reserved_words.get(word) {
                Some(Ok((*label, word_len)))
            } else {
                Some(Ok((EmberTokenLabel::Name, word_len)))
            }
        });

        // double-quoted strings with escapes
        lexer.add_lexer(|source, start| {
            let substr = &source[start..];

            if !substr.starts_with('"') {
                return None;
            }

            let mut escaped = false;

            for (i, c) in substr.char_indices().skip(1) {
                if escaped {
                    escaped = false;
                    continue;
                }

                match c {
                    '\\' => escaped = true,
                    '"' => return Some(Ok((EmberTokenLabel::StringLiteral, i + 1))),
                    '\n' => break,
                    _ => {}
                }
            }

            Some(Err(SyntaxError::new_unterminated_string(source, start)))
        });

        // whitespace
        lexer.add_ignorer(|source, start| {
            Ok(source[start..]
                .bytes()
                .take_while(|b| b.is_ascii_whitespace())
                .count())
        });

        // comments: `//` to end of line, `/* ... */` unnested
        lexer.add_ignorer(|source, start| {
            let substr = &source[start..];

            if substr.starts_with("//") {
                Ok(substr.find(['\r', '\n']).unwrap_or(substr.len()))
            } else if substr.starts_with("/*") {
                match substr[2..].find("*/") {
                    Some(i) => Ok(i + 4),
                    None => Err(SyntaxError::new_unterminated_comment(source, start)),
                }
            } else {
                Ok(0)
            }
        });

        Self { lexer }
    }
}

impl EmberLexer {
    pub fn lex<'lexer: 'iter, 'source: 'iter, 'iter>(
        &'lexer self,
        source: &'source str,
    ) -> impl Iterator<Item = Result<EmberToken<'source>, SyntaxError<EmberTokenLabel>>> + 'iter
    {
        self.lexer.lex(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        let numbers = ["3", "345", "3.", "3.0", "3.1416", "314.16e-2", "0.31416E1", "34e1"];

        let lexer = EmberLexer::default();

        for s in numbers {
            let token = lexer.lex(s).next().unwrap().unwrap();
            assert_eq!((token.label, token.content), (EmberTokenLabel::Numeral, s));
        }
    }

    #[test]
    fn dot_is_not_a_number() {
        let lexer = EmberLexer::default();
        let token = lexer.lex(".").next().unwrap().unwrap();
        assert_eq!((token.label, token.content), (EmberTokenLabel::Dot, "."));
    }

    #[test]
    fn increment_tokens() {
        let lexer = EmberLexer::default();

        let labels: Vec<_> = lexer
            .lex("i++ + --j")
            .map(|r| r.unwrap().label)
            .collect();

        assert_eq!(
            labels,
            vec![
                EmberTokenLabel::Name,
                EmberTokenLabel::PlusPlus,
                EmberTokenLabel::Plus,
                EmberTokenLabel::MinusMinus,
                EmberTokenLabel::Name,
            ]
        );
    }

    #[test]
    fn strings_and_comments() {
        let lexer = EmberLexer::default();

        let tokens: Vec<_> = lexer
            .lex("\"a\\\"b\" // trailing\n/* block */ x")
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(tokens[0].label, EmberTokenLabel::StringLiteral);
        assert_eq!(tokens[0].content, "\"a\\\"b\"");
        assert_eq!(tokens[1].label, EmberTokenLabel::Name);
        assert_eq!(tokens[1].content, "x");
    }

    #[test]
    fn unterminated_string_errors() {
        let lexer = EmberLexer::default();

        let err = lexer.lex("\"abc").next().unwrap().unwrap_err();
        assert!(matches!(err, SyntaxError::UnterminatedString { .. }));
    }
}
