use super::token::Token;
use crate::errors::SyntaxError;
use crate::FastHashMap;
use std::borrow::Cow;

type SubLexer<Label> =
    Box<dyn Fn(&str, usize) -> Option<Result<(Label, usize), SyntaxError<Label>>>>;
type Ignorer<Label> = Box<dyn Fn(&str, usize) -> Result<usize, SyntaxError<Label>>>;

/// A table-driven lexer: fixed tokens are matched longest-first, anything
/// more involved (numbers, strings, names) goes through registered
/// sub-lexers, and ignorers skip whitespace and comments.
pub struct Lexer<Label> {
    lexers: Vec<SubLexer<Label>>,
    ignorers: Vec<Ignorer<Label>>,
    tokens: FastHashMap<Cow<'static, str>, Label>,
    longest_token: usize,
}

impl<Label: Copy> Default for Lexer<Label> {
    fn default() -> Self {
        Self {
            lexers: Vec::new(),
            ignorers: Vec::new(),
            tokens: Default::default(),
            longest_token: 0,
        }
    }
}

impl<Label: Copy> Lexer<Label> {
    /// The ignorer receives the source and a start offset, and returns how
    /// many bytes to skip (0 for no match).
    pub fn add_ignorer<F>(&mut self, ignorer: F)
    where
        F: 'static + Fn(&str, usize) -> Result<usize, SyntaxError<Label>>,
    {
        self.ignorers.push(Box::new(ignorer));
    }

    /// The sub-lexer receives the source and a start offset, and returns the
    /// label and byte length of the matched token.
    pub fn add_lexer<F>(&mut self, lexer: F)
    where
        F: 'static + Fn(&str, usize) -> Option<Result<(Label, usize), SyntaxError<Label>>>,
    {
        self.lexers.push(Box::new(lexer));
    }

    /// Fixed tokens have the lowest priority, longest match wins.
    pub fn add_token(&mut self, label: Label, value: Cow<'static, str>) {
        self.longest_token = self.longest_token.max(value.len());
        self.tokens.insert(value, label);
    }

    fn lex_fixed_token(&self, source: &str, start: usize) -> Option<(Label, usize)> {
        let max_test_len = self.longest_token.min(source.len() - start);

        for len in (1..=max_test_len).rev() {
            if !source.is_char_boundary(start + len) {
                continue;
            }

            if let Some(label) = self.tokens.get(&source[start..start + len]) {
                return Some((*label, len));
            }
        }

        None
    }

    pub fn lex<'lexer: 'iter, 'source: 'iter, 'iter>(
        &'lexer self,
        source: &'source str,
    ) -> impl Iterator<Item = Result<Token<'source, Label>, SyntaxError<Label>>> + 'iter {
        let mut offset = 0;

        std::iter::from_fn(move || loop {
            if offset >= source.len() {
                return None;
            }

            let mut skipped = false;

            for ignorer in &self.ignorers {
                match ignorer(source, offset) {
                    Ok(0) => {}
                    Ok(len) => {
                        offset += len;
                        skipped = true;
                        break;
                    }
                    Err(err) => return Some(Err(err)),
                }
            }

            if skipped {
                continue;
            }

            for sub_lexer in &self.lexers {
                match sub_lexer(source, offset) {
                    None => {}
                    Some(Ok((label, len))) => {
                        let token = Token {
                            label,
                            content: &source[offset..offset + len],
                            offset,
                        };
                        offset += len;

                        return Some(Ok(token));
                    }
                    Some(Err(err)) => return Some(Err(err)),
                }
            }

            if let Some((label, len)) = self.lex_fixed_token(source, offset) {
                let token = Token {
                    label,
                    content: &source[offset..offset + len],
                    offset,
                };
                offset += len;

                return Some(Ok(token));
            }

            return Some(Err(SyntaxError::new_unexpected_character(source, offset)));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_tokens_and_sub_lexers() {
        let mut lexer = Lexer::default();

        for lexeme in ["<", "<=", ">", ">=", "=="] {
            lexer.add_token(lexeme, lexeme.into());
        }

        // numbers
        lexer.add_lexer(|source, start| {
            let len = source[start..]
                .bytes()
                .take_while(|b| b.is_ascii_digit())
                .count();

            if len == 0 {
                return None;
            }

            Some(Ok(("number", len)))
        });

        // whitespace
        lexer.add_ignorer(|source, start| {
            Ok(source[start..]
                .bytes()
                .take_while(|b| b.is_ascii_whitespace())
                .count())
        });

        assert_eq!(
            &lexer
                .lex("12 >= 3")
                .collect::<Result<Vec<_>, _>>()
                .unwrap(),
            &[
                Token {
                    label: "number",
                    content: "12",
                    offset: 0
                },
                Token {
                    label: ">=",
                    content: ">=",
                    offset: 3
                },
                Token {
                    label: "number",
                    content: "3",
                    offset: 6
                }
            ]
        );
    }

    #[test]
    fn longest_fixed_token_wins() {
        let mut lexer = Lexer::default();

        lexer.add_token("lt", "<".into());
        lexer.add_token("le", "<=".into());

        let token = lexer.lex("<=").next().unwrap().unwrap();
        assert_eq!((token.label, token.content), ("le", "<="));
    }
}
