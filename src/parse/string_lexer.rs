//! Shared lexing infrastructure for the suite's text formats. The HDL
//! tokenizer and the test-script comment stripper walk their sources through
//! [StringLexer].

use crate::definitions::LineNumber;
use std::iter::Peekable;
use std::str::CharIndices;

/// A lexeme together with the source line it starts on, for error reporting.
#[derive(PartialEq, Eq, Debug)]
pub struct Spanned<T> {
    pub line_nr: LineNumber,
    pub content: T,
}

impl<T> Spanned<T> {
    pub fn new(line_nr: LineNumber, content: T) -> Self {
        Self { line_nr, content }
    }
}

/// A character walker over a source string, tracking line numbers.
pub struct StringLexer<'src> {
    source: &'src str,
    line_nr: LineNumber,
    chars: Peekable<CharIndices<'src>>,
}

impl<'src> StringLexer<'src> {
    pub fn new(source: &'src str) -> Self {
        StringLexer {
            source,
            line_nr: 1,
            chars: source.char_indices().peekable(),
        }
    }

    pub fn current_char(&mut self) -> Option<Spanned<char>> {
        let line_nr = self.line_nr;
        self.chars.peek().map(|&(_, c)| Spanned::new(line_nr, c))
    }

    pub fn current_eq(&mut self, test: char) -> bool {
        self.chars.peek().map_or(false, |&(_, c)| c == test)
    }

    pub fn line_nr(&self) -> LineNumber {
        self.line_nr
    }

    pub fn advance(&mut self) -> Option<Spanned<char>> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line_nr += 1;
        }

        Some(Spanned::new(self.line_nr, c))
    }

    /// Consume characters while the predicate holds, returning the consumed
    /// slice tagged with its starting line.
    pub fn take_chars_while<P>(&mut self, mut predicate: P) -> Option<Spanned<&'src str>>
    where
        P: FnMut(char) -> bool,
    {
        let &(start_idx, _) = self.chars.peek()?;
        let start_line = self.line_nr;

        let mut end_idx = start_idx;
        loop {
            if let Some(&(i, c)) = self.chars.peek() {
                end_idx = i;
                if !predicate(c) {
                    break;
                }
                self.advance()?;
            } else {
                end_idx = self.source.len();
                break;
            }
        }

        self.source
            .get(start_idx..end_idx)
            .map(|s| Spanned::new(start_line, s))
    }

    /// Consume characters up to and including the given substring.
    ///
    /// Used to skip block comments. If the terminator never appears, the rest
    /// of the input is consumed.
    pub fn take_until_substr(&mut self, substr: &str) -> Option<Spanned<&'src str>> {
        let &(start_idx, _) = self.chars.peek()?;
        let start_line = self.line_nr;

        let end_idx = match self.source[start_idx..].find(substr) {
            Some(offset) => start_idx + offset + substr.len(),
            None => self.source.len(),
        };

        while let Some(&(i, _)) = self.chars.peek() {
            if i >= end_idx {
                break;
            }
            self.advance()?;
        }

        self.source
            .get(start_idx..end_idx)
            .map(|s| Spanned::new(start_line, s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexer_take_while() {
        let mut iter = StringLexer::new("hello world");
        assert_eq!(
            Some(Spanned::new(1, "")),
            iter.take_chars_while(char::is_whitespace)
        );

        assert_eq!(
            Some(Spanned::new(1, "hello")),
            iter.take_chars_while(|c| !c.is_whitespace())
        );

        iter.advance();

        assert_eq!(
            Some(Spanned::new(1, "world")),
            iter.take_chars_while(|c| !c.is_whitespace())
        );
    }

    #[test]
    fn test_lexer_tracks_lines() {
        let mut iter = StringLexer::new("a\nb");
        assert_eq!(1, iter.line_nr());
        assert_eq!(Some(Spanned::new(1, 'a')), iter.advance());

        iter.advance(); // the newline
        assert_eq!(2, iter.line_nr());
        assert_eq!(Some(Spanned::new(2, 'b')), iter.current_char());
    }

    #[test]
    fn test_lexer_take_until_substr() {
        let mut iter = StringLexer::new("/* a\nblock */rest");
        let skipped = iter.take_until_substr("*/").unwrap();
        assert_eq!(Spanned::new(1, "/* a\nblock */"), skipped);
        assert_eq!(
            Some(Spanned::new(2, "rest")),
            iter.take_chars_while(|c| !c.is_whitespace())
        );
    }

    #[test]
    fn test_take_while_runs_to_end_of_input() {
        let mut iter = StringLexer::new("abc");
        assert_eq!(
            Some(Spanned::new(1, "abc")),
            iter.take_chars_while(|c| c.is_alphabetic())
        );
        assert_eq!(None, iter.current_char());
    }
}
