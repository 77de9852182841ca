//! # Tokens and Input Streams
//!
//! The token contract consumed by the prediction engine, plus the markable
//! random-access stream traits it drives.
//!
//! ## Overview
//!
//! Prediction temporarily advances the input while walking the DFA, then
//! restores the original position before returning. The stream traits
//! therefore require O(1) [`seek`](TokenStream::seek) and nestable
//! [`mark`](TokenStream::mark)/[`release`](TokenStream::release) pairs.
//!
//! Two concrete streams cover the common cases: [`ListTokenStream`] buffers a
//! token vector for the parser simulator, and [`StringCharStream`] feeds the
//! lexer simulator code points from a string.

use compact_str::CompactString;

/// Token type of the synthetic end-of-input symbol.
pub const TOKEN_EOF: i32 = -1;
/// Token type that matches no symbol; transition labels never carry it.
pub const TOKEN_INVALID: i32 = 0;
/// Smallest token type a grammar may assign.
pub const MIN_USER_TOKEN_TYPE: i32 = 1;

/// Channel ordinary tokens are emitted on.
pub const DEFAULT_CHANNEL: usize = 0;
/// Channel for tokens hidden from the parser (whitespace, comments).
pub const HIDDEN_CHANNEL: usize = 1;

/// A lexed token.
///
/// `text` is optional: tokens synthesized during error handling carry none,
/// and callers can always recover the text from `start..=stop` against the
/// character stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Token {
    pub token_type: i32,
    pub line: u32,
    pub column: u32,
    pub channel: usize,
    pub token_index: usize,
    pub start: usize,
    pub stop: usize,
    pub text: Option<CompactString>,
}

impl Token {
    /// A token with just a type; positions zeroed, useful in tests and
    /// synthesized error tokens.
    #[must_use]
    pub fn of_type(token_type: i32) -> Self {
        Self {
            token_type,
            line: 1,
            column: 0,
            channel: DEFAULT_CHANNEL,
            token_index: 0,
            start: 0,
            stop: 0,
            text: None,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<CompactString>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Display text for error messages: the token text when present,
    /// `<EOF>` for the end marker, otherwise the numeric type.
    #[must_use]
    pub fn display_text(&self) -> CompactString {
        if let Some(text) = &self.text {
            return text.clone();
        }
        if self.token_type == TOKEN_EOF {
            CompactString::const_new("<EOF>")
        } else {
            CompactString::from(format!("<{}>", self.token_type))
        }
    }
}

/// Random-access, markable stream of [`Token`]s.
///
/// `la(1)` is the current symbol's type, `la(2)` the next, and `la(-1)` the
/// previously consumed symbol; `la(0)` is undefined and implementations may
/// return [`TOKEN_INVALID`].
pub trait TokenStream {
    /// Token type `k` symbols ahead (or behind, for negative `k`).
    fn la(&mut self, k: isize) -> i32;

    /// The token `k` symbols ahead, if in range.
    fn lt(&mut self, k: isize) -> Option<&Token>;

    /// Advance past the current symbol.
    fn consume(&mut self);

    /// Begin a lookahead region. Returns a marker to pass to `release`.
    /// Marks may be nested.
    fn mark(&mut self) -> usize;

    /// End the lookahead region started by `marker`.
    fn release(&mut self, marker: usize);

    /// Current position.
    fn index(&self) -> usize;

    /// Reposition. Must be O(1).
    fn seek(&mut self, index: usize);

    /// Total number of symbols, including the EOF marker.
    fn size(&self) -> usize;

    fn source_name(&self) -> &str;
}

/// Random-access, markable stream of code points for the lexer simulator.
/// `la` returns Unicode scalar values, or [`TOKEN_EOF`] past the end.
pub trait CharStream {
    fn la(&mut self, k: isize) -> i32;
    fn consume(&mut self);
    fn mark(&mut self) -> usize;
    fn release(&mut self, marker: usize);
    fn index(&self) -> usize;
    fn seek(&mut self, index: usize);
    fn size(&self) -> usize;
    /// The text in `start..=stop` (code point indices).
    fn text(&self, start: usize, stop: usize) -> String;
}

/// A fully buffered [`TokenStream`] over a token vector.
///
/// The buffer always ends with an EOF token; one is appended if the input
/// vector lacks it. Marks are free because the buffer never evicts.
#[derive(Debug)]
pub struct ListTokenStream {
    tokens: Vec<Token>,
    pos: usize,
    outstanding_marks: usize,
    name: String,
}

impl ListTokenStream {
    #[must_use]
    pub fn new(mut tokens: Vec<Token>) -> Self {
        let needs_eof = tokens.last().is_none_or(|t| t.token_type != TOKEN_EOF);
        if needs_eof {
            let mut eof = Token::of_type(TOKEN_EOF);
            eof.token_index = tokens.len();
            tokens.push(eof);
        }
        for (i, t) in tokens.iter_mut().enumerate() {
            t.token_index = i;
        }
        Self {
            tokens,
            pos: 0,
            outstanding_marks: 0,
            name: String::from("<tokens>"),
        }
    }

    /// Build a stream from bare token types, for tests.
    #[must_use]
    pub fn from_types(types: &[i32]) -> Self {
        Self::new(types.iter().map(|&t| Token::of_type(t)).collect())
    }

    /// Number of marks issued but not yet released.
    #[must_use]
    pub const fn outstanding_marks(&self) -> usize {
        self.outstanding_marks
    }

    fn offset(&self, k: isize) -> Option<usize> {
        if k > 0 {
            self.pos.checked_add(k as usize - 1)
        } else {
            self.pos.checked_sub(k.unsigned_abs())
        }
    }
}

impl TokenStream for ListTokenStream {
    fn la(&mut self, k: isize) -> i32 {
        if k == 0 {
            return TOKEN_INVALID;
        }
        match self.offset(k) {
            Some(i) if i < self.tokens.len() => self.tokens[i].token_type,
            Some(_) => TOKEN_EOF,
            None => TOKEN_INVALID,
        }
    }

    fn lt(&mut self, k: isize) -> Option<&Token> {
        if k == 0 {
            return None;
        }
        let i = self.offset(k)?;
        // Clamp lookahead past the end to the EOF token.
        Some(&self.tokens[i.min(self.tokens.len() - 1)])
    }

    fn consume(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn mark(&mut self) -> usize {
        self.outstanding_marks += 1;
        self.pos
    }

    fn release(&mut self, _marker: usize) {
        self.outstanding_marks = self.outstanding_marks.saturating_sub(1);
    }

    fn index(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, index: usize) {
        self.pos = index.min(self.tokens.len() - 1);
    }

    fn size(&self) -> usize {
        self.tokens.len()
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

/// A [`CharStream`] over a string, indexed by code point.
#[derive(Debug)]
pub struct StringCharStream {
    chars: Vec<char>,
    pos: usize,
}

impl StringCharStream {
    #[must_use]
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }
}

impl CharStream for StringCharStream {
    fn la(&mut self, k: isize) -> i32 {
        if k == 0 {
            return TOKEN_INVALID;
        }
        let i = if k > 0 {
            self.pos.checked_add(k as usize - 1)
        } else {
            self.pos.checked_sub(k.unsigned_abs())
        };
        match i {
            Some(i) if i < self.chars.len() => self.chars[i] as i32,
            _ => TOKEN_EOF,
        }
    }

    fn consume(&mut self) {
        if self.pos < self.chars.len() {
            self.pos += 1;
        }
    }

    fn mark(&mut self) -> usize {
        self.pos
    }

    fn release(&mut self, _marker: usize) {}

    fn index(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, index: usize) {
        self.pos = index.min(self.chars.len());
    }

    fn size(&self) -> usize {
        self.chars.len()
    }

    fn text(&self, start: usize, stop: usize) -> String {
        let stop = stop.min(self.chars.len().saturating_sub(1));
        if start > stop {
            return String::new();
        }
        self.chars[start..=stop].iter().collect()
    }
}
