//! Text scanning with the `Scanner` type.

use std::ops::Range;
use std::str;

type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading the src.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// End of file reached.
    Eof,
    /// Found a byte different from the expected one.
    Char {
        /// The expected byte.
        expected: u8,
        /// The byte found.
        found: u8,
    },
    /// No digit was found where a number was expected.
    Num,
}

/// An error with the position where it happened.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Error {
    /// The error kind.
    pub kind: ErrorKind,
    /// Line of the error, starting from 1.
    pub line: usize,
    /// Column of the error, starting from 1.
    pub col: usize,
    /// Byte offset of the error.
    pub offset: usize,
}

/// A saved scanner position, used to backtrack.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Position {
    idx: usize,
    line: usize,
    col: usize,
}

impl Position {
    /// Returns the byte offset of this position.
    #[inline]
    pub fn offset(&self) -> usize {
        self.idx
    }
}

/// Reading a string slice byte by byte while keep the line and column.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    /// The input to be read.
    src: &'a str,
    /// Current line.
    line: usize,
    /// Current column.
    col: usize,
    /// Current index.
    idx: usize,
}

impl<'a> Scanner<'a> {
    /// Create a `Scanner` from a string slice.
    ///
    /// The `line` and `col` will always start from 1.
    pub fn new(src: &'a str) -> Self {
        Scanner {
            src,
            line: 1,
            col: 1,
            idx: 0,
        }
    }

    /// Returns the current index
    #[inline]
    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Returns the length of the input.
    #[inline]
    pub fn len(&self) -> usize {
        self.src.len()
    }

    /// Returns `true` if the input is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Returns `true` if all bytes where read
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.idx >= self.src.len()
    }

    /// Returns the current position, to be restored with [Scanner::rewind].
    #[inline]
    pub fn position(&self) -> Position {
        Position {
            idx: self.idx,
            line: self.line,
            col: self.col,
        }
    }

    /// Moves the scanner back to a saved position.
    #[inline]
    pub fn rewind(&mut self, pos: Position) {
        self.idx = pos.idx;
        self.line = pos.line;
        self.col = pos.col;
    }

    /// Get next byte without advance.
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.idx).copied()
    }

    /// Get the byte `n` positions ahead without advance.
    #[inline]
    pub fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.as_bytes().get(self.idx + n).copied()
    }

    /// Get `n` bytes without advance.
    pub fn peek_n(&self, n: usize) -> Option<&'a [u8]> {
        self.src.as_bytes().get(self.idx..self.idx + n)
    }

    /// Returns the bytes not read yet.
    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.src.as_bytes()[self.idx.min(self.src.len())..]
    }

    /// Returns the text of `range`, or an empty string when the range does
    /// not fall on character boundaries.
    #[inline]
    pub fn slice(&self, range: Range<usize>) -> &'a str {
        self.src.get(range).unwrap_or_default()
    }

    /// Returns the text between `start` and the current index.
    #[inline]
    pub fn since(&self, start: usize) -> &'a str {
        self.slice(start..self.idx)
    }

    /// `read_while()` will call the `func` clousure for each byte and advance
    /// while the closure returns `true`.
    ///
    /// # Returns
    ///
    /// It will return the (`start..end`) range processed.
    pub fn read_while<F>(&mut self, func: F) -> Range<usize>
    where
        F: Fn(u8) -> bool,
    {
        let start = self.idx;
        while let Some(b) = self.peek() {
            if !func(b) {
                break;
            }
            self.advance();
        }

        Range {
            start,
            end: self.idx,
        }
    }

    /// Same as [Scanner::read_while] but returns the text read.
    pub fn read_str_while<F>(&mut self, func: F) -> &'a str
    where
        F: Fn(u8) -> bool,
    {
        let range = self.read_while(func);
        self.slice(range)
    }

    /// Read next byte if equals to `b`.
    ///
    /// # Errors
    ///
    /// This method will return an error if the byte is not equal to `b`.
    ///
    /// If the slice reached the end, then an error will also be returned.
    pub fn must_read(&mut self, b: u8) -> Result<()> {
        let Some(n) = self.peek() else {
            return self.error(ErrorKind::Eof);
        };
        if b != n {
            return self.error(ErrorKind::Char {
                expected: b,
                found: n,
            });
        }
        self.advance();
        Ok(())
    }

    /// Consumes the next byte if it is `b`.
    pub fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes `lit` if the input continues with it, ignoring ASCII case.
    pub fn eat_ignore_case(&mut self, lit: &str) -> bool {
        match self.peek_n(lit.len()) {
            Some(bytes) if bytes.eq_ignore_ascii_case(lit.as_bytes()) => {
                for _ in 0..lit.len() {
                    self.advance();
                }
                true
            }
            _ => false,
        }
    }

    /// Read a run of decimal digits.
    pub fn read_digits(&mut self) -> Result<&'a str> {
        let digits = self.read_str_while(|b| b.is_ascii_digit());
        if digits.is_empty() {
            return self.error(ErrorKind::Num);
        }
        Ok(digits)
    }

    /// Read number in the input.
    ///
    /// This method read until an invalid digit is found.
    pub fn read_num<N>(&mut self) -> Result<N>
    where
        N: str::FromStr,
    {
        let start = Scanner::position(self);
        let digits = self.read_digits()?;
        match digits.parse() {
            Ok(n) => Ok(n),
            Err(_) => {
                self.rewind(start);
                self.error(ErrorKind::Num)
            }
        }
    }

    /// Call the `func` closure for next byte and read it if the closure returns `true`.
    pub fn read_if<F>(&mut self, func: F) -> Option<u8>
    where
        F: FnOnce(u8) -> bool,
    {
        let b = self.peek()?;
        if !func(b) {
            return None;
        }
        self.advance();
        Some(b)
    }

    #[inline(always)]
    fn advance(&mut self) -> u8 {
        let byte = self.src.as_bytes()[self.idx];
        if byte == b'\n' {
            self.col = 1;
            self.line += 1;
        } else {
            self.col += 1;
        }
        self.idx += 1;

        byte
    }

    fn error<T>(&self, kind: ErrorKind) -> Result<T> {
        Err(Error {
            kind,
            line: self.line,
            col: self.col,
            offset: self.idx,
        })
    }
}

impl Iterator for Scanner<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_eof() {
            return None;
        }
        Some(self.advance())
    }
}
