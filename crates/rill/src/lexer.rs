//! Tokenizer over a shared source buffer.
//!
//! A [`Lexer`] is a cursor over a byte range `[start, end)` of a reference
//! counted source buffer. Because parsing and evaluation are interleaved,
//! the same range may be tokenized many times: loop statements capture
//! sub-lexers over their condition/step/body spans and [`Lexer::reset`] them
//! on every iteration, and function definitions snapshot their body text via
//! [`Lexer::sub_string`] to be re-lexed on each call.

use std::rc::Rc;

use crate::{
    error::{Exception, RunResult},
    token::{TokenKind, keyword_from_ident},
};

fn is_white_space(value: u8) -> bool {
    // <TAB>, <VT>, <FF>, <SP>, <NBSP>
    matches!(value, 0x09 | 0x0B | 0x0C | 0x20 | 0xA0)
}

fn is_line_terminator(value: u8) -> bool {
    matches!(value, b'\n' | b'\r')
}

fn is_ident_start(value: u8) -> bool {
    value.is_ascii_alphabetic() || value == b'_'
}

fn is_ident_continue(value: u8) -> bool {
    value.is_ascii_alphanumeric() || value == b'_'
}

/// Formats a byte offset as `(line: N, column: M)` by scanning the buffer,
/// counting CR LF as a single terminator sequence.
fn position_info(source: &[u8], offset: usize) -> String {
    let mut line = 1usize;
    let mut column = 1usize;
    let mut i = 0usize;
    while i < offset {
        let c = source.get(i).copied().unwrap_or(0);
        if is_line_terminator(c) {
            line += 1;
            column = 1;
            if c == b'\r' && source.get(i + 1).copied() == Some(b'\n') {
                i += 1;
            }
        } else {
            column += 1;
        }
        i += 1;
    }
    format!("(line: {line}, column: {column})")
}

/// Token cursor over a range of a shared source buffer.
///
/// Keeps a two-character window (`cur`, `next`) over the bytes, the kind and
/// lexeme of the current token, and the byte offsets needed for sub-range
/// capture. Cloning the buffer is O(1): sub-lexers share the same `Rc<str>`.
pub(crate) struct Lexer {
    source: Rc<str>,
    start: usize,
    end: usize,
    /// Byte index one past `next` in the buffer (keeps running past `end`).
    pos: usize,
    cur: u8,
    next: u8,
    /// Kind of the current token.
    pub(crate) kind: TokenKind,
    /// Lexeme of the current token: identifier text, string contents with
    /// escapes resolved, or literal digits. Empty for punctuators.
    pub(crate) value: String,
    /// Byte offset of the first character of the current token.
    pub(crate) token_start: usize,
    token_end: usize,
    prev_token_end: usize,
}

impl Lexer {
    pub(crate) fn new(source: &str) -> Self {
        Self::from_shared(Rc::from(source))
    }

    pub(crate) fn from_shared(source: Rc<str>) -> Self {
        let end = source.len();
        Self {
            source,
            start: 0,
            end,
            pos: 0,
            cur: 0,
            next: 0,
            kind: TokenKind::Eos,
            value: String::new(),
            token_start: 0,
            token_end: 0,
            prev_token_end: 0,
        }
    }

    /// A new lexer over the same buffer, from `from` up to the end of the
    /// previously consumed token. Used to capture loop condition, step and
    /// body spans for re-execution.
    pub(crate) fn sub_lexer(&self, from: usize) -> Self {
        Self {
            source: Rc::clone(&self.source),
            start: from,
            end: self.prev_token_end.max(from),
            pos: 0,
            cur: 0,
            next: 0,
            kind: TokenKind::Eos,
            value: String::new(),
            token_start: 0,
            token_end: 0,
            prev_token_end: 0,
        }
    }

    /// The textual span from `from` through the end of the previously
    /// consumed token. Used to snapshot function bodies.
    pub(crate) fn sub_string(&self, from: usize) -> String {
        if self.prev_token_end <= from {
            return String::new();
        }
        String::from_utf8_lossy(&self.source.as_bytes()[from..self.prev_token_end]).into_owned()
    }

    /// Rewinds to the start of the range and lexes the first token.
    pub(crate) fn reset(&mut self) -> RunResult<()> {
        self.pos = self.start;
        self.cur = 0;
        self.next = 0;
        self.token_start = 0;
        self.token_end = 0;
        self.prev_token_end = 0;
        // Fill the two-character window.
        self.advance_char();
        self.advance_char();
        self.next_token()
    }

    /// Steps to the next token.
    pub(crate) fn advance(&mut self) -> RunResult<()> {
        self.prev_token_end = self.token_end;
        self.next_token()
    }

    /// Fails with a syntax error unless the current token has the expected
    /// kind, then advances.
    pub(crate) fn expect(&mut self, expected: TokenKind) -> RunResult<()> {
        if self.kind != expected {
            return Err(Exception::syntax(format!(
                "Expected {}, got {} at {}",
                expected,
                self.kind,
                self.position_of(self.token_start)
            )));
        }
        self.advance()
    }

    /// Formats `offset` as a `(line, column)` position in the underlying buffer.
    pub(crate) fn position_of(&self, offset: usize) -> String {
        position_info(self.source.as_bytes(), offset)
    }

    fn advance_char(&mut self) {
        self.cur = self.next;
        self.next = if self.pos < self.end {
            self.source.as_bytes()[self.pos]
        } else {
            0
        };
        self.pos += 1;
    }

    /// Byte offset of `cur` in the buffer.
    fn cur_index(&self) -> usize {
        self.pos - 2
    }

    fn next_token(&mut self) -> RunResult<()> {
        self.kind = TokenKind::Eos;
        self.value.clear();

        loop {
            while self.cur != 0 && (is_white_space(self.cur) || is_line_terminator(self.cur)) {
                self.advance_char();
            }
            if self.cur == b'/' && self.next == b'/' {
                while self.cur != 0 && !is_line_terminator(self.cur) {
                    self.advance_char();
                }
                continue;
            }
            if self.cur == b'/' && self.next == b'*' {
                let comment_start = self.cur_index();
                self.advance_char();
                self.advance_char();
                while self.cur != 0 && !(self.cur == b'*' && self.next == b'/') {
                    self.advance_char();
                }
                if self.cur == 0 {
                    return Err(Exception::lexer(format!(
                        "Unterminated block comment at {}",
                        self.position_of(comment_start)
                    )));
                }
                self.advance_char();
                self.advance_char();
                continue;
            }
            break;
        }

        self.token_start = self.cur_index();

        if self.cur == 0 {
            self.token_end = self.token_start;
            return Ok(());
        }

        if is_ident_start(self.cur) {
            self.lex_identifier();
        } else if self.cur.is_ascii_digit() {
            self.lex_number();
        } else if self.cur == b'"' || self.cur == b'\'' {
            self.lex_string(self.cur)?;
        } else {
            self.lex_punctuator()?;
        }

        self.token_end = self.cur_index();
        Ok(())
    }

    fn lex_identifier(&mut self) {
        while is_ident_continue(self.cur) {
            self.value.push(self.cur as char);
            self.advance_char();
        }
        self.kind = keyword_from_ident(&self.value).unwrap_or(TokenKind::Identifier);
    }

    fn lex_number(&mut self) {
        let mut is_hex = false;
        if self.cur == b'0' {
            self.value.push('0');
            self.advance_char();
        }
        if self.cur == b'x' {
            is_hex = true;
            self.value.push('x');
            self.advance_char();
        }

        self.kind = TokenKind::IntegerLit;

        while self.cur.is_ascii_digit() || (is_hex && self.cur.is_ascii_hexdigit()) {
            self.value.push(self.cur as char);
            self.advance_char();
        }

        if !is_hex && self.cur == b'.' {
            self.kind = TokenKind::FloatLit;
            self.value.push('.');
            self.advance_char();
            while self.cur.is_ascii_digit() {
                self.value.push(self.cur as char);
                self.advance_char();
            }
        }

        if !is_hex && (self.cur == b'e' || self.cur == b'E') {
            self.kind = TokenKind::FloatLit;
            self.value.push(self.cur as char);
            self.advance_char();
            while self.cur.is_ascii_digit() {
                self.value.push(self.cur as char);
                self.advance_char();
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> RunResult<()> {
        self.advance_char();

        while self.cur != 0 && self.cur != quote {
            if self.cur == b'\\' {
                self.advance_char();
                match self.cur {
                    b'n' => self.value.push('\n'),
                    b'r' => self.value.push('\r'),
                    b't' => self.value.push('\t'),
                    b'a' => self.value.push('\x07'),
                    b'\\' => self.value.push('\\'),
                    b'"' => self.value.push('"'),
                    b'\'' => self.value.push('\''),
                    b'x' => {
                        let mut code = 0u32;
                        for _ in 0..2 {
                            self.advance_char();
                            code = code * 16 + u32::from((self.cur as char).to_digit(16).unwrap_or(0));
                        }
                        self.value.push((code & 0xFF) as u8 as char);
                    }
                    c if quote == b'\'' && (b'0'..=b'7').contains(&c) => {
                        // Three-digit octal escape, single-quoted strings only.
                        let mut code = u32::from(c - b'0');
                        for _ in 0..2 {
                            self.advance_char();
                            code = code * 8 + u32::from((self.cur as char).to_digit(8).unwrap_or(0));
                        }
                        self.value.push((code & 0xFF) as u8 as char);
                    }
                    c => self.value.push(c as char),
                }
            } else {
                self.value.push(self.cur as char);
            }

            self.advance_char();
        }

        if self.cur == 0 {
            return Err(Exception::lexer(format!(
                "Unterminated string literal at {}",
                self.position_of(self.token_start)
            )));
        }

        self.advance_char();
        self.kind = TokenKind::StringLit;
        Ok(())
    }

    fn lex_punctuator(&mut self) -> RunResult<()> {
        let first = self.cur;
        self.advance_char();

        self.kind = match first {
            b'[' => TokenKind::LBracket,
            b'(' => TokenKind::LParen,
            b'{' => TokenKind::LBrace,
            b']' => TokenKind::RBracket,
            b')' => TokenKind::RParen,
            b'}' => TokenKind::RBrace,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b'~' => TokenKind::BitNot,
            b'?' => TokenKind::Question,
            b'.' => {
                if self.cur == b'.' && self.next == b'.' {
                    self.advance_char();
                    self.advance_char();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            b'<' => {
                if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::Lte
                } else if self.cur == b'<' {
                    self.advance_char();
                    if self.cur == b'=' {
                        self.advance_char();
                        TokenKind::ShiftLeftAssign
                    } else {
                        TokenKind::ShiftLeft
                    }
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::Gte
                } else if self.cur == b'>' {
                    self.advance_char();
                    if self.cur == b'=' {
                        self.advance_char();
                        TokenKind::ShiftRightAssign
                    } else if self.cur == b'>' {
                        self.advance_char();
                        if self.cur == b'=' {
                            self.advance_char();
                            TokenKind::ShiftRightUnsignedAssign
                        } else {
                            TokenKind::ShiftRightUnsigned
                        }
                    } else {
                        TokenKind::ShiftRight
                    }
                } else {
                    TokenKind::Gt
                }
            }
            b'=' => {
                if self.cur == b'=' {
                    self.advance_char();
                    if self.cur == b'=' {
                        self.advance_char();
                        TokenKind::StrictEqual
                    } else {
                        TokenKind::Equal
                    }
                } else if self.cur == b'>' {
                    self.advance_char();
                    TokenKind::Arrow
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                if self.cur == b'=' {
                    self.advance_char();
                    if self.cur == b'=' {
                        self.advance_char();
                        TokenKind::StrictNotEqual
                    } else {
                        TokenKind::NotEqual
                    }
                } else {
                    TokenKind::Not
                }
            }
            b'+' => {
                if self.cur == b'+' {
                    self.advance_char();
                    TokenKind::Increment
                } else if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            b'-' => {
                if self.cur == b'-' {
                    self.advance_char();
                    TokenKind::Decrement
                } else if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => {
                if self.cur == b'*' {
                    self.advance_char();
                    if self.cur == b'=' {
                        self.advance_char();
                        TokenKind::StarStarAssign
                    } else {
                        TokenKind::StarStar
                    }
                } else if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            b'/' => {
                if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => {
                if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            b'&' => {
                if self.cur == b'&' {
                    self.advance_char();
                    TokenKind::AndAnd
                } else if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::BitAndAssign
                } else {
                    TokenKind::BitAnd
                }
            }
            b'|' => {
                if self.cur == b'|' {
                    self.advance_char();
                    TokenKind::OrOr
                } else if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::BitOrAssign
                } else {
                    TokenKind::BitOr
                }
            }
            b'^' => {
                if self.cur == b'=' {
                    self.advance_char();
                    TokenKind::BitXorAssign
                } else {
                    TokenKind::BitXor
                }
            }
            c => {
                return Err(Exception::lexer(format!(
                    "Unrecognized character '{}' at {}",
                    c as char,
                    self.position_of(self.token_start)
                )));
            }
        };
        Ok(())
    }
}
