// ABOUTME: Byte-stream lexer — turns Smile source into a token stream

use crate::position::LexerPosition;
use crate::symbol::SymbolTable;
use crate::token::{keyword_kind, Token, TokenKind, TokenPayload};
use std::cell::RefCell;
use std::rc::Rc;

const RING_SIZE: usize = 16;
const MAX_UNGET: usize = 15;

/// The Smile lexical analyzer. Holds an immutable byte buffer and a 16-slot
/// ring buffer of recently produced tokens so callers can `unget` up to 15
/// levels deep (spec.md §4.2, `smilelib/include/smile/parsing/lexer.h`).
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    end: usize,
    line_start: usize,
    line: i32,
    filename: Rc<str>,
    symbols: Rc<RefCell<SymbolTable>>,
    ring: Vec<Option<Token>>,
    token_index: usize,
    unget_count: usize,
    highlighter_mode: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(
        input: &'a [u8],
        start: usize,
        length: usize,
        filename: impl Into<Rc<str>>,
        first_line: i32,
        symbols: Rc<RefCell<SymbolTable>>,
    ) -> Self {
        Lexer {
            input,
            pos: start,
            end: start + length,
            line_start: start,
            line: first_line,
            filename: filename.into(),
            symbols,
            ring: vec![None; RING_SIZE],
            token_index: 0,
            unget_count: 0,
            highlighter_mode: false,
        }
    }

    pub fn set_highlighter_mode(&mut self, enabled: bool) {
        self.highlighter_mode = enabled;
    }

    /// `peek(); unget()` — look at the next token kind without consuming it.
    pub fn peek(&mut self) -> TokenKind {
        let tok = self.next();
        let kind = tok.kind;
        self.unget();
        kind
    }

    /// Push the most-recently-read token back onto the input; O(1), up to
    /// 15 levels deep.
    pub fn unget(&mut self) {
        if self.unget_count >= MAX_UNGET {
            panic!("smile-core: lexer unget stack exhausted (max {MAX_UNGET})");
        }
        self.unget_count += 1;
        self.token_index = (self.token_index + RING_SIZE - 1) % RING_SIZE;
    }

    fn push_token(&mut self, token: Token) -> Token {
        self.token_index = (self.token_index + 1) % RING_SIZE;
        self.ring[self.token_index] = Some(token.clone());
        token
    }

    fn peek_byte(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.input[self.pos])
        } else {
            None
        }
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        let p = self.pos + offset;
        if p < self.end {
            Some(self.input[p])
        } else {
            None
        }
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        Some(b)
    }

    fn newline(&mut self, first: u8) {
        // \r, \n, \r\n, \n\r all count as exactly one newline.
        let second = self.peek_byte();
        match (first, second) {
            (b'\r', Some(b'\n')) | (b'\n', Some(b'\r')) => {
                self.pos += 1;
            }
            _ => {}
        }
        self.line += 1;
        self.line_start = self.pos;
    }

    fn position_for(&self, start: usize) -> LexerPosition {
        let column = (start - self.line_start + 1) as i32;
        LexerPosition::new(
            self.filename.clone(),
            self.line,
            column,
            self.line_start,
            (self.pos - start) as i32,
        )
    }

    fn intern(&self, text: &str) -> crate::symbol::Symbol {
        self.symbols.borrow_mut().get_or_create(text)
    }

    fn skip_whitespace_and_comments(&mut self) -> Option<Token> {
        loop {
            match self.peek_byte() {
                Some(b) if b <= 0x20 && b != b'\r' && b != b'\n' => {
                    self.pos += 1;
                }
                Some(b @ (b'\r' | b'\n')) => {
                    self.pos += 1;
                    self.newline(b);
                }
                Some(b'/') => {
                    if self.peek_at(1) == Some(b'/') {
                        self.pos += 2;
                        while let Some(b) = self.peek_byte() {
                            if b == b'\r' || b == b'\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                    } else if self.peek_at(1) == Some(b'*') {
                        let start = self.pos;
                        self.pos += 2;
                        let mut closed = false;
                        while let Some(b) = self.advance() {
                            if b == b'\r' || b == b'\n' {
                                self.newline(b);
                            } else if b == b'*' && self.peek_byte() == Some(b'/') {
                                self.pos += 1;
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Some(self.error_token(start, "Unterminated block comment"));
                        }
                    } else {
                        return None;
                    }
                }
                Some(b'=') | Some(b'-') => {
                    // Five-or-more consecutive '=' or '-' is a "ruler" comment.
                    let ch = self.peek_byte().unwrap();
                    let start = self.pos;
                    let mut count = 0usize;
                    while self.peek_at(count) == Some(ch) {
                        count += 1;
                    }
                    if count >= 5 {
                        self.pos = start + count;
                        while let Some(b) = self.peek_byte() {
                            if b == b'\r' || b == b'\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                    } else {
                        return None;
                    }
                }
                Some(b'#') if self.peek_at(1) == Some(b'!') => {
                    self.pos += 2;
                    while let Some(b) = self.peek_byte() {
                        if b == b'\r' || b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return None,
            }
        }
    }

    fn error_token(&self, start: usize, message: &str) -> Token {
        Token::new(TokenKind::Error, self.position_for(start), message.to_string())
    }

    fn is_ident_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_' || b == b'$'
    }

    fn is_ident_continue(b: u8) -> bool {
        b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'\'' | b'"' | b'!' | b'?' | b'~')
    }

    fn read_identifier(&mut self, start: usize) -> Token {
        while let Some(b) = self.peek_byte() {
            if Self::is_ident_continue(b) {
                self.pos += 1;
            } else if b == b'-' {
                // A trailing hyphen followed by another identifier char continues
                // the name (hyphenated identifiers like `set-once-const`).
                match self.peek_at(1) {
                    Some(next) if Self::is_ident_start(next) || next.is_ascii_digit() => {
                        self.pos += 1;
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("").to_string();
        let position = self.position_for(start);
        if let Some(kw) = keyword_kind(&text) {
            return Token::new(kw, position, text);
        }
        let symbol = self.intern(&text);
        Token::new(TokenKind::AlphaName, position, text)
            .with_payload(TokenPayload::Symbol(symbol))
    }

    fn read_number(&mut self, start: usize) -> Token {
        let mut is_real_or_float = false;
        let mut base = 10u32;
        if self.peek_byte() == Some(b'0') {
            match self.peek_at(1) {
                Some(b'x') | Some(b'X') => {
                    base = 16;
                    self.pos += 2;
                }
                Some(b'b') | Some(b'B') => {
                    base = 2;
                    self.pos += 2;
                }
                Some(b'o') | Some(b'O') => {
                    base = 8;
                    self.pos += 2;
                }
                Some(b) if b.is_ascii_digit() => {
                    base = 8;
                    self.pos += 1;
                }
                _ => {}
            }
        }
        let digit_start = self.pos;
        let is_digit_for_base = |b: u8, base: u32| match base {
            16 => b.is_ascii_hexdigit(),
            8 => (b'0'..=b'7').contains(&b),
            2 => b == b'0' || b == b'1',
            _ => b.is_ascii_digit(),
        };
        while let Some(b) = self.peek_byte() {
            if is_digit_for_base(b, base) || matches!(b, b'\'' | b'"' | b'_') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if base == 10 && self.peek_byte() == Some(b'.') {
            if let Some(next) = self.peek_at(1) {
                if next.is_ascii_digit() {
                    is_real_or_float = true;
                    self.pos += 1;
                    while let Some(b) = self.peek_byte() {
                        if b.is_ascii_digit() || matches!(b, b'\'' | b'"' | b'_') {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
            }
        }
        if base == 10 && matches!(self.peek_byte(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek_byte(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.peek_byte().map(|b| b.is_ascii_digit()).unwrap_or(false) {
                is_real_or_float = true;
                while self.peek_byte().map(|b| b.is_ascii_digit()).unwrap_or(false) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        let digits: String = self.input[digit_start..self.pos]
            .iter()
            .filter(|&&b| b != b'\'' && b != b'"' && b != b'_')
            .map(|&b| b as char)
            .collect();

        let suffix_start = self.pos;
        let suffix = match self.peek_byte() {
            Some(b @ (b't' | b's' | b'L' | b'x' | b'f' | b'd')) => {
                self.pos += 1;
                Some(b)
            }
            _ => None,
        };

        let position = self.position_for(start);
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("").to_string();

        if is_real_or_float {
            if suffix == Some(b'x') {
                self.pos = suffix_start;
                return self.error_token(start, "Numeric literal suffix 'x' (int128) is not defined on a real/float literal");
            }
            let value: f64 = digits.parse().unwrap_or(0.0);
            return match suffix {
                Some(b'f') => Token::new(TokenKind::Float32, position, text)
                    .with_payload(TokenPayload::Float32(value as f32)),
                Some(b'd') | None => Token::new(TokenKind::Real64, position, text)
                    .with_payload(TokenPayload::Real64(value)),
                _ => self.error_token(start, "Invalid suffix on real/float literal"),
            };
        }

        let value = i128::from_str_radix(&digits, base).unwrap_or(0);
        match suffix {
            Some(b't') => Token::new(TokenKind::Byte, position, text)
                .with_payload(TokenPayload::Byte(value as u8)),
            Some(b's') => Token::new(TokenKind::Integer16, position, text)
                .with_payload(TokenPayload::Int16(value as i16)),
            Some(b'L') => Token::new(TokenKind::Integer64, position, text)
                .with_payload(TokenPayload::Int64(value as i64)),
            Some(b'x') => Token::new(TokenKind::Integer128, position, text)
                .with_payload(TokenPayload::Int128(value)),
            None => Token::new(TokenKind::Integer32, position, text)
                .with_payload(TokenPayload::Int32(value as i32)),
            _ => self.error_token(start, "Invalid integer literal suffix"),
        }
    }

    /// Decode a single backslash escape starting just after the `\`.
    /// Returns the decoded byte/codepoint and the number of input bytes
    /// consumed beyond the backslash.
    fn decode_escape(&self, rest: &[u8]) -> Option<(u32, usize)> {
        let first = *rest.first()?;
        match first {
            b'a' => Some((0x07, 1)),
            b'b' => Some((0x08, 1)),
            b't' => Some((0x09, 1)),
            b'n' => Some((0x0A, 1)),
            b'v' => Some((0x0B, 1)),
            b'f' => Some((0x0C, 1)),
            b'r' => Some((0x0D, 1)),
            b'e' => Some((0x1B, 1)),
            b'\\' => Some((b'\\' as u32, 1)),
            b'\'' => Some((b'\'' as u32, 1)),
            b'"' => Some((b'"' as u32, 1)),
            b'x' => {
                let hex: String = rest[1..]
                    .iter()
                    .take(2)
                    .take_while(|b| b.is_ascii_hexdigit())
                    .map(|&b| b as char)
                    .collect();
                let n = hex.len();
                let value = u32::from_str_radix(&hex, 16).ok()?;
                Some((value, 1 + n))
            }
            b'u' => {
                let hex: String = rest[1..]
                    .iter()
                    .take_while(|&&b| b != b';' && b.is_ascii_hexdigit())
                    .map(|&b| b as char)
                    .collect();
                let n = hex.len();
                let value = u32::from_str_radix(&hex, 16).ok()?;
                let semi = if rest.get(1 + n) == Some(&b';') { 1 } else { 0 };
                Some((value, 1 + n + semi))
            }
            b'0'..=b'9' => {
                let digits: String = rest
                    .iter()
                    .take(3)
                    .take_while(|b| b.is_ascii_digit())
                    .map(|&b| b as char)
                    .collect();
                let n = digits.len();
                let value: u32 = digits.parse().ok()?;
                if value > 255 {
                    return None;
                }
                Some((value, n))
            }
            _ => None,
        }
    }

    fn read_string_body(&mut self, terminator: &[u8], start: usize, dynamic: bool) -> Token {
        let mut text = String::new();
        let mut has_escapes = false;
        loop {
            if self.pos + terminator.len() <= self.end
                && &self.input[self.pos..self.pos + terminator.len()] == terminator
            {
                self.pos += terminator.len();
                break;
            }
            match self.peek_byte() {
                None => {
                    return self.error_token(start, "Unterminated string literal");
                }
                Some(b'\\') => {
                    // Raw strings (dynamic == false) do not process escapes.
                    if !dynamic {
                        text.push('\\');
                        self.pos += 1;
                        continue;
                    }
                    let rest = &self.input[self.pos + 1..self.end];
                    match self.decode_escape(rest) {
                        Some((value, consumed)) => {
                            has_escapes = true;
                            if let Some(ch) = char::from_u32(value) {
                                text.push(ch);
                            }
                            self.pos += 1 + consumed;
                        }
                        None => {
                            return self.error_token(start, "Invalid escape sequence in string");
                        }
                    }
                }
                Some(b) if b < 0x20 && b != b'\t' && terminator.len() == 1 => {
                    return self.error_token(start, "Disallowed control character in single-line string");
                }
                Some(b) => {
                    if b == b'\r' || b == b'\n' {
                        self.pos += 1;
                        self.newline(b);
                        text.push('\n');
                    } else {
                        text.push(b as char);
                        self.pos += 1;
                    }
                }
            }
        }
        let position = self.position_for(start);
        let kind = if terminator.len() > 1 {
            if dynamic {
                TokenKind::LongDynString
            } else {
                TokenKind::LongRawString
            }
        } else if dynamic {
            TokenKind::DynString
        } else {
            TokenKind::RawString
        };
        let mut tok = Token::new(kind, position, text.clone()).with_payload(TokenPayload::Text(Rc::from(text.as_str())));
        tok.has_escapes = has_escapes;
        tok
    }

    fn read_regex(&mut self, start: usize) -> Token {
        // `#/.../flags` — consume until the next unescaped `/`, then any
        // trailing identifier characters as flags.
        self.pos += 1; // the leading '/'
        let pattern_start = self.pos;
        loop {
            match self.peek_byte() {
                None => return self.error_token(start, "Unterminated regex literal"),
                Some(b'\\') => {
                    self.pos += 2;
                }
                Some(b'/') => break,
                Some(b'\r') | Some(b'\n') => {
                    return self.error_token(start, "Unterminated regex literal");
                }
                Some(_) => {
                    self.pos += 1;
                }
            }
        }
        let pattern = std::str::from_utf8(&self.input[pattern_start..self.pos])
            .unwrap_or("")
            .to_string();
        self.pos += 1; // closing '/'
        let flags_start = self.pos;
        while self.peek_byte().map(Self::is_ident_continue).unwrap_or(false) {
            self.pos += 1;
        }
        let flags = std::str::from_utf8(&self.input[flags_start..self.pos]).unwrap_or("");
        let mut builder = String::new();
        if flags.contains('i') {
            builder.push_str("(?i)");
        }
        if flags.contains('m') {
            builder.push_str("(?m)");
        }
        if flags.contains('s') {
            builder.push_str("(?s)");
        }
        builder.push_str(&pattern);
        let position = self.position_for(start);
        let text = format!("#/{pattern}/{flags}");
        match regex::Regex::new(&builder) {
            Ok(re) => Token::new(TokenKind::LoanwordRegex, position, text)
                .with_payload(TokenPayload::Regex(Rc::new(re))),
            Err(e) => self.error_token(start, &format!("Invalid regex literal: {e}")),
        }
    }

    fn read_loanword(&mut self, start: usize) -> Token {
        if self.peek_byte() == Some(b'#') {
            self.pos += 1;
            let position = self.position_for(start);
            return Token::new(TokenKind::DoubleHash, position, "##");
        }
        if self.peek_byte() == Some(b'/') {
            return self.read_regex(start);
        }
        let word_start = self.pos;
        while self.peek_byte().map(Self::is_ident_continue).unwrap_or(false) {
            self.pos += 1;
        }
        let word = std::str::from_utf8(&self.input[word_start..self.pos]).unwrap_or("");
        let position = self.position_for(start);
        let text = format!("#{word}");
        match word {
            "include" => Token::new(TokenKind::LoanwordInclude, position, text),
            "syntax" => Token::new(TokenKind::LoanwordSyntax, position, text),
            "brk" => Token::new(TokenKind::LoanwordBrk, position, text),
            "json" => Token::new(TokenKind::LoanwordJson, position, text),
            "xml" => Token::new(TokenKind::LoanwordXml, position, text),
            "html" => Token::new(TokenKind::LoanwordXml, position, text),
            _ => self.error_token(start, &format!("Unknown loanword: #{word}")),
        }
    }

    fn read_punctuation(&mut self, start: usize) -> Token {
        let b = self.advance().unwrap();
        macro_rules! tok {
            ($kind:expr, $text:expr) => {{
                let position = self.position_for(start);
                Token::new($kind, position, $text)
            }};
        }
        match b {
            b'{' => tok!(TokenKind::LeftBrace, "{"),
            b'}' => tok!(TokenKind::RightBrace, "}"),
            b'(' => tok!(TokenKind::LeftParen, "("),
            b')' => tok!(TokenKind::RightParen, ")"),
            b'[' => tok!(TokenKind::LeftBracket, "["),
            b']' => tok!(TokenKind::RightBracket, "]"),
            b',' => tok!(TokenKind::Comma, ","),
            b';' => tok!(TokenKind::Semicolon, ";"),
            b':' => tok!(TokenKind::Colon, ":"),
            b'`' => tok!(TokenKind::Backtick, "`"),
            b'|' => tok!(TokenKind::Bar, "|"),
            b'@' => {
                if self.peek_byte() == Some(b'@') {
                    self.pos += 1;
                    tok!(TokenKind::AtAt, "@@")
                } else {
                    tok!(TokenKind::At, "@")
                }
            }
            b'=' => {
                let preceded_by_non_ws = start > 0 && !(self.input[start - 1] as char).is_whitespace();
                if self.peek_byte() == Some(b'=') && self.peek_at(1) == Some(b'=') {
                    self.pos += 2;
                    tok!(TokenKind::SuperEq, "===")
                } else if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    tok!(TokenKind::Eq, "==")
                } else if preceded_by_non_ws {
                    tok!(TokenKind::EqualWithoutWhitespace, "=")
                } else {
                    tok!(TokenKind::Equal, "=")
                }
            }
            b'!' => {
                if self.peek_byte() == Some(b'=') && self.peek_at(1) == Some(b'=') {
                    self.pos += 2;
                    tok!(TokenKind::SuperNe, "!==")
                } else if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    tok!(TokenKind::Ne, "!=")
                } else {
                    self.read_punct_name(start)
                }
            }
            b'<' => {
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    tok!(TokenKind::Le, "<=")
                } else {
                    tok!(TokenKind::Lt, "<")
                }
            }
            b'>' => {
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    tok!(TokenKind::Ge, ">=")
                } else {
                    tok!(TokenKind::Gt, ">")
                }
            }
            b'.' => {
                if self.peek_byte() == Some(b'.') && self.peek_at(1) == Some(b'.') {
                    self.pos += 2;
                    tok!(TokenKind::DotDotDot, "...")
                } else if self.peek_byte() == Some(b'.') {
                    self.pos += 1;
                    tok!(TokenKind::DotDot, "..")
                } else {
                    tok!(TokenKind::Dot, ".")
                }
            }
            _ => {
                self.pos = start;
                self.read_punct_name(start)
            }
        }
    }

    /// A run of general punctuation characters forms a multi-char operator
    /// identifier (e.g. `+`, `*`, `<=>`, `/`).
    fn read_punct_name(&mut self, start: usize) -> Token {
        fn is_punct_char(b: u8) -> bool {
            matches!(
                b,
                b'+' | b'-' | b'*' | b'/' | b'%' | b'^' | b'&' | b'~' | b'?' | b'\\'
            )
        }
        while self.peek_byte().map(is_punct_char).unwrap_or(false) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("").to_string();
        let position = self.position_for(start);
        if text.is_empty() {
            self.pos += 1;
            return self.error_token(start, "Unrecognized character");
        }
        let symbol = self.intern(&text);
        Token::new(TokenKind::PunctName, position, text)
            .with_payload(TokenPayload::Symbol(symbol))
    }

    /// Read the next token, consuming input (or replaying the unget ring).
    pub fn next(&mut self) -> Token {
        if self.unget_count > 0 {
            self.unget_count -= 1;
            self.token_index = (self.token_index + 1) % RING_SIZE;
            if let Some(tok) = &self.ring[self.token_index] {
                return tok.clone();
            }
        }

        if let Some(err) = self.skip_whitespace_and_comments() {
            return self.push_token(err);
        }

        let start = self.pos;
        let is_first_on_line = start == self.line_start
            || self.input[self.line_start..start].iter().all(|b| *b <= 0x20);

        let Some(b) = self.peek_byte() else {
            let position = self.position_for(start);
            return self.push_token(Token::new(TokenKind::Eoi, position, ""));
        };

        let mut token = match b {
            b'"' => {
                if self.peek_at(1) == Some(b'"') && self.peek_at(2) == Some(b'"') {
                    self.pos += 3;
                    self.read_string_body(b"\"\"\"", start, true)
                } else {
                    self.pos += 1;
                    self.read_string_body(b"\"", start, true)
                }
            }
            b'\'' => {
                if self.peek_at(1) == Some(b'\'') {
                    self.pos += 2;
                    self.read_string_body(b"''", start, false)
                } else {
                    self.pos += 1;
                    let mut tok = self.read_string_body(b"'", start, false);
                    if let TokenPayload::Text(ref s) = tok.payload {
                        let mut chars = s.chars();
                        if let Some(ch) = chars.next() {
                            if chars.next().is_none() {
                                let cp = ch as u32;
                                tok = if cp > 0x7F {
                                    Token::new(TokenKind::Uni, tok.position.clone(), tok.text.clone())
                                        .with_payload(TokenPayload::Uni(cp))
                                } else {
                                    Token::new(TokenKind::Char, tok.position.clone(), tok.text.clone())
                                        .with_payload(TokenPayload::Char(cp as u8))
                                };
                            }
                        }
                    }
                    tok
                }
            }
            b'#' => {
                self.pos += 1;
                self.read_loanword(start)
            }
            b'.' if self.peek_at(1).map(|d| d.is_ascii_digit()).unwrap_or(false) => {
                self.read_number(start)
            }
            b'0'..=b'9' => self.read_number(start),
            b if Self::is_ident_start(b) => self.read_identifier(start),
            b'{' | b'}' | b'(' | b')' | b'[' | b']' | b',' | b';' | b':' | b'`' | b'|' | b'@'
            | b'=' | b'!' | b'<' | b'>' | b'.' => self.read_punctuation(start),
            _ => self.read_punct_name(start),
        };
        token.is_first_content_on_line = is_first_on_line;
        self.push_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn lex_all(src: &str) -> Vec<Token> {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let bytes = src.as_bytes();
        let mut lexer = Lexer::new(bytes, 0, bytes.len(), "test.sm", 1, symbols);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next();
            if tok.kind == TokenKind::Eoi {
                break;
            }
            tokens.push(tok);
        }
        tokens
    }

    #[test]
    fn lexes_simple_arithmetic() {
        let tokens = lex_all("1 + 2");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind, TokenKind::Integer32);
        assert_eq!(tokens[1].kind, TokenKind::PunctName);
        assert_eq!(tokens[2].kind, TokenKind::Integer32);
    }

    #[test]
    fn identifier_round_trips_through_symbol_table() {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let bytes = b"hello-world";
        let mut lexer = Lexer::new(bytes, 0, bytes.len(), "t.sm", 1, symbols.clone());
        let tok = lexer.next();
        assert_eq!(tok.kind, TokenKind::AlphaName);
        if let TokenPayload::Symbol(sym) = tok.payload {
            assert_eq!(symbols.borrow().get_name(sym), "hello-world");
        } else {
            panic!("expected symbol payload");
        }
    }

    #[test]
    fn numeric_bases_round_trip() {
        let tokens = lex_all("0xFF 0b101 0o17 42");
        assert!(matches!(tokens[0].payload, TokenPayload::Int32(255)));
        assert!(matches!(tokens[1].payload, TokenPayload::Int32(5)));
        assert!(matches!(tokens[2].payload, TokenPayload::Int32(15)));
        assert!(matches!(tokens[3].payload, TokenPayload::Int32(42)));
    }

    #[test]
    fn numeric_suffixes_select_width() {
        let tokens = lex_all("5t 5s 5L 5x");
        assert_eq!(tokens[0].kind, TokenKind::Byte);
        assert_eq!(tokens[1].kind, TokenKind::Integer16);
        assert_eq!(tokens[2].kind, TokenKind::Integer64);
        assert_eq!(tokens[3].kind, TokenKind::Integer128);
    }

    #[test]
    fn real_suffix_x_is_an_error() {
        let tokens = lex_all("5.0x");
        assert_eq!(tokens[0].kind, TokenKind::Error);
    }

    #[test]
    fn unget_symmetry() {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let bytes = b"a b";
        let mut lexer = Lexer::new(bytes, 0, bytes.len(), "t.sm", 1, symbols);
        let first = lexer.next();
        lexer.unget();
        let replayed = lexer.next();
        assert_eq!(first.kind, replayed.kind);
        assert_eq!(first.text, replayed.text);
    }

    #[test]
    fn peek_does_not_consume() {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let bytes = b"a b";
        let mut lexer = Lexer::new(bytes, 0, bytes.len(), "t.sm", 1, symbols);
        let kind = lexer.peek();
        assert_eq!(kind, TokenKind::AlphaName);
        let tok = lexer.next();
        assert_eq!(tok.kind, TokenKind::AlphaName);
        assert_eq!(tok.text.as_ref(), "a");
    }

    #[test]
    fn string_with_escapes() {
        let tokens = lex_all(r#""hi\n\t!""#);
        assert_eq!(tokens[0].kind, TokenKind::DynString);
        if let TokenPayload::Text(s) = &tokens[0].payload {
            assert_eq!(s.as_ref(), "hi\n\t!");
        } else {
            panic!("expected text payload");
        }
    }

    #[test]
    fn raw_string_has_no_escapes() {
        let tokens = lex_all(r#"'hi\n'"#);
        assert_eq!(tokens[0].kind, TokenKind::RawString);
        if let TokenPayload::Text(s) = &tokens[0].payload {
            assert_eq!(s.as_ref(), "hi\\n");
        } else {
            panic!("expected text payload");
        }
    }

    #[test]
    fn ruler_comment_is_skipped() {
        let tokens = lex_all("1\n-----\n2");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn block_comment_tracks_newlines() {
        let tokens = lex_all("1 /* line1\nline2 */ 2");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].position.line, 2);
    }

    #[test]
    fn regex_loanword_compiles() {
        let tokens = lex_all("#/[a-z]+/i");
        assert_eq!(tokens[0].kind, TokenKind::LoanwordRegex);
        assert!(matches!(tokens[0].payload, TokenPayload::Regex(_)));
    }

    #[test]
    fn unknown_loanword_is_an_error() {
        let tokens = lex_all("#bogus");
        assert_eq!(tokens[0].kind, TokenKind::Error);
    }

    #[test]
    fn dotdotdot_is_distinguished_from_dot() {
        let tokens = lex_all(". .. ...");
        assert_eq!(tokens[0].kind, TokenKind::Dot);
        assert_eq!(tokens[1].kind, TokenKind::DotDot);
        assert_eq!(tokens[2].kind, TokenKind::DotDotDot);
    }

    #[test]
    fn equal_without_whitespace_is_distinguished() {
        let tokens = lex_all("x=1 y = 1");
        assert_eq!(tokens[1].kind, TokenKind::EqualWithoutWhitespace);
        assert_eq!(tokens[4].kind, TokenKind::Equal);
    }
}
