//! Recursive-descent notation decoder.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{DecodeError, DecodeErrorKind, Result};
use crate::map::Map;
use crate::value::Value;

/// Default limit on array/map nesting.
pub const DEFAULT_MAX_DEPTH: usize = 128;

const UUID_TEXT_LEN: usize = 36;

/// Decode one notation value from `input`.
///
/// Leading and trailing ASCII whitespace is ignored; anything else after the
/// value is an error. Maps with duplicate keys keep the last value (see
/// [`Map::insert`]).
pub fn decode(input: &[u8]) -> Result<Value> {
    decode_with_max_depth(input, DEFAULT_MAX_DEPTH)
}

/// [`decode`] for text input.
pub fn decode_str(input: &str) -> Result<Value> {
    decode(input.as_bytes())
}

/// [`decode`] with an explicit container nesting limit.
pub fn decode_with_max_depth(input: &[u8], max_depth: usize) -> Result<Value> {
    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
        max_depth,
    };
    parser.skip_ws();
    if let Some(format) = foreign_format(&input[parser.pos..]) {
        return Err(parser.error(DecodeErrorKind::UnsupportedFormat(format)));
    }
    let value = parser.parse_value()?;
    parser.skip_ws();
    if parser.pos != input.len() {
        return Err(parser.error(DecodeErrorKind::TrailingData));
    }
    Ok(value)
}

const BINARY_HEADERS: [&[u8]; 2] = [b"<? LLSD/Binary ?>", b"<?llsd/binary?>"];

/// Names the other LLSD serializations. Notation never starts with `<`.
fn foreign_format(input: &[u8]) -> Option<&'static str> {
    if BINARY_HEADERS.iter().any(|header| input.starts_with(header)) {
        Some("binary")
    } else if input.first() == Some(&b'<') {
        Some("XML")
    } else {
        None
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(self.pos, kind)
    }

    fn error_at(&self, offset: usize, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(offset, kind)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Result<u8> {
        let byte = self
            .peek()
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEof))?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        match self.peek() {
            Some(byte) if byte == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(byte) => Err(self.error(DecodeErrorKind::UnexpectedByte(byte))),
            None => Err(self.error(DecodeErrorKind::UnexpectedEof)),
        }
    }

    /// Skip ASCII whitespace, returning whether anything was skipped.
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        self.pos != start
    }

    fn eat_keyword(&mut self, keyword: &[u8]) -> bool {
        if self.input[self.pos..].starts_with(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(self.error(DecodeErrorKind::DepthLimitExceeded(self.max_depth)));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_ws();
        let start = self.pos;
        let tag = self
            .peek()
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEof))?;

        match tag {
            b'!' => {
                self.pos += 1;
                Ok(Value::Undefined)
            }
            b'1' => {
                self.pos += 1;
                Ok(Value::Boolean(true))
            }
            b'0' => {
                self.pos += 1;
                Ok(Value::Boolean(false))
            }
            b't' | b'T' => {
                if !self.eat_keyword(b"true") && !self.eat_keyword(b"TRUE") {
                    self.pos += 1;
                }
                Ok(Value::Boolean(true))
            }
            b'f' | b'F' => {
                if !self.eat_keyword(b"false") && !self.eat_keyword(b"FALSE") {
                    self.pos += 1;
                }
                Ok(Value::Boolean(false))
            }
            b'i' => {
                self.pos += 1;
                self.parse_integer()
            }
            b'r' => {
                self.pos += 1;
                self.parse_real()
            }
            b'u' => {
                self.pos += 1;
                self.parse_uuid()
            }
            b'\'' | b'"' => self.parse_quoted().map(Value::String),
            b's' => {
                self.pos += 1;
                let bytes = self.parse_sized()?;
                into_utf8(bytes, start).map(Value::String)
            }
            b'd' => {
                self.pos += 1;
                self.parse_date()
            }
            b'l' => {
                self.pos += 1;
                self.parse_quoted().map(Value::Uri)
            }
            b'b' => {
                self.pos += 1;
                self.parse_binary()
            }
            b'[' => self.parse_array(),
            b'{' => self.parse_map(),
            other => Err(self.error_at(start, DecodeErrorKind::UnknownTypeTag(other))),
        }
    }

    /// Consume a run of bytes allowed in a number token.
    fn number_token(&mut self, allow: impl Fn(u8) -> bool) -> Result<&'a str> {
        let input = self.input;
        let start = self.pos;
        while matches!(self.peek(), Some(b) if allow(b)) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error(DecodeErrorKind::InvalidNumber));
        }
        // Only ASCII bytes pass `allow`.
        std::str::from_utf8(&input[start..self.pos])
            .map_err(|_| self.error_at(start, DecodeErrorKind::InvalidNumber))
    }

    fn parse_integer(&mut self) -> Result<Value> {
        let start = self.pos;
        let token = self.number_token(|b| b.is_ascii_digit() || b == b'-' || b == b'+')?;
        token
            .parse::<i32>()
            .map(Value::Integer)
            .map_err(|_| self.error_at(start, DecodeErrorKind::InvalidNumber))
    }

    fn parse_real(&mut self) -> Result<Value> {
        let start = self.pos;
        // Letters cover `nan`, `inf` and `infinity` in any case.
        let token = self.number_token(|b| {
            b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'+'
        })?;
        token
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| self.error_at(start, DecodeErrorKind::InvalidNumber))
    }

    fn parse_uuid(&mut self) -> Result<Value> {
        let start = self.pos;
        let end = start + UUID_TEXT_LEN;
        if end > self.input.len() {
            return Err(self.error_at(self.input.len(), DecodeErrorKind::UnexpectedEof));
        }
        let uuid = Uuid::try_parse_ascii(&self.input[start..end])
            .map_err(|_| self.error_at(start, DecodeErrorKind::InvalidUuid))?;
        self.pos = end;
        Ok(Value::Uuid(uuid))
    }

    fn parse_date(&mut self) -> Result<Value> {
        let start = self.pos;
        let text = self.parse_quoted()?;
        parse_date_text(&text)
            .map(Value::Date)
            .ok_or_else(|| self.error_at(start, DecodeErrorKind::InvalidDate))
    }

    fn parse_binary(&mut self) -> Result<Value> {
        let start = self.pos;
        if self.peek() == Some(b'(') {
            return self.parse_sized().map(Value::Binary);
        }
        if self.eat_keyword(b"64") {
            let body_start = self.pos;
            let text = self.parse_quoted()?;
            let compact: Vec<u8> = text
                .bytes()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            return STANDARD
                .decode(compact)
                .map(Value::Binary)
                .map_err(|_| self.error_at(body_start, DecodeErrorKind::InvalidBinary));
        }
        if self.eat_keyword(b"16") {
            let body_start = self.pos;
            let text = self.parse_quoted()?;
            return hex::decode(text.trim())
                .map(Value::Binary)
                .map_err(|_| self.error_at(body_start, DecodeErrorKind::InvalidBinary));
        }
        match self.peek() {
            Some(byte) => Err(self.error_at(start, DecodeErrorKind::UnexpectedByte(byte))),
            None => Err(self.error(DecodeErrorKind::UnexpectedEof)),
        }
    }

    /// `(N)"<N raw bytes>"`, with either quote character.
    fn parse_sized(&mut self) -> Result<Vec<u8>> {
        self.expect(b'(')?;
        let size_start = self.pos;
        let size = self
            .number_token(|b| b.is_ascii_digit())?
            .parse::<usize>()
            .map_err(|_| self.error_at(size_start, DecodeErrorKind::InvalidNumber))?;
        self.expect(b')')?;

        let quote_pos = self.pos;
        let quote = self.next_byte()?;
        if quote != b'"' && quote != b'\'' {
            return Err(self.error_at(quote_pos, DecodeErrorKind::UnexpectedByte(quote)));
        }

        let body_start = self.pos;
        let body_end = body_start
            .checked_add(size)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| self.error_at(self.input.len(), DecodeErrorKind::UnexpectedEof))?;
        let body = self.input[body_start..body_end].to_vec();
        self.pos = body_end;

        match self.peek() {
            Some(byte) if byte == quote => {
                self.pos += 1;
                Ok(body)
            }
            Some(_) | None => Err(self.error_at(quote_pos, DecodeErrorKind::UnterminatedString)),
        }
    }

    /// A `'…'` or `"…"` string with backslash escapes.
    fn parse_quoted(&mut self) -> Result<String> {
        let open = self.pos;
        let quote = match self.peek() {
            Some(byte @ (b'\'' | b'"')) => byte,
            Some(byte) => return Err(self.error(DecodeErrorKind::UnexpectedByte(byte))),
            None => return Err(self.error(DecodeErrorKind::UnexpectedEof)),
        };
        self.pos += 1;

        let mut bytes = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Err(self.error_at(open, DecodeErrorKind::UnterminatedString));
            };
            self.pos += 1;

            if byte == quote {
                break;
            }
            if byte != b'\\' {
                bytes.push(byte);
                continue;
            }

            let escape_pos = self.pos - 1;
            let Some(escaped) = self.peek() else {
                return Err(self.error_at(open, DecodeErrorKind::UnterminatedString));
            };
            self.pos += 1;
            let decoded = match escaped {
                b'a' => 0x07,
                b'b' => 0x08,
                b'f' => 0x0c,
                b'n' => b'\n',
                b'r' => b'\r',
                b't' => b'\t',
                b'v' => 0x0b,
                b'x' => {
                    let digits = self
                        .input
                        .get(self.pos..self.pos + 2)
                        .ok_or_else(|| self.error_at(escape_pos, DecodeErrorKind::InvalidEscape))?;
                    let mut out = [0u8; 1];
                    hex::decode_to_slice(digits, &mut out)
                        .map_err(|_| self.error_at(escape_pos, DecodeErrorKind::InvalidEscape))?;
                    self.pos += 2;
                    out[0]
                }
                other => other,
            };
            bytes.push(decoded);
        }

        into_utf8(bytes, open)
    }

    fn parse_array(&mut self) -> Result<Value> {
        self.enter()?;
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
                None => return Err(self.error(DecodeErrorKind::UnexpectedEof)),
            }

            items.push(self.parse_value()?);
            self.after_item(b']')?;
        }

        self.leave();
        Ok(Value::Array(items))
    }

    fn parse_map(&mut self) -> Result<Value> {
        self.enter()?;
        self.pos += 1;
        let mut map = Map::new();

        loop {
            self.skip_ws();
            let key_start = self.pos;
            let key = match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\'' | b'"') => self.parse_quoted()?,
                Some(b's') => {
                    self.pos += 1;
                    into_utf8(self.parse_sized()?, key_start)?
                }
                Some(byte) => return Err(self.error(DecodeErrorKind::UnexpectedByte(byte))),
                None => return Err(self.error(DecodeErrorKind::UnexpectedEof)),
            };

            self.skip_ws();
            self.expect(b':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.after_item(b'}')?;
        }

        self.leave();
        Ok(Value::Map(map))
    }

    /// Consume the separator after a container item: a comma, whitespace,
    /// or nothing when the closing bracket follows.
    fn after_item(&mut self, close: u8) -> Result<()> {
        let spaced = self.skip_ws();
        match self.peek() {
            Some(b',') => {
                self.pos += 1;
                Ok(())
            }
            Some(byte) if byte == close || spaced => Ok(()),
            Some(byte) => Err(self.error(DecodeErrorKind::UnexpectedByte(byte))),
            None => Err(self.error(DecodeErrorKind::UnexpectedEof)),
        }
    }
}

fn into_utf8(bytes: Vec<u8>, offset: usize) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| DecodeError::new(offset, DecodeErrorKind::InvalidUtf8))
}

fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    // Years outside 0000-9999 carry an explicit sign (`+10000-01-01T...`),
    // which strict RFC 3339 rejects.
    if let Ok(date) = text.parse::<DateTime<Utc>>() {
        return Some(date);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
