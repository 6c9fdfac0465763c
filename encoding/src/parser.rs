use std::fmt;

use crate::types::{Encoding, Field, Qualifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingErrorKind {
    UnexpectedEnd,
    UnexpectedChar(char),
    InvalidArrayLength,
    InvalidBitFieldWidth,
    UnterminatedName,
    TrailingInput,
    EmptySignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingError {
    pub kind: EncodingErrorKind,
    /// Byte offset into the input where parsing stopped.
    pub offset: usize,
}

impl EncodingError {
    pub(crate) fn new(kind: EncodingErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EncodingErrorKind::UnexpectedEnd => {
                write!(f, "unexpected end of encoding")?
            }
            EncodingErrorKind::UnexpectedChar(c) => {
                write!(f, "unexpected character {c:?}")?
            }
            EncodingErrorKind::InvalidArrayLength => {
                write!(f, "array length is missing or too large")?
            }
            EncodingErrorKind::InvalidBitFieldWidth => {
                write!(f, "bitfield width is missing or too large")?
            }
            EncodingErrorKind::UnterminatedName => {
                write!(f, "unterminated quoted name")?
            }
            EncodingErrorKind::TrailingInput => {
                write!(f, "trailing input after encoding")?
            }
            EncodingErrorKind::EmptySignature => {
                write!(f, "method signature has no return type")?
            }
        }
        write!(f, " (offset {})", self.offset)
    }
}

impl std::error::Error for EncodingError {}

/// Parse exactly one type encoding; the whole input must be consumed.
pub fn parse(text: &str) -> Result<Encoding, EncodingError> {
    let mut cursor = Cursor::new(text);
    let ty = cursor.parse_type()?;
    if !cursor.at_end() {
        return Err(cursor.error(EncodingErrorKind::TrailingInput));
    }
    Ok(ty)
}

/// Byte cursor over an encoding string.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn next_or_end(&mut self) -> Result<u8, EncodingError> {
        self.advance()
            .ok_or_else(|| self.error(EncodingErrorKind::UnexpectedEnd))
    }

    pub(crate) fn error(&self, kind: EncodingErrorKind) -> EncodingError {
        EncodingError::new(kind, self.pos)
    }

    fn expect(&mut self, want: u8) -> Result<(), EncodingError> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(EncodingErrorKind::UnexpectedChar(c as char))),
            None => Err(self.error(EncodingErrorKind::UnexpectedEnd)),
        }
    }

    fn digits(&mut self) -> Option<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    /// Optional frame offset after a type in a method signature. May be
    /// negative for arguments passed below the frame base.
    pub(crate) fn parse_offset(&mut self) -> Option<isize> {
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }
        match self.digits() {
            Some(value) => {
                let value = value as isize;
                Some(if negative { -value } else { value })
            }
            None => {
                self.pos = start;
                None
            }
        }
    }

    /// Text between the current position and the closing `"`.
    fn quoted(&mut self) -> Result<String, EncodingError> {
        let start = self.pos;
        while let Some(c) = self.advance() {
            if c == b'"' {
                let name = &self.bytes[start..self.pos - 1];
                return Ok(String::from_utf8_lossy(name).into_owned());
            }
        }
        Err(EncodingError::new(EncodingErrorKind::UnterminatedName, start))
    }

    pub(crate) fn parse_type(&mut self) -> Result<Encoding, EncodingError> {
        let mut qualifiers = Qualifiers::empty();
        while let Some(q) = self.peek().and_then(Qualifiers::from_char) {
            qualifiers |= q;
            self.pos += 1;
        }

        let base = self.parse_base()?;
        if qualifiers.is_empty() {
            Ok(base)
        } else {
            Ok(Encoding::Qualified {
                qualifiers,
                inner: Box::new(base),
            })
        }
    }

    fn parse_base(&mut self) -> Result<Encoding, EncodingError> {
        let c = self.next_or_end()?;
        if let Some(ty) = Encoding::primitive(c) {
            return Ok(ty);
        }

        match c {
            b'@' => match self.peek() {
                Some(b'?') => {
                    self.pos += 1;
                    Ok(Encoding::Block)
                }
                Some(b'"') => {
                    self.pos += 1;
                    Ok(Encoding::NamedId(self.quoted()?))
                }
                _ => Ok(Encoding::Id),
            },
            b'^' => Ok(Encoding::Pointer(Box::new(self.parse_type()?))),
            b'b' => {
                let bits = self
                    .digits()
                    .and_then(|bits| u32::try_from(bits).ok())
                    .ok_or_else(|| {
                        self.error(EncodingErrorKind::InvalidBitFieldWidth)
                    })?;
                Ok(Encoding::BitField(bits))
            }
            b'[' => {
                let len = self
                    .digits()
                    .and_then(|len| usize::try_from(len).ok())
                    .ok_or_else(|| {
                        self.error(EncodingErrorKind::InvalidArrayLength)
                    })?;
                let element = self.parse_type()?;
                self.expect(b']')?;
                Ok(Encoding::Array {
                    len,
                    element: Box::new(element),
                })
            }
            b'{' => {
                let (name, fields) = self.parse_aggregate(b'}')?;
                Ok(Encoding::Struct { name, fields })
            }
            b'(' => {
                let (name, fields) = self.parse_aggregate(b')')?;
                Ok(Encoding::Union { name, fields })
            }
            other => {
                self.pos -= 1;
                Err(self.error(EncodingErrorKind::UnexpectedChar(other as char)))
            }
        }
    }

    fn parse_aggregate(
        &mut self,
        close: u8,
    ) -> Result<(String, Option<Vec<Field>>), EncodingError> {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'=') => break,
                Some(c) if c == close => break,
                Some(_) => self.pos += 1,
                None => return Err(self.error(EncodingErrorKind::UnexpectedEnd)),
            }
        }
        let name = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();

        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok((name, None));
        }

        // consume '='
        self.pos += 1;
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok((name, Some(fields)));
                }
                Some(b'"') => {
                    self.pos += 1;
                    let field_name = self.quoted()?;
                    let ty = self.parse_type()?;
                    fields.push(Field::named(field_name, ty));
                }
                Some(_) => fields.push(Field::new(self.parse_type()?)),
                None => return Err(self.error(EncodingErrorKind::UnexpectedEnd)),
            }
        }
    }
}
