use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes a single bencode value from `data`.
///
/// The input must contain exactly one complete value; trailing bytes are an
/// error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut dec = Decoder::new(data);
    let value = dec.value(0)?;
    if !dec.at_end() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Returns the raw encoded bytes of `key`'s value inside a top-level
/// dictionary, without building any [`Value`].
///
/// Metainfo parsing uses this to hash the `info` dictionary exactly as it
/// appears on disk; re-encoding a decoded dictionary would lose byte-level
/// fidelity if the source were non-canonical.
pub fn raw_entry<'a>(data: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>, BencodeError> {
    let mut dec = Decoder::new(data);
    dec.expect(b'd')?;
    while dec.peek()? != b'e' {
        let entry_key = dec.byte_string()?;
        let start = dec.pos;
        dec.skip_value(0)?;
        if entry_key.as_ref() == key {
            return Ok(Some(&data[start..dec.pos]));
        }
    }
    Ok(None)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn bump(&mut self) -> Result<u8, BencodeError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, marker: u8) -> Result<(), BencodeError> {
        let b = self.bump()?;
        if b != marker {
            return Err(BencodeError::UnexpectedByte(b));
        }
        Ok(())
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        match self.peek()? {
            b'i' => self.integer().map(Value::Integer),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            b => Err(BencodeError::UnexpectedByte(b)),
        }
    }

    fn integer(&mut self) -> Result<i64, BencodeError> {
        self.expect(b'i')?;
        let start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }
        let digits = &self.data[start..self.pos];
        self.pos += 1; // consume 'e'

        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger)?;
        if text.is_empty() || text == "-" {
            return Err(BencodeError::InvalidInteger);
        }
        // "i-0e" and zero-padded forms are forbidden by BEP-3.
        let magnitude = text.strip_prefix('-').unwrap_or(text);
        if magnitude.len() > 1 && magnitude.starts_with('0') {
            return Err(BencodeError::InvalidInteger);
        }
        if text == "-0" {
            return Err(BencodeError::InvalidInteger);
        }
        text.parse().map_err(|_| BencodeError::InvalidInteger)
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let start = self.pos;
        while self.peek()? != b':' {
            self.pos += 1;
        }
        let len_text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| BencodeError::InvalidLength)?;
        let len: usize = len_text.parse().map_err(|_| BencodeError::InvalidLength)?;
        self.pos += 1; // consume ':'

        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(BencodeError::UnexpectedEof)?;
        let bytes = Bytes::copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.expect(b'l')?;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.expect(b'd')?;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }

    /// Advances past one value without materializing it.
    fn skip_value(&mut self, depth: usize) -> Result<(), BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        match self.peek()? {
            b'i' => {
                self.integer()?;
            }
            b'0'..=b'9' => {
                self.byte_string()?;
            }
            b'l' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.skip_value(depth + 1)?;
                }
                self.pos += 1;
            }
            b'd' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.byte_string()?;
                    self.skip_value(depth + 1)?;
                }
                self.pos += 1;
            }
            b => return Err(BencodeError::UnexpectedByte(b)),
        }
        Ok(())
    }
}
