//! Reader for PHP `serialize()` output.
//!
//! Attachment metadata is stored as a PHP-serialized array. Only the value
//! forms that appear in stored metadata are supported: `N`, `b`, `i`, `d`,
//! `s`, `a`, and `O` (objects are read as arrays of their properties).

use crate::error::DecodeError;

/// A decoded PHP value.
#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Ordered key/value pairs; keys are `Int` or `String`.
    Array(Vec<(PhpValue, PhpValue)>),
}

impl PhpValue {
    /// Look up a string key in an array value.
    pub fn get(&self, key: &str) -> Option<&PhpValue> {
        match self {
            PhpValue::Array(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, PhpValue::String(s) if s == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhpValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PhpValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, PhpValue::Array(_))
    }
}

/// Decode a complete PHP-serialized value.
///
/// Trailing bytes after the first value are rejected.
pub fn unserialize(input: &str) -> Result<PhpValue, DecodeError> {
    let mut reader = Reader {
        input: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = reader.value()?;
    if reader.pos != reader.input.len() {
        return Err(reader.error("trailing data"));
    }
    Ok(value)
}

/// Deepest array/object nesting accepted before a blob is rejected.
pub const MAX_DEPTH: usize = 64;

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn error(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::Serialized {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn next(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8) -> Result<(), DecodeError> {
        let got = self.next()?;
        if got != expected {
            self.pos -= 1;
            return Err(self.error(format!(
                "expected '{}', found '{}'",
                expected as char, got as char
            )));
        }
        Ok(())
    }

    /// Read raw bytes up to (not including) `terminator`, consuming it.
    fn until(&mut self, terminator: u8) -> Result<&'a str, DecodeError> {
        let input = self.input;
        let start = self.pos;
        let len = input[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| self.error(format!("missing '{}'", terminator as char)))?;
        self.pos = start + len + 1;
        std::str::from_utf8(&input[start..start + len]).map_err(|_| DecodeError::Serialized {
            offset: start,
            reason: "invalid utf-8 in scalar".to_string(),
        })
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        self.until(b':')?
            .parse::<usize>()
            .map_err(|e| DecodeError::Serialized {
                offset: start,
                reason: format!("invalid length: {}", e),
            })
    }

    fn value(&mut self) -> Result<PhpValue, DecodeError> {
        let tag = self.next()?;
        match tag {
            b'N' => {
                self.expect(b';')?;
                Ok(PhpValue::Null)
            }
            b'b' => {
                self.expect(b':')?;
                match self.until(b';')? {
                    "0" => Ok(PhpValue::Bool(false)),
                    "1" => Ok(PhpValue::Bool(true)),
                    other => Err(self.error(format!("invalid bool '{}'", other))),
                }
            }
            b'i' => {
                self.expect(b':')?;
                let start = self.pos;
                let raw = self.until(b';')?;
                raw.parse::<i64>()
                    .map(PhpValue::Int)
                    .map_err(|e| DecodeError::Serialized {
                        offset: start,
                        reason: format!("invalid int '{}': {}", raw, e),
                    })
            }
            b'd' => {
                self.expect(b':')?;
                let start = self.pos;
                let raw = self.until(b';')?;
                let parsed = match raw {
                    "INF" => Ok(f64::INFINITY),
                    "-INF" => Ok(f64::NEG_INFINITY),
                    "NAN" => Ok(f64::NAN),
                    _ => raw.parse::<f64>(),
                };
                parsed.map(PhpValue::Float).map_err(|e| DecodeError::Serialized {
                    offset: start,
                    reason: format!("invalid float '{}': {}", raw, e),
                })
            }
            b's' => {
                self.expect(b':')?;
                let s = self.string_body()?;
                self.expect(b';')?;
                Ok(PhpValue::String(s))
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.length()?;
                self.entries(count)
            }
            b'O' => {
                // O:<len>:"<class>":<count>:{...}
                self.expect(b':')?;
                self.string_body()?;
                self.expect(b':')?;
                let count = self.length()?;
                self.entries(count)
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unknown type tag '{}'", other as char)))
            }
        }
    }

    /// `<len>:"<bytes>"` where `len` counts bytes, not characters.
    fn string_body(&mut self) -> Result<String, DecodeError> {
        let len = self.length()?;
        self.expect(b'"')?;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.error("string length exceeds input"))?;
        self.pos = end;
        self.expect(b'"')?;
        Ok(String::from_utf8_lossy(&self.input[start..end]).into_owned())
    }

    fn entries(&mut self, count: usize) -> Result<PhpValue, DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {}", MAX_DEPTH)));
        }
        self.expect(b'{')?;
        self.depth += 1;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let key = self.value()?;
            if !matches!(key, PhpValue::Int(_) | PhpValue::String(_)) {
                return Err(self.error("array key must be int or string"));
            }
            let value = self.value()?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        self.depth -= 1;
        Ok(PhpValue::Array(entries))
    }
}
