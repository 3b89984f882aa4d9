//! AMQP 1.0 type system.
//!
//! [`Value`] covers the primitive and compound types the auth gate can meet
//! on the wire. Encoding always picks the most compact constructor;
//! decoding accepts every width a peer may legally choose.
//!
//! Decimal types are not supported and decode as an error. Arrays of
//! described values are likewise rejected.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Symbol-keyed map used for `open` properties and error info.
pub type Fields = BTreeMap<String, Value>;

/// Maximum nesting of compound values accepted by the decoder.
const MAX_DEPTH: usize = 32;

mod code {
    pub const DESCRIBED: u8 = 0x00;
    pub const NULL: u8 = 0x40;
    pub const TRUE: u8 = 0x41;
    pub const FALSE: u8 = 0x42;
    pub const UINT0: u8 = 0x43;
    pub const ULONG0: u8 = 0x44;
    pub const LIST0: u8 = 0x45;
    pub const UBYTE: u8 = 0x50;
    pub const BYTE: u8 = 0x51;
    pub const SMALLUINT: u8 = 0x52;
    pub const SMALLULONG: u8 = 0x53;
    pub const SMALLINT: u8 = 0x54;
    pub const SMALLLONG: u8 = 0x55;
    pub const BOOLEAN: u8 = 0x56;
    pub const USHORT: u8 = 0x60;
    pub const SHORT: u8 = 0x61;
    pub const UINT: u8 = 0x70;
    pub const INT: u8 = 0x71;
    pub const FLOAT: u8 = 0x72;
    pub const CHAR: u8 = 0x73;
    pub const ULONG: u8 = 0x80;
    pub const LONG: u8 = 0x81;
    pub const DOUBLE: u8 = 0x82;
    pub const TIMESTAMP: u8 = 0x83;
    pub const UUID: u8 = 0x98;
    pub const VBIN8: u8 = 0xa0;
    pub const STR8: u8 = 0xa1;
    pub const SYM8: u8 = 0xa3;
    pub const VBIN32: u8 = 0xb0;
    pub const STR32: u8 = 0xb1;
    pub const SYM32: u8 = 0xb3;
    pub const LIST8: u8 = 0xc0;
    pub const MAP8: u8 = 0xc1;
    pub const LIST32: u8 = 0xd0;
    pub const MAP32: u8 = 0xd1;
    pub const ARRAY8: u8 = 0xe0;
    pub const ARRAY32: u8 = 0xf0;
}

/// An AMQP 1.0 value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// `null`
    #[default]
    Null,
    /// `boolean`
    Bool(bool),
    /// `ubyte`
    Ubyte(u8),
    /// `ushort`
    Ushort(u16),
    /// `uint`
    Uint(u32),
    /// `ulong`
    Ulong(u64),
    /// `byte`
    Byte(i8),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `char`
    Char(char),
    /// `timestamp` (milliseconds since the Unix epoch)
    Timestamp(i64),
    /// `uuid`
    Uuid([u8; 16]),
    /// `binary`
    Binary(Bytes),
    /// `string`
    String(String),
    /// `symbol`
    Symbol(String),
    /// `list`
    List(Vec<Value>),
    /// `map`, in wire order
    Map(Vec<(Value, Value)>),
    /// `array`; all elements share one constructor
    Array(Vec<Value>),
    /// Described type: descriptor and value
    Described(Box<Value>, Box<Value>),
}

impl Value {
    /// Build a symbol value.
    pub fn symbol(s: impl Into<String>) -> Self {
        Self::Symbol(s.into())
    }

    /// Build a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Build a described value.
    #[must_use]
    pub fn described(descriptor: Value, value: Value) -> Self {
        Self::Described(Box::new(descriptor), Box::new(value))
    }

    /// Whether this is `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text of a string or symbol.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any unsigned integer to `u64`.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Ubyte(v) => Some(u64::from(*v)),
            Self::Ushort(v) => Some(u64::from(*v)),
            Self::Uint(v) => Some(u64::from(*v)),
            Self::Ulong(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the entries of a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Borrow the elements of a list or array.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a string-or-symbol key in a map value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    // ── Encoding ────────────────────────────────────────────────────────────

    /// Append the compact encoding of this value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Self::Null => buf.put_u8(code::NULL),
            Self::Bool(true) => buf.put_u8(code::TRUE),
            Self::Bool(false) => buf.put_u8(code::FALSE),
            Self::Ubyte(v) => {
                buf.put_u8(code::UBYTE);
                buf.put_u8(*v);
            }
            Self::Ushort(v) => {
                buf.put_u8(code::USHORT);
                buf.put_u16(*v);
            }
            Self::Uint(0) => buf.put_u8(code::UINT0),
            Self::Uint(v) => match u8::try_from(*v) {
                Ok(small) => {
                    buf.put_u8(code::SMALLUINT);
                    buf.put_u8(small);
                }
                Err(_) => {
                    buf.put_u8(code::UINT);
                    buf.put_u32(*v);
                }
            },
            Self::Ulong(0) => buf.put_u8(code::ULONG0),
            Self::Ulong(v) => match u8::try_from(*v) {
                Ok(small) => {
                    buf.put_u8(code::SMALLULONG);
                    buf.put_u8(small);
                }
                Err(_) => {
                    buf.put_u8(code::ULONG);
                    buf.put_u64(*v);
                }
            },
            Self::Byte(v) => {
                buf.put_u8(code::BYTE);
                buf.put_i8(*v);
            }
            Self::Short(v) => {
                buf.put_u8(code::SHORT);
                buf.put_i16(*v);
            }
            Self::Int(v) => match i8::try_from(*v) {
                Ok(small) => {
                    buf.put_u8(code::SMALLINT);
                    buf.put_i8(small);
                }
                Err(_) => {
                    buf.put_u8(code::INT);
                    buf.put_i32(*v);
                }
            },
            Self::Long(v) => match i8::try_from(*v) {
                Ok(small) => {
                    buf.put_u8(code::SMALLLONG);
                    buf.put_i8(small);
                }
                Err(_) => {
                    buf.put_u8(code::LONG);
                    buf.put_i64(*v);
                }
            },
            Self::Float(v) => {
                buf.put_u8(code::FLOAT);
                buf.put_f32(*v);
            }
            Self::Double(v) => {
                buf.put_u8(code::DOUBLE);
                buf.put_f64(*v);
            }
            Self::Char(c) => {
                buf.put_u8(code::CHAR);
                buf.put_u32(u32::from(*c));
            }
            Self::Timestamp(v) => {
                buf.put_u8(code::TIMESTAMP);
                buf.put_i64(*v);
            }
            Self::Uuid(bytes) => {
                buf.put_u8(code::UUID);
                buf.put_slice(bytes);
            }
            Self::Binary(bytes) => put_variable(buf, code::VBIN8, code::VBIN32, bytes)?,
            Self::String(s) => put_variable(buf, code::STR8, code::STR32, s.as_bytes())?,
            Self::Symbol(s) => put_variable(buf, code::SYM8, code::SYM32, s.as_bytes())?,
            Self::List(items) if items.is_empty() => buf.put_u8(code::LIST0),
            Self::List(items) => {
                let mut body = BytesMut::new();
                for item in items {
                    item.encode(&mut body)?;
                }
                put_compound(buf, code::LIST8, code::LIST32, items.len(), &body)?;
            }
            Self::Map(entries) => {
                let mut body = BytesMut::new();
                for (k, v) in entries {
                    k.encode(&mut body)?;
                    v.encode(&mut body)?;
                }
                put_compound(buf, code::MAP8, code::MAP32, entries.len() * 2, &body)?;
            }
            Self::Array(items) => encode_array(items, buf)?,
            Self::Described(descriptor, value) => {
                buf.put_u8(code::DESCRIBED);
                descriptor.encode(buf)?;
                value.encode(buf)?;
            }
        }
        Ok(())
    }

    /// Constructor used when this value is an array element. Arrays always
    /// use the fixed or widest encoding so that every element shares it.
    fn array_constructor(&self) -> Result<u8> {
        Ok(match self {
            Self::Null => code::NULL,
            Self::Bool(_) => code::BOOLEAN,
            Self::Ubyte(_) => code::UBYTE,
            Self::Ushort(_) => code::USHORT,
            Self::Uint(_) => code::UINT,
            Self::Ulong(_) => code::ULONG,
            Self::Byte(_) => code::BYTE,
            Self::Short(_) => code::SHORT,
            Self::Int(_) => code::INT,
            Self::Long(_) => code::LONG,
            Self::Float(_) => code::FLOAT,
            Self::Double(_) => code::DOUBLE,
            Self::Char(_) => code::CHAR,
            Self::Timestamp(_) => code::TIMESTAMP,
            Self::Uuid(_) => code::UUID,
            Self::Binary(_) => code::VBIN32,
            Self::String(_) => code::STR32,
            Self::Symbol(_) => code::SYM32,
            Self::List(_) => code::LIST32,
            Self::Map(_) => code::MAP32,
            Self::Array(_) | Self::Described(..) => {
                return Err(Error::codec("nested or described array elements are not supported"));
            }
        })
    }

    /// Encode the body of an array element under its shared constructor.
    fn encode_element(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Self::Null => {}
            Self::Bool(v) => buf.put_u8(u8::from(*v)),
            Self::Ubyte(v) => buf.put_u8(*v),
            Self::Ushort(v) => buf.put_u16(*v),
            Self::Uint(v) => buf.put_u32(*v),
            Self::Ulong(v) => buf.put_u64(*v),
            Self::Byte(v) => buf.put_i8(*v),
            Self::Short(v) => buf.put_i16(*v),
            Self::Int(v) => buf.put_i32(*v),
            Self::Long(v) | Self::Timestamp(v) => buf.put_i64(*v),
            Self::Float(v) => buf.put_f32(*v),
            Self::Double(v) => buf.put_f64(*v),
            Self::Char(c) => buf.put_u32(u32::from(*c)),
            Self::Uuid(bytes) => buf.put_slice(bytes),
            Self::Binary(bytes) => put_len32(buf, bytes)?,
            Self::String(s) | Self::Symbol(s) => put_len32(buf, s.as_bytes())?,
            Self::List(items) => {
                let mut body = BytesMut::new();
                for item in items {
                    item.encode(&mut body)?;
                }
                put_wide_compound(buf, items.len(), &body)?;
            }
            Self::Map(entries) => {
                let mut body = BytesMut::new();
                for (k, v) in entries {
                    k.encode(&mut body)?;
                    v.encode(&mut body)?;
                }
                put_wide_compound(buf, entries.len() * 2, &body)?;
            }
            Self::Array(_) | Self::Described(..) => {
                return Err(Error::codec("nested or described array elements are not supported"));
            }
        }
        Ok(())
    }

    // ── Decoding ────────────────────────────────────────────────────────────

    /// Decode one value from the front of `buf`, advancing it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        decode_value(buf, 0)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Encode a [`Fields`] map with symbol keys.
#[must_use]
pub fn fields_to_value(fields: &Fields) -> Value {
    Value::Map(
        fields
            .iter()
            .map(|(k, v)| (Value::symbol(k.clone()), v.clone()))
            .collect(),
    )
}

/// Decode a [`Fields`] map. String keys are tolerated alongside symbols.
pub fn fields_from_value(value: Value) -> Result<Fields> {
    match value {
        Value::Null => Ok(Fields::new()),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| match k {
                Value::Symbol(s) | Value::String(s) => Ok((s, v)),
                other => Err(Error::codec(format!("fields key must be a symbol, got {other:?}"))),
            })
            .collect(),
        other => Err(Error::codec(format!("expected fields map, got {other:?}"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn put_variable(buf: &mut BytesMut, short: u8, long: u8, bytes: &[u8]) -> Result<()> {
    if let Ok(len) = u8::try_from(bytes.len()) {
        buf.put_u8(short);
        buf.put_u8(len);
        buf.put_slice(bytes);
        Ok(())
    } else {
        buf.put_u8(long);
        put_len32(buf, bytes)
    }
}

fn put_len32(buf: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| Error::codec("value exceeds 4 GiB"))?;
    buf.put_u32(len);
    buf.put_slice(bytes);
    Ok(())
}

/// Write a list or map with the 8-bit width when both size and count fit.
fn put_compound(
    buf: &mut BytesMut,
    short: u8,
    long: u8,
    count: usize,
    body: &[u8],
) -> Result<()> {
    match (u8::try_from(body.len() + 1), u8::try_from(count)) {
        (Ok(size), Ok(count)) => {
            buf.put_u8(short);
            buf.put_u8(size);
            buf.put_u8(count);
            buf.put_slice(body);
            Ok(())
        }
        _ => {
            buf.put_u8(long);
            put_wide_compound(buf, count, body)
        }
    }
}

fn put_wide_compound(buf: &mut BytesMut, count: usize, body: &[u8]) -> Result<()> {
    let size = u32::try_from(body.len() + 4).map_err(|_| Error::codec("compound exceeds 4 GiB"))?;
    let count = u32::try_from(count).map_err(|_| Error::codec("too many elements"))?;
    buf.put_u32(size);
    buf.put_u32(count);
    buf.put_slice(body);
    Ok(())
}

fn encode_array(items: &[Value], buf: &mut BytesMut) -> Result<()> {
    let constructor = match items.first() {
        Some(first) => first.array_constructor()?,
        None => code::NULL,
    };

    let mut body = BytesMut::new();
    body.put_u8(constructor);
    for item in items {
        if item.array_constructor()? != constructor {
            return Err(Error::codec("array elements must share one type"));
        }
        item.encode_element(&mut body)?;
    }

    match (u8::try_from(body.len() + 1), u8::try_from(items.len())) {
        (Ok(size), Ok(count)) => {
            buf.put_u8(code::ARRAY8);
            buf.put_u8(size);
            buf.put_u8(count);
        }
        _ => {
            let size =
                u32::try_from(body.len() + 4).map_err(|_| Error::codec("array exceeds 4 GiB"))?;
            let count = u32::try_from(items.len()).map_err(|_| Error::codec("too many elements"))?;
            buf.put_u8(code::ARRAY32);
            buf.put_u32(size);
            buf.put_u32(count);
        }
    }
    buf.put_slice(&body);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::codec(format!(
            "truncated input: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

fn read_len(buf: &mut &[u8], wide: bool) -> Result<usize> {
    let len = if wide { read_u32(buf)? } else { u32::from(read_u8(buf)?) };
    usize::try_from(len).map_err(|_| Error::codec("length overflows usize"))
}

fn read_utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| Error::codec(format!("invalid utf-8: {e}")))
}

fn decode_value(buf: &mut &[u8], depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::codec("value nesting too deep"));
    }
    let constructor = read_u8(buf)?;
    if constructor == code::DESCRIBED {
        let descriptor = decode_value(buf, depth + 1)?;
        let value = decode_value(buf, depth + 1)?;
        return Ok(Value::described(descriptor, value));
    }
    decode_body(constructor, buf, depth)
}

#[allow(clippy::too_many_lines)]
fn decode_body(constructor: u8, buf: &mut &[u8], depth: usize) -> Result<Value> {
    Ok(match constructor {
        code::NULL => Value::Null,
        code::TRUE => Value::Bool(true),
        code::FALSE => Value::Bool(false),
        code::BOOLEAN => Value::Bool(read_u8(buf)? != 0),
        code::UBYTE => Value::Ubyte(read_u8(buf)?),
        code::USHORT => {
            need(buf, 2)?;
            Value::Ushort(buf.get_u16())
        }
        code::UINT0 => Value::Uint(0),
        code::SMALLUINT => Value::Uint(u32::from(read_u8(buf)?)),
        code::UINT => Value::Uint(read_u32(buf)?),
        code::ULONG0 => Value::Ulong(0),
        code::SMALLULONG => Value::Ulong(u64::from(read_u8(buf)?)),
        code::ULONG => {
            need(buf, 8)?;
            Value::Ulong(buf.get_u64())
        }
        code::BYTE => {
            need(buf, 1)?;
            Value::Byte(buf.get_i8())
        }
        code::SHORT => {
            need(buf, 2)?;
            Value::Short(buf.get_i16())
        }
        code::SMALLINT => {
            need(buf, 1)?;
            Value::Int(i32::from(buf.get_i8()))
        }
        code::INT => {
            need(buf, 4)?;
            Value::Int(buf.get_i32())
        }
        code::SMALLLONG => {
            need(buf, 1)?;
            Value::Long(i64::from(buf.get_i8()))
        }
        code::LONG => {
            need(buf, 8)?;
            Value::Long(buf.get_i64())
        }
        code::FLOAT => {
            need(buf, 4)?;
            Value::Float(buf.get_f32())
        }
        code::DOUBLE => {
            need(buf, 8)?;
            Value::Double(buf.get_f64())
        }
        code::CHAR => {
            let raw = read_u32(buf)?;
            Value::Char(
                char::from_u32(raw).ok_or_else(|| Error::codec(format!("invalid char {raw:#x}")))?,
            )
        }
        code::TIMESTAMP => {
            need(buf, 8)?;
            Value::Timestamp(buf.get_i64())
        }
        code::UUID => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(take(buf, 16)?);
            Value::Uuid(bytes)
        }
        code::VBIN8 | code::VBIN32 => {
            let len = read_len(buf, constructor == code::VBIN32)?;
            Value::Binary(Bytes::copy_from_slice(take(buf, len)?))
        }
        code::STR8 | code::STR32 => {
            let len = read_len(buf, constructor == code::STR32)?;
            Value::String(read_utf8(take(buf, len)?)?)
        }
        code::SYM8 | code::SYM32 => {
            let len = read_len(buf, constructor == code::SYM32)?;
            Value::Symbol(read_utf8(take(buf, len)?)?)
        }
        code::LIST0 => Value::List(Vec::new()),
        code::LIST8 | code::LIST32 => {
            let (mut body, count) = compound_body(buf, constructor == code::LIST32)?;
            let mut items = Vec::with_capacity(count.min(body.len()));
            for _ in 0..count {
                items.push(decode_value(&mut body, depth + 1)?);
            }
            Value::List(items)
        }
        code::MAP8 | code::MAP32 => {
            let (mut body, count) = compound_body(buf, constructor == code::MAP32)?;
            if count % 2 != 0 {
                return Err(Error::codec(format!("map has odd element count {count}")));
            }
            let mut entries = Vec::with_capacity((count / 2).min(body.len()));
            for _ in 0..count / 2 {
                let k = decode_value(&mut body, depth + 1)?;
                let v = decode_value(&mut body, depth + 1)?;
                entries.push((k, v));
            }
            Value::Map(entries)
        }
        code::ARRAY8 | code::ARRAY32 => {
            let (mut body, count) = compound_body(buf, constructor == code::ARRAY32)?;
            let element = read_u8(&mut body)?;
            if element == code::DESCRIBED {
                return Err(Error::codec("described array elements are not supported"));
            }
            let zero_width = matches!(
                element,
                code::NULL | code::TRUE | code::FALSE | code::UINT0 | code::ULONG0 | code::LIST0
            );
            if zero_width && count > MAX_ZERO_WIDTH_ELEMENTS {
                return Err(Error::codec(format!(
                    "array of {count} zero-width elements exceeds {MAX_ZERO_WIDTH_ELEMENTS}"
                )));
            }
            if !zero_width && count > body.len() {
                return Err(Error::codec(format!(
                    "array claims {count} elements in {} bytes",
                    body.len()
                )));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_body(element, &mut body, depth + 1)?);
            }
            Value::Array(items)
        }
        other => return Err(Error::codec(format!("unsupported type constructor {other:#04x}"))),
    })
}

/// Upper bound on arrays whose element constructor carries no payload.
const MAX_ZERO_WIDTH_ELEMENTS: usize = 256;

/// Split off a compound's body and return it with the element count.
fn compound_body<'a>(buf: &mut &'a [u8], wide: bool) -> Result<(&'a [u8], usize)> {
    let size = read_len(buf, wide)?;
    let mut body = take(buf, size)?;
    let count = read_len(&mut body, wide)?;
    Ok((body, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: &Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn small_integers_use_compact_constructors() {
        assert_eq!(encoded(&Value::Uint(0)), [0x43]);
        assert_eq!(encoded(&Value::Uint(7)), [0x52, 7]);
        assert_eq!(encoded(&Value::Uint(65_536)), [0x70, 0, 1, 0, 0]);
        assert_eq!(encoded(&Value::Ulong(0x10)), [0x53, 0x10]);
        assert_eq!(encoded(&Value::Long(-1)), [0x55, 0xff]);
    }

    #[test]
    fn symbol_and_string_use_8_bit_lengths_when_short() {
        assert_eq!(encoded(&Value::symbol("PLAIN")), b"\xa3\x05PLAIN");
        assert_eq!(encoded(&Value::string("hi")), b"\xa1\x02hi");
    }

    #[test]
    fn long_string_switches_to_32_bit_length() {
        let s = "x".repeat(300);
        let bytes = encoded(&Value::string(s.clone()));
        assert_eq!(bytes[0], 0xb1);
        assert_eq!(&bytes[1..5], &300u32.to_be_bytes());
        let decoded = Value::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, Value::String(s));
    }

    #[test]
    fn empty_list_is_list0() {
        assert_eq!(encoded(&Value::List(vec![])), [0x45]);
    }

    #[test]
    fn symbol_array_decodes_from_peer_bytes() {
        // GIVEN: sasl-server-mechanisms as a broker would send it (sym8 array)
        let bytes = b"\xe0\x12\x02\xa3\x05PLAIN\x09ANONYMOUS";
        // WHEN: decoded
        let value = Value::decode(&mut bytes.as_slice()).unwrap();
        // THEN: two symbols
        assert_eq!(
            value,
            Value::Array(vec![Value::symbol("PLAIN"), Value::symbol("ANONYMOUS")])
        );
    }

    #[test]
    fn array_encoding_is_decodable() {
        let value = Value::Array(vec![Value::symbol("PLAIN"), Value::symbol("ANONYMOUS")]);
        let bytes = encoded(&value);
        assert_eq!(bytes[0], 0xe0);
        assert_eq!(Value::decode(&mut bytes.as_slice()).unwrap(), value);
    }

    #[test]
    fn mixed_array_is_rejected() {
        let value = Value::Array(vec![Value::symbol("a"), Value::Uint(1)]);
        let mut buf = BytesMut::new();
        assert!(value.encode(&mut buf).is_err());
    }

    #[test]
    fn zero_width_array_with_huge_count_is_rejected() {
        // array32, size 5, count u32::MAX, element null
        let bytes = b"\xf0\x00\x00\x00\x05\xff\xff\xff\xff\x40";
        assert!(Value::decode(&mut bytes.as_slice()).is_err());

        let bytes = b"\xf0\x00\x00\x00\x05\x00\x98\x96\x80\x40";
        assert!(Value::decode(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn small_zero_width_array_still_decodes() {
        let bytes = b"\xe0\x02\x03\x41";
        assert_eq!(
            Value::decode(&mut bytes.as_slice()).unwrap(),
            Value::Array(vec![Value::Bool(true); 3])
        );
    }

    #[test]
    fn array_count_beyond_body_is_rejected() {
        // sym8 elements, count 200, only one byte of body left
        let bytes = b"\xe0\x03\xc8\xa3\x00";
        assert!(Value::decode(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn described_map_with_nested_list() {
        let value = Value::described(
            Value::Ulong(0x10),
            Value::List(vec![
                Value::string("container"),
                Value::Null,
                Value::Map(vec![(
                    Value::symbol("groups"),
                    Value::List(vec![Value::string("manage")]),
                )]),
            ]),
        );
        let bytes = encoded(&value);
        assert_eq!(Value::decode(&mut bytes.as_slice()).unwrap(), value);
    }

    #[test]
    fn truncated_input_is_an_error_not_a_panic() {
        for bytes in [&b"\xa1\x05ab"[..], b"\xc0\x10\x02", b"\x70\x00", b"", b"\x00\x53"] {
            assert!(Value::decode(&mut &bytes[..]).is_err(), "{bytes:?}");
        }
    }

    #[test]
    fn odd_map_count_is_rejected() {
        let bytes = b"\xc1\x03\x01\x40\x40";
        assert!(Value::decode(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn unsupported_constructor_is_rejected() {
        // decimal32
        let bytes = b"\x74\x00\x00\x00\x00";
        let err = Value::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("0x74"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..64 {
            bytes.extend_from_slice(&[0x00, 0x53, 0x01]);
        }
        bytes.push(0x40);
        assert!(Value::decode(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn fields_accept_string_keys_and_reject_others() {
        let value = Value::Map(vec![(Value::string("k"), Value::Bool(true))]);
        let fields = fields_from_value(value).unwrap();
        assert_eq!(fields.get("k"), Some(&Value::Bool(true)));

        let bad = Value::Map(vec![(Value::Uint(1), Value::Null)]);
        assert!(fields_from_value(bad).is_err());
    }

    #[test]
    fn fields_encode_with_symbol_keys() {
        let mut fields = Fields::new();
        fields.insert("product".into(), Value::string("none-authservice"));
        let value = fields_to_value(&fields);
        assert_eq!(
            value.as_map().unwrap()[0].0,
            Value::symbol("product")
        );
    }

    #[test]
    fn map_lookup_by_key() {
        let identity = Value::Map(vec![(Value::string("sub"), Value::string("alice"))]);
        assert_eq!(identity.get("sub").and_then(Value::as_str), Some("alice"));
        assert!(identity.get("missing").is_none());
    }
}
