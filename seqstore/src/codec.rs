//! Encode / decode stored values.
//!
//! Every value starts with a one byte tag:
//!  - `0x01` text:     `[tag][utf8 bytes]`
//!  - `0x02` sequence: `[tag][count u32][len u32][utf8 bytes]...` in little-endian
//!
//! Elements are length-prefixed, so any string (empty, or containing whatever a
//! delimiter would have been) survives a round trip.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub const TAG_TEXT: u8 = 0x01;
pub const TAG_SEQUENCE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Sequence(Vec<String>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Sequence(_) => "sequence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("value is empty")]
    Empty,
    #[error("unknown value tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("value is truncated")]
    Truncated,
    #[error("element count {count} cannot fit in {remaining} remaining bytes")]
    BadCount { count: u32, remaining: usize },
    #[error("element {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("{0} trailing byte(s) after the last element")]
    TrailingBytes(usize),
    #[error("expected a {expected} value, found a {found} value")]
    WrongShape { expected: &'static str, found: &'static str },
}

fn len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "element longer than 4 GiB"))
}

pub fn encode_sequence<S: AsRef<str>>(items: &[S]) -> io::Result<Vec<u8>> {
    let payload: usize = items.iter().map(|s| 4 + s.as_ref().len()).sum();
    let mut buf = Vec::with_capacity(1 + 4 + payload);

    buf.write_u8(TAG_SEQUENCE)?;
    buf.write_u32::<LittleEndian>(len_u32(items.len())?)?;
    for item in items {
        let item = item.as_ref();
        buf.write_u32::<LittleEndian>(len_u32(item.len())?)?;
        buf.extend_from_slice(item.as_bytes());
    }
    Ok(buf)
}

pub fn encode_text(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + text.len());
    buf.push(TAG_TEXT);
    buf.extend_from_slice(text.as_bytes());
    buf
}

pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let (&tag, payload) = bytes.split_first().ok_or(DecodeError::Empty)?;
    match tag {
        TAG_TEXT => std::str::from_utf8(payload)
            .map(|s| Value::Text(s.to_owned()))
            .map_err(|_| DecodeError::InvalidUtf8(0)),
        TAG_SEQUENCE => decode_sequence_payload(payload).map(Value::Sequence),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

pub fn decode_sequence(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    match decode(bytes)? {
        Value::Sequence(items) => Ok(items),
        other => Err(DecodeError::WrongShape { expected: "sequence", found: other.kind() }),
    }
}

pub fn decode_text(bytes: &[u8]) -> Result<String, DecodeError> {
    match decode(bytes)? {
        Value::Text(text) => Ok(text),
        other => Err(DecodeError::WrongShape { expected: "text", found: other.kind() }),
    }
}

fn decode_sequence_payload(mut cur: &[u8]) -> Result<Vec<String>, DecodeError> {
    let count = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::Truncated)?;

    // every element needs at least its length prefix; rejects absurd counts before allocating
    if count as usize > cur.len() / 4 {
        return Err(DecodeError::BadCount { count, remaining: cur.len() });
    }

    let mut items = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let len = cur.read_u32::<LittleEndian>().map_err(|_| DecodeError::Truncated)? as usize;
        if len > cur.len() {
            return Err(DecodeError::Truncated);
        }
        let (head, tail) = cur.split_at(len);
        let item = std::str::from_utf8(head).map_err(|_| DecodeError::InvalidUtf8(i))?;
        items.push(item.to_owned());
        cur = tail;
    }

    if !cur.is_empty() {
        return Err(DecodeError::TrailingBytes(cur.len()));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(items: &[&str]) {
        let encoded = encode_sequence(items).unwrap();
        assert_eq!(decode_sequence(&encoded).unwrap(), items);
    }

    #[test]
    fn sequences_survive_encoding() {
        round_trip(&[]);
        round_trip(&[""]);
        round_trip(&["", "", ""]);
        round_trip(&["a", "b", "a"]);
        round_trip(&["a,b", "[\"x\"]", "\\", "\n", "\0", "|;:"]);
        round_trip(&["Köse", "日本語", "emoji 🦀"]);
    }

    #[test]
    fn empty_and_single_empty_string_differ() {
        let empty = encode_sequence::<&str>(&[]).unwrap();
        let one_empty = encode_sequence(&[""]).unwrap();
        assert_ne!(empty, one_empty);
        assert_eq!(decode_sequence(&one_empty).unwrap(), vec![String::new()]);
    }

    #[test]
    fn layout_is_length_prefixed() {
        let encoded = encode_sequence(&["ab", ""]).unwrap();
        assert_eq!(
            encoded,
            vec![TAG_SEQUENCE, 2, 0, 0, 0, 2, 0, 0, 0, b'a', b'b', 0, 0, 0, 0]
        );
    }

    #[test]
    fn text_values() {
        let encoded = encode_text("hello");
        assert_eq!(decode(&encoded).unwrap(), Value::Text("hello".into()));
        assert_eq!(decode_text(&encode_text("")).unwrap(), "");
    }

    #[test]
    fn shape_mismatch_is_reported() {
        assert_eq!(
            decode_sequence(&encode_text("hello")).unwrap_err(),
            DecodeError::WrongShape { expected: "sequence", found: "text" }
        );
        assert_eq!(
            decode_text(&encode_sequence(&["hello"]).unwrap()).unwrap_err(),
            DecodeError::WrongShape { expected: "text", found: "sequence" }
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(decode(&[]).unwrap_err(), DecodeError::Empty);
        assert_eq!(decode(b"[\"a\"]").unwrap_err(), DecodeError::UnknownTag(b'['));
        assert_eq!(decode(&[TAG_SEQUENCE, 1, 0]).unwrap_err(), DecodeError::Truncated);

        // count claims far more elements than there are bytes
        assert_eq!(
            decode(&[TAG_SEQUENCE, 0xff, 0xff, 0xff, 0xff]).unwrap_err(),
            DecodeError::BadCount { count: u32::MAX, remaining: 0 }
        );

        // element length runs past the end
        let mut bytes = encode_sequence(&["abc"]).unwrap();
        bytes.pop();
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::Truncated);

        // junk after the last element
        let mut bytes = encode_sequence(&["abc"]).unwrap();
        bytes.push(7);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::TrailingBytes(1));

        // bad utf-8 in the second element
        let bytes = vec![TAG_SEQUENCE, 2, 0, 0, 0, 1, 0, 0, 0, b'a', 1, 0, 0, 0, 0xff];
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::InvalidUtf8(1));
    }
}
