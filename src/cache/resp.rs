/// RESP (Redis Serialization Protocol) codec used by the in-process Redis
/// server that exercises `RedisStore`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n), None is the null bulk string
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...), None is the null array
    Array(Option<Vec<RespValue>>),
}

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(#[from] std::num::ParseIntError),
}

const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// RESP parser for reading replies
pub struct RespParser;

/// RESP encoder for writing commands
pub struct RespEncoder;

impl RespParser {
    /// Parse one complete value from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial value; nothing
    /// is consumed in that case, so the caller can read more and retry.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::parse_at(buf, 0)? {
            Some((value, end)) => {
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some(&kind) = buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = Self::read_line(buf, pos + 1) else {
            return Ok(None);
        };

        match kind {
            b'+' => Ok(Some((
                RespValue::SimpleString(str::from_utf8(line)?.to_string()),
                next,
            ))),
            b'-' => Ok(Some((RespValue::Error(str::from_utf8(line)?.to_string()), next))),
            b':' => Ok(Some((RespValue::Integer(str::from_utf8(line)?.parse()?), next))),
            b'$' => {
                let size: i64 = str::from_utf8(line)?.parse()?;
                if size == -1 {
                    return Ok(Some((RespValue::BulkString(None), next)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(format!(
                        "Invalid bulk string size: {}",
                        size
                    )));
                }

                let Some(end) = next.checked_add(size as usize).filter(|end| *end < usize::MAX - 2) else {
                    return Err(RespParseError::InvalidFormat(format!(
                        "Bulk string size out of range: {}",
                        size
                    )));
                };
                if buf.len() < end + 2 {
                    return Ok(None);
                }
                if &buf[end..end + 2] != b"\r\n" {
                    return Err(RespParseError::InvalidFormat(
                        "Missing \\r\\n after bulk string".to_string(),
                    ));
                }
                let content = Bytes::copy_from_slice(&buf[next..end]);
                Ok(Some((RespValue::BulkString(Some(content)), end + 2)))
            }
            b'*' => {
                let size: i64 = str::from_utf8(line)?.parse()?;
                if size == -1 {
                    return Ok(Some((RespValue::Array(None), next)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(format!(
                        "Invalid array size: {}",
                        size
                    )));
                }

                // The count is untrusted; grow past the first slots on demand
                let mut elements = Vec::with_capacity((size as usize).min(MAX_PREALLOCATED_ELEMENTS));
                let mut cursor = next;
                for _ in 0..size {
                    let Some((element, after)) = Self::parse_at(buf, cursor)? else {
                        return Ok(None);
                    };
                    elements.push(element);
                    cursor = after;
                }
                Ok(Some((RespValue::Array(Some(elements)), cursor)))
            }
            other => Err(RespParseError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                other as char
            ))),
        }
    }

    /// Line content starting at `start` and the offset just past its \r\n
    fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(start..)?;
        let offset = rest.windows(2).position(|w| w == b"\r\n")?;
        Some((&rest[..offset], start + offset + 2))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => Self::put_bulk(buf, data),
            RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        }
    }

    /// Encode a command as an array of bulk strings. Arguments are binary
    /// safe so cached payloads go out untouched.
    pub fn command(parts: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());
        buf.put_u8(b'*');
        buf.extend_from_slice(parts.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        for part in parts {
            Self::put_bulk(&mut buf, part);
        }
        buf.freeze()
    }

    fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u8(b'$');
        buf.extend_from_slice(data.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.extend_from_slice(data);
        buf.put_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalar_replies() {
        let mut buf = BytesMut::from("+OK\r\n-ERR wrong type\r\n:42\r\n");
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::Error("ERR wrong type".to_string()))
        );
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Integer(42)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_bulk_strings() {
        let mut buf = BytesMut::from("$5\r\nhello\r\n$-1\r\n$0\r\n\r\n");
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::BulkString(Some(Bytes::from("hello"))))
        );
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::BulkString(None)));
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::BulkString(Some(Bytes::new())))
        );
    }

    #[test]
    fn test_bulk_string_is_binary_safe() {
        let mut buf = BytesMut::from(&b"$4\r\na\r\nb\r\n"[..]);
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::BulkString(Some(Bytes::from_static(b"a\r\nb"))))
        );
    }

    #[test]
    fn test_parse_array() {
        let mut buf = BytesMut::from("*2\r\n$5\r\nhello\r\n:7\r\n");
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::BulkString(Some(Bytes::from("hello"))),
                RespValue::Integer(7),
            ]))
        );
    }

    #[test]
    fn test_incomplete_input_is_left_in_place() {
        let full = b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n";
        for cut in 1..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert_eq!(RespParser::parse(&mut buf).unwrap(), None, "cut at {}", cut);
            assert_eq!(buf.len(), cut);
        }

        let mut buf = BytesMut::from(&full[..]);
        assert!(RespParser::parse(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_length_headers_do_not_allocate() {
        let mut buf = BytesMut::from("*9223372036854775807\r\n:1\r\n");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);

        let mut buf = BytesMut::from("$9223372036854775807\r\nabc");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_invalid_type_byte() {
        let mut buf = BytesMut::from("?what\r\n");
        assert!(matches!(
            RespParser::parse(&mut buf),
            Err(RespParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_encode_command() {
        let encoded = RespEncoder::command(&[b"SET", b"key", b"value"]);
        assert_eq!(
            encoded,
            Bytes::from("*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
        );
    }

    #[test]
    fn test_encode_value() {
        let value = RespValue::Array(Some(vec![
            RespValue::SimpleString("OK".to_string()),
            RespValue::BulkString(None),
        ]));
        assert_eq!(RespEncoder::encode(&value), Bytes::from("*2\r\n+OK\r\n$-1\r\n"));
    }
}
