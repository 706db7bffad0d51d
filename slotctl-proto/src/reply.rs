//! Decodes a single reply off a `BufRead`: simple strings, integers, bulk
//! strings, arrays, or typed protocol errors.
use std::io::BufRead;

use crate::error::{ProtoError, ReplyError};

/// One decoded reply from the cluster's text protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(ReplyError),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Renders this reply as plain text, the way the orchestrator consumes
    /// `info`/`cluster info`/`cluster nodes` bodies and status replies.
    ///
    /// Arrays render as newline-joined bulk elements (used for
    /// `cluster getkeysinslot`); non-string scalars fall back to their
    /// `Display` form.
    pub fn into_text(self) -> Result<String, ProtoError> {
        match self {
            Reply::Simple(s) => Ok(s),
            Reply::Bulk(Some(bytes)) => {
                String::from_utf8(bytes).map_err(|_| ProtoError::InvalidUtf8)
            }
            Reply::Bulk(None) => Ok(String::new()),
            Reply::Integer(v) => Ok(v.to_string()),
            Reply::Array(Some(items)) => {
                let mut lines = Vec::with_capacity(items.len());
                for item in items {
                    lines.push(item.into_text()?);
                }
                Ok(lines.join("\n"))
            }
            Reply::Array(None) => Ok(String::new()),
            Reply::Error(e) => Ok(e.to_string()),
        }
    }

    /// Bulk-string elements of an array reply, as owned strings. Used for
    /// `cluster getkeysinslot`, which replies with an array of keys.
    pub fn into_string_array(self) -> Result<Vec<String>, ProtoError> {
        match self {
            Reply::Array(None) => Ok(Vec::new()),
            Reply::Array(Some(items)) => items.into_iter().map(Reply::into_text).collect(),
            other => Ok(vec![other.into_text()?]),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Reads exactly one reply from `reader`.
pub fn decode_reply(reader: &mut impl BufRead) -> Result<Reply, ProtoError> {
    let line = read_line(reader)?;
    let (header, rest) = line.split_at(1);
    let first = header.chars().next().ok_or(ProtoError::UnexpectedEof)?;

    match first {
        '+' => Ok(Reply::Simple(rest.to_string())),
        '-' => Ok(Reply::Error(parse_error_body(rest))),
        ':' => {
            let v = rest
                .parse::<i64>()
                .map_err(|_| ProtoError::MalformedLength(rest.to_string()))?;
            Ok(Reply::Integer(v))
        }
        '$' => decode_bulk(reader, rest),
        '*' => decode_array(reader, rest),
        other => Err(ProtoError::InvalidHeader(other)),
    }
}

fn decode_bulk(reader: &mut impl BufRead, len_field: &str) -> Result<Reply, ProtoError> {
    let len = len_field
        .parse::<i64>()
        .map_err(|_| ProtoError::MalformedLength(len_field.to_string()))?;
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    let mut buf = vec![0u8; len as usize + 2];
    std::io::Read::read_exact(reader, &mut buf)?;
    buf.truncate(len as usize);
    Ok(Reply::Bulk(Some(buf)))
}

fn decode_array(reader: &mut impl BufRead, len_field: &str) -> Result<Reply, ProtoError> {
    let len = len_field
        .parse::<i64>()
        .map_err(|_| ProtoError::MalformedLength(len_field.to_string()))?;
    if len < 0 {
        return Ok(Reply::Array(None));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(decode_reply(reader)?);
    }
    Ok(Reply::Array(Some(items)))
}

fn parse_error_body(body: &str) -> ReplyError {
    match body.split_once(' ') {
        Some((kind, message)) => ReplyError {
            kind: kind.to_string(),
            message: message.to_string(),
        },
        None => ReplyError {
            kind: String::new(),
            message: body.to_string(),
        },
    }
}

fn read_line(reader: &mut impl BufRead) -> Result<String, ProtoError> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Err(ProtoError::UnexpectedEof);
    }
    while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|_| ProtoError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode(input: &str) -> Reply {
        let mut cur = Cursor::new(input.as_bytes().to_vec());
        decode_reply(&mut cur).unwrap()
    }

    #[test]
    fn decodes_simple_string() {
        assert_eq!(decode("+OK\r\n"), Reply::Simple("OK".to_string()));
    }

    #[test]
    fn decodes_integer() {
        assert_eq!(decode(":16384\r\n"), Reply::Integer(16384));
    }

    #[test]
    fn decodes_bulk_string() {
        assert_eq!(
            decode("$5\r\nhello\r\n"),
            Reply::Bulk(Some(b"hello".to_vec()))
        );
    }

    #[test]
    fn decodes_null_bulk_string() {
        assert_eq!(decode("$-1\r\n"), Reply::Bulk(None));
    }

    #[test]
    fn decodes_array_of_bulk_strings() {
        let r = decode("*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        assert_eq!(
            r,
            Reply::Array(Some(vec![
                Reply::Bulk(Some(b"foo".to_vec())),
                Reply::Bulk(Some(b"bar".to_vec())),
            ]))
        );
    }

    #[test]
    fn decodes_typed_error() {
        let r = decode("-ERR not the owner of slot 10\r\n");
        match r {
            Reply::Error(e) => {
                assert_eq!(e.kind, "ERR");
                assert_eq!(e.message, "not the owner of slot 10");
            }
            _ => panic!("expected error reply"),
        }
    }

    #[test]
    fn array_into_string_array_round_trips_keys() {
        let r = decode("*2\r\n$1\r\na\r\n$1\r\nb\r\n");
        assert_eq!(
            r.into_string_array().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn empty_array_into_string_array_is_empty() {
        let r = decode("*-1\r\n");
        assert_eq!(r.into_string_array().unwrap(), Vec::<String>::new());
    }
}
