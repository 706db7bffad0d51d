//! Errors raised while decoding a reply from the wire.
use thiserror::Error;

/// A typed protocol-level error reply, e.g. `-ERR not the owner of slot\r\n`.
///
/// Kept as a distinct variant (rather than folded into a generic failure) so
/// callers can pattern-match on `message` for the handful of substrings the
/// orchestrator treats as idempotent retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError {
    pub kind: String,
    pub message: String,
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.message)
    }
}

/// Failure while decoding bytes off the wire into a [`crate::Reply`].
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("connection closed before a full reply was received")]
    UnexpectedEof,
    #[error("invalid reply header byte {0:?}")]
    InvalidHeader(char),
    #[error("malformed length prefix: {0}")]
    MalformedLength(String),
    #[error("reply body was not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
