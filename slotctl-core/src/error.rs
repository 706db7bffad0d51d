//! Error taxonomy for the wire adapter, status probes, and orchestrator.
//!
//! Mirrors the four kinds called out in the design: a protocol-level error
//! reply from a node, a status mismatch on an otherwise successful reply, an
//! I/O failure, and a caller-side validation failure raised before any
//! cluster mutation is attempted.
use slotctl_proto::error::{ProtoError, ReplyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterCtlError {
    #[error("{host}:{port}: {source}")]
    Io {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("{host}:{port}: protocol error: {reply}")]
    Protocol {
        host: String,
        port: u16,
        reply: ReplyError,
    },

    #[error("{host}:{port}: unexpected status: {payload}")]
    Status {
        host: String,
        port: u16,
        payload: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed reply: {0}")]
    Decode(#[from] ProtoError),
}

impl ClusterCtlError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClusterCtlError::Validation(message.into())
    }

    pub fn status(host: &str, port: u16, payload: impl Into<String>) -> Self {
        ClusterCtlError::Status {
            host: host.to_string(),
            port,
            payload: payload.into(),
        }
    }

    /// True if this is a [`ClusterCtlError::Protocol`] whose body contains
    /// `needle`. Centralizes the idempotent-error substring checks the
    /// orchestrator relies on instead of scattering them inline.
    pub fn protocol_contains(&self, needle: &str) -> bool {
        match self {
            ClusterCtlError::Protocol { reply, .. } => reply.message.contains(needle),
            _ => false,
        }
    }
}

/// `already the owner of` — `cluster setslot importing` on a target that
/// already imported the slot on a prior, interrupted attempt.
pub fn is_already_owner(err: &ClusterCtlError) -> bool {
    err.protocol_contains("already the owner of")
}

/// `not the owner of` — `cluster setslot migrating` on a source that no
/// longer owns the slot, because a prior attempt already handed it off.
pub fn is_not_owner(err: &ClusterCtlError) -> bool {
    err.protocol_contains("not the owner of")
}

/// `Unknown node` — `cluster forget` on a node that already forgot the
/// departing node, or never knew it.
pub fn is_unknown_node(err: &ClusterCtlError) -> bool {
    err.protocol_contains("Unknown node")
}

/// `containing keys` — `cluster reset` refused because the node still
/// holds data the operator has not migrated or deleted.
pub fn is_containing_keys(err: &ClusterCtlError) -> bool {
    err.protocol_contains("containing keys")
}
