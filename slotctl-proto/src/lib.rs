//! Wire framing for the cluster's text-based admin protocol.
//!
//! This crate only knows how to turn argument lists into request frames and
//! turn raw bytes back into typed replies. It owns no socket; [`crate::reply`]
//! and [`crate::encode`] are pure functions over byte buffers.

pub mod encode;
pub mod error;
pub mod reply;

pub use encode::{CommandArg, encode_commands};
pub use error::ProtoError;
pub use reply::Reply;
