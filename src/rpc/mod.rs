//! RPC module - Request/response correlation over the pub/sub bus
//!
//! Provides:
//! - The pending request table and its caller-side handle
//! - Per-variant handler dispatch
//! - `Messenger`, which ties registry, transport and correlation together

mod dispatch;
mod messenger;
mod pending;

pub use dispatch::*;
pub use messenger::*;
pub use pending::*;

use std::time::Duration;

use thiserror::Error;

use crate::bus::TransportError;
use crate::protocol::{CodecError, CorrelationId, MessageKind};
use crate::registry::RegistryError;

/// RPC errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Request {correlation_id} timed out after {elapsed:?}")]
    Timeout {
        correlation_id: CorrelationId,
        elapsed: Duration,
    },

    #[error("Request {correlation_id} expected {expected} but received {actual}")]
    CorrelationType {
        correlation_id: CorrelationId,
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Message has no reply target")]
    NoReplyTarget,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(MessageKind),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type RpcResult<T> = Result<T, RpcError>;
