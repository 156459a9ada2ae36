//! Error types for the sync module.

use thiserror::Error;

use todosync_core::CodecError;
use todosync_store::StoreError;

use crate::client::Leg;
use crate::packet::PacketType;

/// A datagram that is not a well-formed packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,

    #[error("unknown packet type {0}")]
    UnknownType(u8),

    #[error("{kind} packet must be {expected} bytes, got {actual}")]
    BadLength {
        kind: PacketType,
        expected: usize,
        actual: usize,
    },
}

/// A conflict prompt that could not produce an answer.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A scripted resolver ran out of answers.
    #[error("no scripted answer left for item {0}")]
    Exhausted(todosync_core::ItemId),

    /// Interactive input ended before an answer was given.
    #[error("input closed before an answer was given")]
    InputClosed,

    #[error("prompt I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the reconciliation engine.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("conflict resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    /// No id above the largest known one is left for a new item.
    #[error("no free item id after {0}")]
    IdSpaceExhausted(todosync_core::ItemId),
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Socket-level failure. Aborts the current attempt.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A leg received no acceptable reply within its retry budget.
    #[error("no reply to {leg} after {attempts} attempts")]
    Communication { leg: Leg, attempts: u32 },

    #[error("malformed packet: {0}")]
    Malformed(#[from] PacketError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    /// A payload does not fit the protocol's limits.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<ResolveError> for SyncError {
    fn from(e: ResolveError) -> Self {
        SyncError::Merge(MergeError::Resolve(e))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
