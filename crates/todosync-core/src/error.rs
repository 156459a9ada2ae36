//! Error types for todosync core.

use thiserror::Error;

use crate::types::ItemId;
use crate::wire::{Field, RecordKind};

/// Errors produced while encoding or decoding chunk buffers.
///
/// Decoding never reads past the end of its input; every length that does
/// not fit its container surfaces as one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated chunk header at offset {offset}: {remaining} bytes left")]
    TruncatedHeader { offset: usize, remaining: usize },

    #[error("chunk 0x{tag:02x} declares {declared} bytes but only {available} remain")]
    ChunkOverrun {
        tag: u8,
        declared: usize,
        available: usize,
    },

    #[error("unknown record type 0x{0:02x}")]
    UnknownRecordType(u8),

    #[error("unknown field type 0x{0:02x}")]
    UnknownFieldType(u8),

    #[error("integer field {field} must be 4 bytes, got {len}")]
    BadIntegerLength { field: Field, len: usize },

    #[error("text field {0} is not valid UTF-8")]
    InvalidText(Field),

    #[error("field {0} appears more than once in a record")]
    DuplicateField(Field),

    #[error("{kind} record is missing field {field}")]
    MissingField { kind: RecordKind, field: Field },

    /// Synced revisions are never negative.
    #[error("{kind} record for item {id} carries negative revision {revision}")]
    NegativeRevision {
        kind: RecordKind,
        id: ItemId,
        revision: i32,
    },

    #[error("{0} record is not allowed here")]
    UnexpectedRecordKind(RecordKind),

    #[error("chunk 0x{tag:02x} body of {len} bytes exceeds the 16-bit length limit")]
    ChunkTooLarge { tag: u8, len: usize },
}

/// Errors for content that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("item record would encode to {size} bytes, limit is {limit}")]
    RecordTooLarge { size: usize, limit: usize },
}
