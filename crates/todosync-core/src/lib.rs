//! # todosync core
//!
//! Data model and wire codec for todosync.
//!
//! This crate contains no I/O, no storage, no networking. It defines the
//! items being synchronized and how they are framed as chunks.
//!
//! ## Key Types
//!
//! - [`TodoRecord`] - An item: id, content and revision
//! - [`Revision`] - Revision counter, or the "created locally" sentinel
//! - [`SyncDelta`] - New, updated and deleted items sent to the server
//! - [`LocalChange`] - One step of a merge plan applied to the client store
//!
//! ## Chunk Encoding
//!
//! Records travel as nested type-length-value chunks. See the [`chunk`] and
//! [`wire`] modules.

pub mod chunk;
pub mod delta;
pub mod error;
pub mod record;
pub mod types;
pub mod validation;
pub mod wire;

pub use chunk::{Chunk, ChunkCursor, ChunkWriter};
pub use delta::{ItemUpdate, LocalChange, NewItem, SyncDelta};
pub use error::{CodecError, ValidationError};
pub use record::{ContentPatch, TodoContent, TodoRecord};
pub use types::{ItemId, Revision};
pub use validation::validate_content;
pub use wire::{
    decode_records, decode_snapshot, encode_records, encode_snapshot, Field, RecordFields, RecordKind,
    WireRecord,
};
