//! Error types for the todo list.

use thiserror::Error;
use todosync_core::{ItemId, ValidationError};
use todosync_store::StoreError;
use todosync_sync::SyncError;

/// Errors that can occur during todo list operations.
#[derive(Debug, Error)]
pub enum TodoError {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// No visible item has this id.
    #[error("item not found: {0}")]
    NotFound(ItemId),

    /// Socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for todo list operations.
pub type Result<T> = std::result::Result<T, TodoError>;
