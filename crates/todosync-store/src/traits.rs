//! Store traits: the narrow interface the sync engine reaches storage through.
//!
//! A client store holds three tables: the working copy (Local), the ids
//! deleted since the last sync (Tombstones) and a scratch copy of the
//! server's records used during one merge (RemoteSnapshot). A server store
//! holds one table of records per user.

use std::sync::Arc;

use async_trait::async_trait;
use todosync_core::{ContentPatch, ItemId, LocalChange, SyncDelta, TodoContent, TodoRecord};

use crate::error::Result;

/// Result of deleting an item locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The item was never synced; its row was dropped outright.
    Dropped,
    /// The item was synced before; it is now tombstoned until the next sync.
    Tombstoned,
    /// No visible item has this id.
    NotFound,
}

/// What applying a client delta did to a server table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedDelta {
    /// Ids of created items, in delta order.
    pub created: Vec<ItemId>,
    /// Items whose requested id was taken: `(requested, assigned)`.
    pub reassigned: Vec<(ItemId, ItemId)>,
    /// Number of items patched.
    pub updated: usize,
    /// Number of items removed.
    pub deleted: usize,
    /// Updates and deletes that named an unknown id.
    pub skipped: usize,
}

/// Client-side storage.
///
/// All methods are async; the SQLite implementation runs its queries on
/// `spawn_blocking`.
#[async_trait]
pub trait ClientStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Local Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an item with a fresh local id and the `New` revision.
    async fn create_item(&self, content: &TodoContent) -> Result<TodoRecord>;

    /// Overwrite the fields present in `patch`.
    ///
    /// Returns `None` if the id is unknown or tombstoned.
    async fn edit_item(&self, id: ItemId, patch: &ContentPatch) -> Result<Option<TodoRecord>>;

    /// Delete an item.
    ///
    /// Never-synced items are dropped; synced items keep their row and gain
    /// a tombstone so the next merge can tell the server.
    async fn delete_item(&self, id: ItemId) -> Result<DeleteOutcome>;

    /// Get a visible item.
    async fn get_item(&self, id: ItemId) -> Result<Option<TodoRecord>>;

    /// All visible items, ordered by id.
    async fn list_items(&self) -> Result<Vec<TodoRecord>>;

    /// Every Local row, tombstoned ones included, ordered by id.
    async fn local_items(&self) -> Result<Vec<TodoRecord>>;

    /// Ids deleted since the last sync, ordered.
    async fn tombstones(&self) -> Result<Vec<ItemId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the scratch snapshot with `records`.
    async fn replace_snapshot(&self, records: &[TodoRecord]) -> Result<()>;

    /// The scratch snapshot, ordered by id.
    async fn snapshot(&self) -> Result<Vec<TodoRecord>>;

    /// Empty the scratch snapshot.
    async fn clear_snapshot(&self) -> Result<()>;

    /// Apply a merge plan to Local and Tombstones in one transaction.
    async fn apply_changes(&self, changes: &[LocalChange]) -> Result<()>;
}

/// Server-side storage, keyed by user id.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Every record of `user`, ordered by id.
    async fn records_for(&self, user: u32) -> Result<Vec<TodoRecord>>;

    /// Insert or replace one record.
    async fn insert_record(&self, user: u32, record: &TodoRecord) -> Result<()>;

    /// Apply a client delta atomically.
    ///
    /// New items keep their id when it is free and are created at their
    /// transmitted revision (0 when absent). Updates patch the given fields
    /// and advance the revision by one. Deletes remove the row.
    async fn apply_delta(&self, user: u32, delta: &SyncDelta) -> Result<AppliedDelta>;
}

#[async_trait]
impl<S: ClientStore + ?Sized> ClientStore for Arc<S> {
    async fn create_item(&self, content: &TodoContent) -> Result<TodoRecord> {
        (**self).create_item(content).await
    }

    async fn edit_item(&self, id: ItemId, patch: &ContentPatch) -> Result<Option<TodoRecord>> {
        (**self).edit_item(id, patch).await
    }

    async fn delete_item(&self, id: ItemId) -> Result<DeleteOutcome> {
        (**self).delete_item(id).await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<TodoRecord>> {
        (**self).get_item(id).await
    }

    async fn list_items(&self) -> Result<Vec<TodoRecord>> {
        (**self).list_items().await
    }

    async fn local_items(&self) -> Result<Vec<TodoRecord>> {
        (**self).local_items().await
    }

    async fn tombstones(&self) -> Result<Vec<ItemId>> {
        (**self).tombstones().await
    }

    async fn replace_snapshot(&self, records: &[TodoRecord]) -> Result<()> {
        (**self).replace_snapshot(records).await
    }

    async fn snapshot(&self) -> Result<Vec<TodoRecord>> {
        (**self).snapshot().await
    }

    async fn clear_snapshot(&self) -> Result<()> {
        (**self).clear_snapshot().await
    }

    async fn apply_changes(&self, changes: &[LocalChange]) -> Result<()> {
        (**self).apply_changes(changes).await
    }
}

#[async_trait]
impl<S: ServerStore + ?Sized> ServerStore for Arc<S> {
    async fn records_for(&self, user: u32) -> Result<Vec<TodoRecord>> {
        (**self).records_for(user).await
    }

    async fn insert_record(&self, user: u32, record: &TodoRecord) -> Result<()> {
        (**self).insert_record(user, record).await
    }

    async fn apply_delta(&self, user: u32, delta: &SyncDelta) -> Result<AppliedDelta> {
        (**self).apply_delta(user, delta).await
    }
}
