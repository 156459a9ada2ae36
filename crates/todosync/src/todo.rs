//! The todo list: local editing plus sync.
//!
//! Local operations never touch the network. Items created here carry the
//! `New` revision until a sync confirms them under a server-side id.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use todosync_core::{validate_content, ContentPatch, ItemId, TodoContent, TodoRecord};
use todosync_store::{ClientStore, DeleteOutcome, SqliteStore};
use todosync_sync::{ConflictResolver, SyncClient, SyncConfig, SyncReport, Transport, UdpTransport};

use crate::error::{Result, TodoError};

/// Configuration for the todo list.
#[derive(Debug, Clone, Default)]
pub struct TodoConfig {
    /// Sync configuration.
    pub sync: SyncConfig,
}

/// Path of the store file for `user` on `device` inside `dir`.
pub fn store_path(dir: impl AsRef<Path>, user: u32, device: u32) -> PathBuf {
    dir.as_ref().join(format!("todo_db_{}_dev_{}", user, device))
}

/// A user's todo list on one device.
pub struct TodoList<S: ClientStore> {
    /// The storage backend.
    store: Arc<S>,
    /// Configuration.
    config: TodoConfig,
}

impl TodoList<SqliteStore> {
    /// Open (or create) the store of `user` on `device` under `dir`.
    ///
    /// The sync client id is set to `user`.
    pub fn open(dir: impl AsRef<Path>, user: u32, device: u32, mut config: TodoConfig) -> Result<Self> {
        let store = SqliteStore::open(store_path(dir, user, device))?;
        config.sync.client_id = user;
        Ok(Self::new(store, config))
    }
}

impl<S: ClientStore> TodoList<S> {
    /// Create a todo list over an existing store.
    pub fn new(store: S, config: TodoConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &TodoConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an item. It gets a local id until the next sync.
    pub async fn create(&self, content: TodoContent) -> Result<TodoRecord> {
        validate_content(&content)?;
        let record = self.store.create_item(&content).await?;
        tracing::debug!("created item {}", record.id);
        Ok(record)
    }

    /// Change the fields present in `patch`.
    pub async fn edit(&self, id: ItemId, patch: &ContentPatch) -> Result<TodoRecord> {
        let current = self.store.get_item(id).await?.ok_or(TodoError::NotFound(id))?;
        validate_content(&current.content.patched(patch))?;

        self.store
            .edit_item(id, patch)
            .await?
            .ok_or(TodoError::NotFound(id))
    }

    /// Delete an item.
    ///
    /// Items never synced disappear at once; others are deleted on the
    /// server at the next sync.
    pub async fn delete(&self, id: ItemId) -> Result<DeleteOutcome> {
        match self.store.delete_item(id).await? {
            DeleteOutcome::NotFound => Err(TodoError::NotFound(id)),
            outcome => {
                tracing::debug!("deleted item {}: {:?}", id, outcome);
                Ok(outcome)
            }
        }
    }

    pub async fn get(&self, id: ItemId) -> Result<Option<TodoRecord>> {
        Ok(self.store.get_item(id).await?)
    }

    /// All visible items, ordered by id.
    pub async fn list(&self) -> Result<Vec<TodoRecord>> {
        Ok(self.store.list_items().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// A UDP sync client for the configured listener.
    pub async fn connect(&self) -> Result<SyncClient<UdpTransport>> {
        let transport = UdpTransport::bind(("0.0.0.0", 0)).await?;
        Ok(SyncClient::new(transport, self.config.sync.clone()))
    }

    /// Sync with the listener behind `client`.
    pub async fn sync<T, R>(&self, client: &SyncClient<T>, resolver: &mut R) -> Result<SyncReport>
    where
        T: Transport,
        R: ConflictResolver + ?Sized,
    {
        Ok(client.sync(self.store.as_ref(), resolver).await?)
    }
}
