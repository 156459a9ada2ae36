//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite but
//! keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use todosync_core::{
    ContentPatch, ItemId, LocalChange, Revision, SyncDelta, TodoContent, TodoRecord,
};

use crate::error::{Result, StoreError};
use crate::traits::{AppliedDelta, ClientStore, DeleteOutcome, ServerStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Local working copy.
    local: BTreeMap<ItemId, TodoRecord>,

    /// Locally deleted ids.
    tombstones: BTreeSet<ItemId>,

    /// Scratch copy of the server's records.
    snapshot: BTreeMap<ItemId, TodoRecord>,

    /// Largest id ever handed out by `create_item`.
    last_local_id: i32,

    /// Server-side records per user.
    server: HashMap<u32, BTreeMap<ItemId, TodoRecord>>,
}

impl MemoryStoreInner {
    fn visible(&self, id: ItemId) -> Option<&TodoRecord> {
        if self.tombstones.contains(&id) {
            return None;
        }
        self.local.get(&id)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn create_item(&self, content: &TodoContent) -> Result<TodoRecord> {
        let mut inner = self.write()?;

        let max_existing = inner.local.keys().next_back().map_or(0, |id| id.get());
        let next = inner
            .last_local_id
            .max(max_existing)
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidData("local id space exhausted".into()))?;
        inner.last_local_id = next;

        let record = TodoRecord::new(ItemId(next), content.clone(), Revision::New);
        inner.local.insert(record.id, record.clone());
        Ok(record)
    }

    async fn edit_item(&self, id: ItemId, patch: &ContentPatch) -> Result<Option<TodoRecord>> {
        let mut inner = self.write()?;
        if inner.visible(id).is_none() {
            return Ok(None);
        }

        Ok(inner.local.get_mut(&id).map(|record| {
            record.content.apply(patch);
            record.clone()
        }))
    }

    async fn delete_item(&self, id: ItemId) -> Result<DeleteOutcome> {
        let mut inner = self.write()?;
        let is_new = match inner.visible(id) {
            Some(record) => record.revision.is_new(),
            None => return Ok(DeleteOutcome::NotFound),
        };

        if is_new {
            inner.local.remove(&id);
            Ok(DeleteOutcome::Dropped)
        } else {
            inner.tombstones.insert(id);
            Ok(DeleteOutcome::Tombstoned)
        }
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<TodoRecord>> {
        Ok(self.read()?.visible(id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<TodoRecord>> {
        let inner = self.read()?;
        Ok(inner
            .local
            .values()
            .filter(|record| !inner.tombstones.contains(&record.id))
            .cloned()
            .collect())
    }

    async fn local_items(&self) -> Result<Vec<TodoRecord>> {
        Ok(self.read()?.local.values().cloned().collect())
    }

    async fn tombstones(&self) -> Result<Vec<ItemId>> {
        Ok(self.read()?.tombstones.iter().copied().collect())
    }

    async fn replace_snapshot(&self, records: &[TodoRecord]) -> Result<()> {
        let mut inner = self.write()?;
        inner.snapshot = records
            .iter()
            .map(|record| (record.id, record.clone()))
            .collect();
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<TodoRecord>> {
        Ok(self.read()?.snapshot.values().cloned().collect())
    }

    async fn clear_snapshot(&self) -> Result<()> {
        self.write()?.snapshot.clear();
        Ok(())
    }

    async fn apply_changes(&self, changes: &[LocalChange]) -> Result<()> {
        let mut inner = self.write()?;

        // Stage on a copy so a failing plan leaves nothing behind.
        let mut local = inner.local.clone();
        let mut tombstones = inner.tombstones.clone();

        for change in changes {
            match change {
                LocalChange::Put(record) => {
                    local.insert(record.id, record.clone());
                }
                LocalChange::SetRevision { id, revision } => {
                    if let Some(record) = local.get_mut(id) {
                        record.revision = *revision;
                    }
                }
                LocalChange::Remove(id) => {
                    local.remove(id);
                    tombstones.remove(id);
                }
                LocalChange::ClearTombstone(id) => {
                    tombstones.remove(id);
                }
            }
        }

        inner.local = local;
        inner.tombstones = tombstones;
        Ok(())
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn records_for(&self, user: u32) -> Result<Vec<TodoRecord>> {
        Ok(self
            .read()?
            .server
            .get(&user)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_record(&self, user: u32, record: &TodoRecord) -> Result<()> {
        self.write()?
            .server
            .entry(user)
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn apply_delta(&self, user: u32, delta: &SyncDelta) -> Result<AppliedDelta> {
        let mut inner = self.write()?;
        let mut records = inner.server.get(&user).cloned().unwrap_or_default();
        let mut applied = AppliedDelta::default();

        for item in &delta.new {
            let mut id = item.id;
            if records.contains_key(&id) {
                id = records
                    .keys()
                    .next_back()
                    .and_then(|max| max.next())
                    .ok_or_else(|| StoreError::InvalidData("server id space exhausted".into()))?;
                tracing::warn!(
                    "user {}: new item id {} already taken, stored as {}",
                    user,
                    item.id,
                    id
                );
                applied.reassigned.push((item.id, id));
            }

            let revision = Revision::Synced(item.revision.unwrap_or(0).max(0));
            records.insert(id, TodoRecord::new(id, item.content.clone(), revision));
            applied.created.push(id);
        }

        for id in &delta.deleted {
            if records.remove(id).is_some() {
                applied.deleted += 1;
            } else {
                tracing::debug!("user {}: delete of unknown item {}", user, id);
                applied.skipped += 1;
            }
        }

        for update in &delta.updated {
            let Some(record) = records.get_mut(&update.id) else {
                tracing::warn!("user {}: update of unknown item {}", user, update.id);
                applied.skipped += 1;
                continue;
            };
            record.content.apply(&update.patch);
            record.revision = record.revision.advanced(1);
            applied.updated += 1;
        }

        inner.server.insert(user, records);
        Ok(applied)
    }
}
