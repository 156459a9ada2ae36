//! SQLite implementation of the store traits.
//!
//! This is the durable backend for both the client and the listener. It
//! uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use todosync_core::{
    ContentPatch, ItemId, LocalChange, Revision, SyncDelta, TodoContent, TodoRecord,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{AppliedDelta, ClientStore, DeleteOutcome, ServerStore};

const COLUMNS: &str = "id, title, deadline, priority, status, description, revision";

/// SQLite-based store.
///
/// Thread-safe via an internal mutex. Every operation runs on the blocking
/// pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TodoRecord> {
    Ok(TodoRecord {
        id: ItemId(row.get("id")?),
        content: TodoContent {
            title: row.get("title")?,
            deadline: row.get("deadline")?,
            priority: row.get("priority")?,
            status: row.get("status")?,
            description: row.get("description")?,
        },
        revision: Revision::from_raw(row.get("revision")?),
    })
}

fn to_item_id(raw: i64) -> Result<ItemId> {
    i32::try_from(raw)
        .map(ItemId)
        .map_err(|_| StoreError::InvalidData(format!("item id {} out of range", raw)))
}

/// Insert or replace `record` in a table with the item columns.
fn put_record(conn: &Connection, table: &str, record: &TodoRecord) -> Result<()> {
    let c = &record.content;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            table, COLUMNS
        ),
        params![
            record.id.get(),
            c.title,
            c.deadline,
            c.priority,
            c.status,
            c.description,
            record.revision.to_raw(),
        ],
    )?;
    Ok(())
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<TodoRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params, row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn visible_item(conn: &Connection, id: ItemId) -> Result<Option<TodoRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM todo
             WHERE id = ?1 AND id NOT IN (SELECT id FROM deleted_todo)",
            COLUMNS
        ),
        params![id.get()],
        row_to_record,
    )
    .optional()
    .map_err(StoreError::from)
}

fn server_item(conn: &Connection, user: u32, id: ItemId) -> Result<Option<TodoRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM server_todo WHERE user_id = ?1 AND id = ?2",
            COLUMNS
        ),
        params![user, id.get()],
        row_to_record,
    )
    .optional()
    .map_err(StoreError::from)
}

fn put_server_record(conn: &Connection, user: u32, record: &TodoRecord) -> Result<()> {
    let c = &record.content;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO server_todo (user_id, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            COLUMNS
        ),
        params![
            user,
            record.id.get(),
            c.title,
            c.deadline,
            c.priority,
            c.status,
            c.description,
            record.revision.to_raw(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ClientStore for SqliteStore {
    async fn create_item(&self, content: &TodoContent) -> Result<TodoRecord> {
        let content = content.clone();

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO todo (title, deadline, priority, status, description, revision)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    content.title,
                    content.deadline,
                    content.priority,
                    content.status,
                    content.description,
                    Revision::New.to_raw(),
                ],
            )?;
            let id = to_item_id(conn.last_insert_rowid())?;
            Ok(TodoRecord::new(id, content, Revision::New))
        })
        .await
    }

    async fn edit_item(&self, id: ItemId, patch: &ContentPatch) -> Result<Option<TodoRecord>> {
        let patch = patch.clone();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut record) = visible_item(&tx, id)? else {
                return Ok(None);
            };

            record.content.apply(&patch);
            let c = &record.content;
            tx.execute(
                "UPDATE todo SET title = ?1, deadline = ?2, priority = ?3, status = ?4,
                                 description = ?5
                 WHERE id = ?6",
                params![c.title, c.deadline, c.priority, c.status, c.description, id.get()],
            )?;
            tx.commit()?;
            Ok(Some(record))
        })
        .await
    }

    async fn delete_item(&self, id: ItemId) -> Result<DeleteOutcome> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let Some(record) = visible_item(&tx, id)? else {
                return Ok(DeleteOutcome::NotFound);
            };

            let outcome = if record.revision.is_new() {
                tx.execute("DELETE FROM todo WHERE id = ?1", params![id.get()])?;
                DeleteOutcome::Dropped
            } else {
                tx.execute(
                    "INSERT OR IGNORE INTO deleted_todo (id) VALUES (?1)",
                    params![id.get()],
                )?;
                DeleteOutcome::Tombstoned
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<TodoRecord>> {
        self.call(move |conn| visible_item(conn, id)).await
    }

    async fn list_items(&self) -> Result<Vec<TodoRecord>> {
        self.call(|conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {} FROM todo
                     WHERE id NOT IN (SELECT id FROM deleted_todo)
                     ORDER BY id",
                    COLUMNS
                ),
                [],
            )
        })
        .await
    }

    async fn local_items(&self) -> Result<Vec<TodoRecord>> {
        self.call(|conn| {
            query_records(
                conn,
                &format!("SELECT {} FROM todo ORDER BY id", COLUMNS),
                [],
            )
        })
        .await
    }

    async fn tombstones(&self) -> Result<Vec<ItemId>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM deleted_todo ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i32>(0))?
                .map(|id| id.map(ItemId))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn replace_snapshot(&self, records: &[TodoRecord]) -> Result<()> {
        let records = records.to_vec();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM remote_snapshot", [])?;
            for record in &records {
                put_record(&tx, "remote_snapshot", record)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn snapshot(&self) -> Result<Vec<TodoRecord>> {
        self.call(|conn| {
            query_records(
                conn,
                &format!("SELECT {} FROM remote_snapshot ORDER BY id", COLUMNS),
                [],
            )
        })
        .await
    }

    async fn clear_snapshot(&self) -> Result<()> {
        self.call(|conn| {
            conn.execute("DELETE FROM remote_snapshot", [])?;
            Ok(())
        })
        .await
    }

    async fn apply_changes(&self, changes: &[LocalChange]) -> Result<()> {
        let changes = changes.to_vec();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            for change in &changes {
                match change {
                    LocalChange::Put(record) => put_record(&tx, "todo", record)?,
                    LocalChange::SetRevision { id, revision } => {
                        tx.execute(
                            "UPDATE todo SET revision = ?1 WHERE id = ?2",
                            params![revision.to_raw(), id.get()],
                        )?;
                    }
                    LocalChange::Remove(id) => {
                        tx.execute("DELETE FROM todo WHERE id = ?1", params![id.get()])?;
                        tx.execute("DELETE FROM deleted_todo WHERE id = ?1", params![id.get()])?;
                    }
                    LocalChange::ClearTombstone(id) => {
                        tx.execute("DELETE FROM deleted_todo WHERE id = ?1", params![id.get()])?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ServerStore for SqliteStore {
    async fn records_for(&self, user: u32) -> Result<Vec<TodoRecord>> {
        self.call(move |conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {} FROM server_todo WHERE user_id = ?1 ORDER BY id",
                    COLUMNS
                ),
                params![user],
            )
        })
        .await
    }

    async fn insert_record(&self, user: u32, record: &TodoRecord) -> Result<()> {
        let record = record.clone();
        self.call(move |conn| put_server_record(conn, user, &record))
            .await
    }

    async fn apply_delta(&self, user: u32, delta: &SyncDelta) -> Result<AppliedDelta> {
        let delta = delta.clone();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut applied = AppliedDelta::default();

            for item in &delta.new {
                let mut id = item.id;
                if server_item(&tx, user, id)?.is_some() {
                    let max: i64 = tx.query_row(
                        "SELECT COALESCE(MAX(id), 0) FROM server_todo WHERE user_id = ?1",
                        params![user],
                        |row| row.get(0),
                    )?;
                    id = to_item_id(max + 1)?;
                    tracing::warn!(
                        "user {}: new item id {} already taken, stored as {}",
                        user,
                        item.id,
                        id
                    );
                    applied.reassigned.push((item.id, id));
                }

                let revision = Revision::Synced(item.revision.unwrap_or(0).max(0));
                put_server_record(&tx, user, &TodoRecord::new(id, item.content.clone(), revision))?;
                applied.created.push(id);
            }

            for id in &delta.deleted {
                let removed = tx.execute(
                    "DELETE FROM server_todo WHERE user_id = ?1 AND id = ?2",
                    params![user, id.get()],
                )?;
                if removed == 0 {
                    tracing::debug!("user {}: delete of unknown item {}", user, id);
                    applied.skipped += 1;
                } else {
                    applied.deleted += 1;
                }
            }

            for update in &delta.updated {
                let Some(mut record) = server_item(&tx, user, update.id)? else {
                    tracing::warn!("user {}: update of unknown item {}", user, update.id);
                    applied.skipped += 1;
                    continue;
                };
                record.content.apply(&update.patch);
                record.revision = record.revision.advanced(1);
                put_server_record(&tx, user, &record)?;
                applied.updated += 1;
            }

            tx.commit()?;
            Ok(applied)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use todosync_core::{ItemUpdate, NewItem};

    fn content(title: &str) -> TodoContent {
        TodoContent::new(title, "2024-06-01", 1, "open", "")
    }

    fn synced(id: i32, title: &str, rev: i32) -> TodoRecord {
        TodoRecord::new(ItemId(id), content(title), Revision::Synced(rev))
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let store = SqliteStore::open_memory().unwrap();

        let a = store.create_item(&content("a")).await.unwrap();
        let b = store.create_item(&content("b")).await.unwrap();

        assert!(b.id > a.id);
        assert_eq!(a.revision, Revision::New);
        assert_eq!(store.list_items().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_delete_new_item_drops_row() {
        let store = SqliteStore::open_memory().unwrap();
        let item = store.create_item(&content("draft")).await.unwrap();

        assert_eq!(
            store.delete_item(item.id).await.unwrap(),
            DeleteOutcome::Dropped
        );
        assert!(store.local_items().await.unwrap().is_empty());
        assert!(store.tombstones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_synced_item_tombstones() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .apply_changes(&[LocalChange::Put(synced(4, "synced", 2))])
            .await
            .unwrap();

        assert_eq!(
            store.delete_item(ItemId(4)).await.unwrap(),
            DeleteOutcome::Tombstoned
        );
        assert!(store.list_items().await.unwrap().is_empty());
        assert!(store.get_item(ItemId(4)).await.unwrap().is_none());
        assert_eq!(store.local_items().await.unwrap().len(), 1);
        assert_eq!(store.tombstones().await.unwrap(), vec![ItemId(4)]);

        // Deleting again finds nothing visible.
        assert_eq!(
            store.delete_item(ItemId(4)).await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_edit_coalesces_fields() {
        let store = SqliteStore::open_memory().unwrap();
        let item = store.create_item(&content("old")).await.unwrap();

        let edited = store
            .edit_item(item.id, &ContentPatch::default().title("new").priority(7))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(edited.content.title, "new");
        assert_eq!(edited.content.priority, 7);
        assert_eq!(edited.content.deadline, "2024-06-01");
        assert_eq!(edited.revision, Revision::New);
        assert_eq!(store.get_item(item.id).await.unwrap(), Some(edited));
    }

    #[tokio::test]
    async fn test_edit_tombstoned_item_is_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .apply_changes(&[LocalChange::Put(synced(2, "x", 1))])
            .await
            .unwrap();
        store.delete_item(ItemId(2)).await.unwrap();

        let result = store
            .edit_item(ItemId(2), &ContentPatch::default().title("y"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_apply_changes_in_order() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .apply_changes(&[
                LocalChange::Put(synced(1, "one", 1)),
                LocalChange::Put(synced(2, "two", 1)),
            ])
            .await
            .unwrap();
        store.delete_item(ItemId(1)).await.unwrap();
        store.delete_item(ItemId(2)).await.unwrap();

        store
            .apply_changes(&[
                LocalChange::Remove(ItemId(1)),
                LocalChange::ClearTombstone(ItemId(2)),
                LocalChange::SetRevision {
                    id: ItemId(2),
                    revision: Revision::Synced(5),
                },
            ])
            .await
            .unwrap();

        assert!(store.tombstones().await.unwrap().is_empty());
        assert_eq!(store.list_items().await.unwrap(), vec![synced(2, "two", 5)]);
    }

    #[tokio::test]
    async fn test_snapshot_replace_and_clear() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .replace_snapshot(&[synced(3, "c", 1), synced(1, "a", 2)])
            .await
            .unwrap();
        store.replace_snapshot(&[synced(9, "z", 0)]).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap(), vec![synced(9, "z", 0)]);

        store.clear_snapshot().await.unwrap();
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_apply_delta() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_record(7, &synced(1, "keep", 3)).await.unwrap();
        store.insert_record(7, &synced(2, "drop", 1)).await.unwrap();
        store.insert_record(8, &synced(1, "other user", 0)).await.unwrap();

        let delta = SyncDelta {
            new: vec![
                NewItem {
                    local_id: ItemId(3),
                    id: ItemId(3),
                    content: content("fresh"),
                    revision: None,
                },
                NewItem {
                    local_id: ItemId(1),
                    id: ItemId(1),
                    content: content("collides"),
                    revision: Some(4),
                },
            ],
            updated: vec![
                ItemUpdate {
                    id: ItemId(1),
                    patch: ContentPatch::default().status("done"),
                },
                ItemUpdate {
                    id: ItemId(40),
                    patch: ContentPatch::default().status("lost"),
                },
            ],
            deleted: vec![ItemId(2)],
        };

        let applied = store.apply_delta(7, &delta).await.unwrap();
        assert_eq!(applied.created, vec![ItemId(3), ItemId(4)]);
        assert_eq!(applied.reassigned, vec![(ItemId(1), ItemId(4))]);
        assert_eq!(applied.updated, 1);
        assert_eq!(applied.deleted, 1);
        assert_eq!(applied.skipped, 1);

        let records = store.records_for(7).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ItemId(1), ItemId(3), ItemId(4)]);
        assert_eq!(records[0].content.status, "done");
        assert_eq!(records[0].revision, Revision::Synced(4));
        assert_eq!(records[1].revision, Revision::Synced(0));
        assert_eq!(records[2].revision, Revision::Synced(4));

        assert_eq!(store.records_for(8).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            let item = store.create_item(&content("persisted")).await.unwrap();
            store.delete_item(item.id).await.unwrap();
            let kept = store.create_item(&content("kept")).await.unwrap();
            kept.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let items = store.list_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].content.title, "kept");
    }
}
