//! Convergence verification.
//!
//! After a sync the client's visible items and the server's records for the
//! same user should hold the same content. Revisions are not compared: both
//! sides advance them independently.

use std::collections::BTreeMap;
use std::fmt;

use todosync_core::{ItemId, TodoContent, TodoRecord};
use todosync_store::{ClientStore, ServerStore};

use crate::error::Result;

/// Blake3 digest over the content of a set of items.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute a deterministic digest of item ids and content.
///
/// Records are hashed in id order regardless of input order. Every text
/// field is length-prefixed so field boundaries cannot shift.
pub fn content_digest(records: &[TodoRecord]) -> ContentDigest {
    let mut sorted: Vec<&TodoRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.id);

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"todosync-content-v0:");

    for record in sorted {
        hasher.update(&record.id.get().to_be_bytes());
        let c = &record.content;
        for text in [&c.title, &c.deadline, &c.status, &c.description] {
            hasher.update(&(text.len() as u64).to_be_bytes());
            hasher.update(text.as_bytes());
        }
        hasher.update(&c.priority.to_be_bytes());
    }

    ContentDigest(*hasher.finalize().as_bytes())
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides hold the same items with the same content.
    Converged,
    /// The sides disagree.
    Diverged {
        /// Visible locally, missing on the server.
        only_local: Vec<ItemId>,
        /// On the server, missing locally.
        only_remote: Vec<ItemId>,
        /// On both sides with different content.
        differing: Vec<ItemId>,
    },
}

impl ConvergenceResult {
    /// Check if the sides have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare the client's visible items with the server's records of `user`.
pub async fn verify_convergence<C, S>(client: &C, server: &S, user: u32) -> Result<ConvergenceResult>
where
    C: ClientStore + ?Sized,
    S: ServerStore + ?Sized,
{
    let local = client.list_items().await?;
    let remote = server.records_for(user).await?;
    Ok(compare(&local, &remote))
}

fn compare(local: &[TodoRecord], remote: &[TodoRecord]) -> ConvergenceResult {
    let mut remote: BTreeMap<ItemId, &TodoContent> =
        remote.iter().map(|r| (r.id, &r.content)).collect();

    let mut only_local = Vec::new();
    let mut differing = Vec::new();
    for record in local {
        match remote.remove(&record.id) {
            Some(content) if *content == record.content => {}
            Some(_) => differing.push(record.id),
            None => only_local.push(record.id),
        }
    }
    let only_remote: Vec<ItemId> = remote.into_keys().collect();

    if only_local.is_empty() && only_remote.is_empty() && differing.is_empty() {
        ConvergenceResult::Converged
    } else {
        ConvergenceResult::Diverged {
            only_local,
            only_remote,
            differing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use todosync_core::{LocalChange, Revision};
    use todosync_store::MemoryStore;

    fn record(id: i32, title: &str, rev: i32) -> TodoRecord {
        TodoRecord::new(
            ItemId(id),
            TodoContent::new(title, "", 3, "open", ""),
            Revision::Synced(rev),
        )
    }

    #[test]
    fn test_digest_ignores_order_and_revision() {
        let a = content_digest(&[record(1, "a", 1), record(2, "b", 1)]);
        let b = content_digest(&[record(2, "b", 7), record(1, "a", 4)]);
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_digest_sees_field_boundaries() {
        let mut left = record(1, "ab", 0);
        left.content.deadline = "c".into();
        let mut right = record(1, "a", 0);
        right.content.deadline = "bc".into();
        assert_ne!(content_digest(&[left]), content_digest(&[right]));
    }

    #[tokio::test]
    async fn test_verify_convergence() {
        let client = MemoryStore::new();
        let server = MemoryStore::new();

        client
            .apply_changes(&[LocalChange::Put(record(1, "a", 2)), LocalChange::Put(record(2, "b", 2))])
            .await
            .unwrap();
        server.insert_record(4, &record(1, "a", 1)).await.unwrap();
        server.insert_record(4, &record(2, "b", 1)).await.unwrap();

        let result = verify_convergence(&client, &server, 4).await.unwrap();
        assert!(result.is_converged());

        server.insert_record(4, &record(2, "changed", 2)).await.unwrap();
        server.insert_record(4, &record(3, "c", 0)).await.unwrap();
        let result = verify_convergence(&client, &server, 4).await.unwrap();
        assert_eq!(
            result,
            ConvergenceResult::Diverged {
                only_local: vec![],
                only_remote: vec![ItemId(3)],
                differing: vec![ItemId(2)],
            }
        );
    }
}
