//! Three-way merge of the local working copy against the server snapshot.
//!
//! Inputs are the Local rows (tombstoned ones included), the tombstone set
//! and the server's records as received at the start of the sync. The merge
//! is pure: it returns the plan to apply to the client store and the delta
//! to send to the server, asking a [`ConflictResolver`] where a human has to
//! decide.
//!
//! ## Decision Table
//!
//! ```text
//! deleted  remote  revisions  content   result
//! no       no      -          -         ask: re-send as new (Lrev+1) / drop locally
//! yes      no      -          -         drop locally
//! yes      yes     R > L      -         restore remote copy
//! yes      yes     R < L      -         drop locally, send delete
//! yes      yes     R = L      equal     drop locally, send delete
//! yes      yes     R = L      differ    ask: send delete / restore remote copy
//! no       yes     L > R      equal     nothing
//! no       yes     L > R      differ    send update, Lrev+1
//! no       yes     L < R      -         adopt remote copy
//! no       yes     L = R      equal     Lrev+1
//! no       yes     L = R      differ    ask: send update, Lrev+2 / adopt remote copy
//! ```
//!
//! Items created locally are always sent as new under a fresh id above every
//! known one, and re-keyed locally at revision 1. Server records nobody
//! matched are imported at their revision + 1.

use std::collections::{BTreeMap, BTreeSet};

use todosync_core::{
    ItemId, ItemUpdate, LocalChange, NewItem, Revision, SyncDelta, TodoRecord,
};
use todosync_store::ClientStore;

use crate::conflict::{Choice, Conflict, ConflictResolver};
use crate::error::MergeError;

/// Everything the merge reads.
#[derive(Debug, Clone, Default)]
pub struct MergeInput {
    /// Every Local row, tombstoned ones included.
    pub local: Vec<TodoRecord>,
    /// Ids deleted locally since the last sync.
    pub tombstones: BTreeSet<ItemId>,
    /// The server's records.
    pub snapshot: Vec<TodoRecord>,
}

impl MergeInput {
    /// Read the merge input from a client store.
    pub async fn load<S: ClientStore + ?Sized>(store: &S) -> todosync_store::Result<Self> {
        Ok(Self {
            local: store.local_items().await?,
            tombstones: store.tombstones().await?.into_iter().collect(),
            snapshot: store.snapshot().await?,
        })
    }
}

/// Branch the merge took for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeAction {
    /// Created locally; sent as new and re-keyed.
    QueuedNew,
    /// Server dropped it, user kept it; re-sent as new.
    KeptOverRemoteDeletion,
    /// Server dropped it, user agreed; dropped locally.
    AcceptedRemoteDeletion,
    /// Deleted locally and gone from the server.
    FinalizedDeletion,
    /// Deleted locally but restored from the server copy.
    Restored,
    /// Deleted locally; deletion sent to the server.
    PushedDeletion,
    /// Local is ahead with the same content.
    Unchanged,
    /// Local changes sent as an update.
    PushedUpdate,
    /// Server copy adopted locally.
    AdoptedRemote,
    /// Same revision and content; local revision advanced.
    Confirmed,
    /// Only the server had it; imported.
    Imported,
}

/// Result of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Changes to apply to Local and Tombstones, in order.
    pub changes: Vec<LocalChange>,
    /// Delta to send to the server.
    pub outbound: SyncDelta,
    /// Branch taken per item, keyed by the item's pre-merge id.
    pub actions: Vec<(ItemId, MergeAction)>,
}

impl MergeOutcome {
    /// Number of items that took `action`.
    pub fn count(&self, action: MergeAction) -> usize {
        self.actions.iter().filter(|(_, a)| *a == action).count()
    }

    /// Action recorded for `id`, if any.
    pub fn action_for(&self, id: ItemId) -> Option<MergeAction> {
        self.actions
            .iter()
            .find(|(item, _)| *item == id)
            .map(|(_, action)| *action)
    }
}

/// Working state of one merge.
struct Merge<'a> {
    outcome: MergeOutcome,
    /// Server records not yet matched against a Local row.
    unmatched: BTreeMap<ItemId, &'a TodoRecord>,
}

impl<'a> Merge<'a> {
    fn record(&mut self, id: ItemId, action: MergeAction) {
        tracing::debug!("merge item {}: {:?}", id, action);
        self.outcome.actions.push((id, action));
    }

    fn change(&mut self, change: LocalChange) {
        self.outcome.changes.push(change);
    }

    /// Replace the local row with the server copy, clearing any tombstone.
    fn adopt(&mut self, remote: &TodoRecord) {
        self.change(LocalChange::Put(remote.clone()));
        self.change(LocalChange::ClearTombstone(remote.id));
    }

    fn push_update(&mut self, local: &TodoRecord, remote: &TodoRecord, bump: i32) {
        self.outcome.outbound.updated.push(ItemUpdate {
            id: local.id,
            patch: local.content.diff(&remote.content),
        });
        self.change(LocalChange::SetRevision {
            id: local.id,
            revision: local.revision.advanced(bump),
        });
    }

    fn push_delete(&mut self, id: ItemId) {
        self.outcome.outbound.deleted.push(id);
        self.change(LocalChange::Remove(id));
    }

    fn merge_deleted<R>(
        &mut self,
        local: &TodoRecord,
        remote: Option<&TodoRecord>,
        resolver: &mut R,
    ) -> Result<(), MergeError>
    where
        R: ConflictResolver + ?Sized,
    {
        let id = local.id;
        let Some(remote) = remote else {
            self.change(LocalChange::Remove(id));
            self.record(id, MergeAction::FinalizedDeletion);
            return Ok(());
        };

        let (lrev, rrev) = (local.revision.to_raw(), remote.revision.to_raw());
        let restore = if rrev > lrev {
            true
        } else if rrev < lrev || local.content == remote.content {
            false
        } else {
            resolver.resolve(&Conflict::LocalDeleted { local, remote })? == Choice::TakeRemote
        };

        if restore {
            self.adopt(remote);
            self.record(id, MergeAction::Restored);
        } else {
            self.push_delete(id);
            self.record(id, MergeAction::PushedDeletion);
        }
        Ok(())
    }

    fn merge_live<R>(
        &mut self,
        local: &TodoRecord,
        remote: Option<&TodoRecord>,
        resolver: &mut R,
    ) -> Result<(), MergeError>
    where
        R: ConflictResolver + ?Sized,
    {
        let id = local.id;
        let Some(remote) = remote else {
            match resolver.resolve(&Conflict::RemoteDeleted { local })? {
                Choice::KeepLocal => {
                    self.outcome.outbound.new.push(NewItem {
                        local_id: id,
                        id,
                        content: local.content.clone(),
                        revision: local.revision.number(),
                    });
                    self.change(LocalChange::SetRevision {
                        id,
                        revision: local.revision.advanced(1),
                    });
                    self.record(id, MergeAction::KeptOverRemoteDeletion);
                }
                Choice::TakeRemote => {
                    self.change(LocalChange::Remove(id));
                    self.record(id, MergeAction::AcceptedRemoteDeletion);
                }
            }
            return Ok(());
        };

        let (lrev, rrev) = (local.revision.to_raw(), remote.revision.to_raw());
        let same = local.content == remote.content;

        if lrev > rrev {
            if same {
                self.record(id, MergeAction::Unchanged);
            } else {
                self.push_update(local, remote, 1);
                self.record(id, MergeAction::PushedUpdate);
            }
        } else if lrev < rrev {
            self.change(LocalChange::Put(remote.clone()));
            self.record(id, MergeAction::AdoptedRemote);
        } else if same {
            self.change(LocalChange::SetRevision {
                id,
                revision: local.revision.advanced(1),
            });
            self.record(id, MergeAction::Confirmed);
        } else {
            match resolver.resolve(&Conflict::Diverged { local, remote })? {
                Choice::KeepLocal => {
                    self.push_update(local, remote, 2);
                    self.record(id, MergeAction::PushedUpdate);
                }
                Choice::TakeRemote => {
                    self.change(LocalChange::Put(remote.clone()));
                    self.record(id, MergeAction::AdoptedRemote);
                }
            }
        }
        Ok(())
    }
}

/// Merge Local and Tombstones against the server snapshot.
///
/// Resolver errors abort the merge; nothing has been applied at that point.
pub fn reconcile<R>(input: &MergeInput, resolver: &mut R) -> Result<MergeOutcome, MergeError>
where
    R: ConflictResolver + ?Sized,
{
    let mut merge = Merge {
        outcome: MergeOutcome::default(),
        unmatched: input.snapshot.iter().map(|r| (r.id, r)).collect(),
    };

    let (fresh, synced): (Vec<&TodoRecord>, Vec<&TodoRecord>) =
        input.local.iter().partition(|r| r.revision.is_new());

    // Existing items first, in id order.
    for local in synced {
        let remote = merge.unmatched.remove(&local.id);
        if input.tombstones.contains(&local.id) {
            merge.merge_deleted(local, remote, resolver)?;
        } else {
            merge.merge_live(local, remote, resolver)?;
        }
    }

    let local_ids: BTreeSet<ItemId> = input.local.iter().map(|r| r.id).collect();
    for orphan in input.tombstones.difference(&local_ids) {
        tracing::warn!("tombstone for unknown item {} cleared", orphan);
        merge.change(LocalChange::ClearTombstone(*orphan));
    }

    // Locally created items get ids above everything either side knows.
    let mut last_id = input
        .local
        .iter()
        .chain(&input.snapshot)
        .map(|r| r.id)
        .max()
        .unwrap_or(ItemId(0));
    let mut confirmed = Vec::with_capacity(fresh.len());
    for local in &fresh {
        let id = last_id
            .next()
            .ok_or(MergeError::IdSpaceExhausted(last_id))?;
        last_id = id;

        merge.outcome.outbound.new.push(NewItem {
            local_id: local.id,
            id,
            content: local.content.clone(),
            revision: None,
        });
        merge.change(LocalChange::Remove(local.id));
        confirmed.push(TodoRecord::new(id, local.content.clone(), Revision::Synced(1)));
        merge.record(local.id, MergeAction::QueuedNew);
    }
    for record in confirmed {
        merge.change(LocalChange::Put(record));
    }

    // Whatever the server has that nobody matched.
    let unmatched: Vec<&TodoRecord> = merge.unmatched.values().copied().collect();
    for remote in unmatched {
        merge.change(LocalChange::Put(
            remote.clone().with_revision(remote.revision.advanced(1)),
        ));
        merge.record(remote.id, MergeAction::Imported);
    }

    Ok(merge.outcome)
}
