//! Change sets exchanged by a sync.
//!
//! [`SyncDelta`] is what the client sends after merging: three explicit
//! lists instead of a table of half-nulled rows. [`LocalChange`] is one step
//! of the plan a merge applies to the client's own tables.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::record::{ContentPatch, TodoContent, TodoRecord};
use crate::types::{ItemId, Revision};
use crate::wire::{decode_records, encode_records, Field, RecordKind, WireRecord};

/// An item the server has not seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    /// Id of the item in the client store before the sync.
    ///
    /// Equal to `id` for items decoded from the wire.
    pub local_id: ItemId,
    /// Id the item is sent under.
    pub id: ItemId,
    pub content: TodoContent,
    /// Revision to create the item at. Absent for freshly created items.
    pub revision: Option<i32>,
}

/// A sparse change to an item the server already has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: ItemId,
    pub patch: ContentPatch,
}

/// Client-to-server change set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDelta {
    pub new: Vec<NewItem>,
    pub updated: Vec<ItemUpdate>,
    pub deleted: Vec<ItemId>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of entries across the three lists.
    pub fn len(&self) -> usize {
        self.new.len() + self.updated.len() + self.deleted.len()
    }

    /// Record chunks in wire order: new, then deleted, then updated.
    pub fn to_wire(&self) -> Vec<WireRecord> {
        let new = self
            .new
            .iter()
            .map(|item| WireRecord::new_item(item.id, &item.content, item.revision));
        let deleted = self.deleted.iter().map(|id| WireRecord::delete(*id));
        let updated = self
            .updated
            .iter()
            .map(|update| WireRecord::update(update.id, &update.patch));
        new.chain(deleted).chain(updated).collect()
    }

    /// Encode as a run of record chunks.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        encode_records(&self.to_wire())
    }

    /// Build a delta from decoded records.
    ///
    /// `RECORD` chunks, records missing a required field and new items with
    /// a negative revision are rejected.
    pub fn from_wire(records: Vec<WireRecord>) -> Result<Self, CodecError> {
        let mut delta = SyncDelta::default();
        for record in records {
            if record.kind == RecordKind::Record {
                return Err(CodecError::UnexpectedRecordKind(record.kind));
            }
            record.check_required()?;
            let id = record.id().ok_or(CodecError::MissingField {
                kind: record.kind,
                field: Field::Id,
            })?;

            match record.kind {
                RecordKind::NewRecord => {
                    let content = record.fields.content().ok_or(CodecError::MissingField {
                        kind: record.kind,
                        field: Field::Title,
                    })?;
                    if let Some(revision) = record.fields.revision.filter(|r| *r < 0) {
                        return Err(CodecError::NegativeRevision {
                            kind: record.kind,
                            id,
                            revision,
                        });
                    }
                    delta.new.push(NewItem {
                        local_id: id,
                        id,
                        content,
                        revision: record.fields.revision,
                    });
                }
                RecordKind::UpdateRecord => delta.updated.push(ItemUpdate {
                    id,
                    patch: record.fields.patch(),
                }),
                RecordKind::DeleteRecord => delta.deleted.push(id),
                RecordKind::Record => return Err(CodecError::UnexpectedRecordKind(record.kind)),
            }
        }
        Ok(delta)
    }

    /// Decode a client-to-server payload.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Self::from_wire(decode_records(buf)?)
    }
}

/// One step of a local merge plan, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalChange {
    /// Insert the row, or replace it if the id exists.
    Put(TodoRecord),
    /// Change only the revision of an existing row.
    SetRevision { id: ItemId, revision: Revision },
    /// Drop the row and any tombstone for it.
    Remove(ItemId),
    /// Forget a tombstone, keeping the row.
    ClearTombstone(ItemId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RecordFields;

    fn content(title: &str) -> TodoContent {
        TodoContent::new(title, "", 0, "open", "")
    }

    #[test]
    fn test_wire_order_is_new_deleted_updated() {
        let delta = SyncDelta {
            new: vec![NewItem {
                local_id: ItemId(1),
                id: ItemId(10),
                content: content("a"),
                revision: None,
            }],
            updated: vec![ItemUpdate {
                id: ItemId(3),
                patch: ContentPatch::default().title("b"),
            }],
            deleted: vec![ItemId(4)],
        };

        let kinds: Vec<_> = delta.to_wire().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecordKind::NewRecord,
                RecordKind::DeleteRecord,
                RecordKind::UpdateRecord
            ]
        );
    }

    #[test]
    fn test_decode_recovers_lists() {
        let delta = SyncDelta {
            new: vec![NewItem {
                local_id: ItemId(12),
                id: ItemId(12),
                content: content("kept"),
                revision: Some(4),
            }],
            updated: vec![ItemUpdate {
                id: ItemId(3),
                patch: ContentPatch::default().priority(9),
            }],
            deleted: vec![ItemId(4), ItemId(5)],
        };

        let buf = delta.encode().unwrap();
        assert_eq!(SyncDelta::decode(&buf).unwrap(), delta);
    }

    #[test]
    fn test_decode_rejects_snapshot_records() {
        let record = TodoRecord::new(ItemId(1), content("x"), Revision::Synced(0));
        let buf = encode_records(&[WireRecord::snapshot(&record)]).unwrap();
        assert_eq!(
            SyncDelta::decode(&buf),
            Err(CodecError::UnexpectedRecordKind(RecordKind::Record))
        );
    }

    #[test]
    fn test_empty_delta_encodes_to_nothing() {
        let delta = SyncDelta::default();
        assert!(delta.is_empty());
        assert!(delta.encode().unwrap().is_empty());
    }

    #[test]
    fn test_from_wire_rejects_incomplete_records() {
        let no_id = WireRecord {
            kind: RecordKind::DeleteRecord,
            fields: RecordFields::default(),
        };
        assert_eq!(
            SyncDelta::from_wire(vec![no_id]),
            Err(CodecError::MissingField {
                kind: RecordKind::DeleteRecord,
                field: Field::Id
            })
        );

        let mut partial = WireRecord::new_item(ItemId(3), &content("x"), None);
        partial.fields.status = None;
        assert_eq!(
            SyncDelta::from_wire(vec![partial]),
            Err(CodecError::MissingField {
                kind: RecordKind::NewRecord,
                field: Field::Status
            })
        );
    }

    #[test]
    fn test_decode_rejects_negative_new_item_revision() {
        let buf = encode_records(&[WireRecord::new_item(ItemId(9), &content("x"), Some(-2))]).unwrap();
        assert_eq!(
            SyncDelta::decode(&buf),
            Err(CodecError::NegativeRevision {
                kind: RecordKind::NewRecord,
                id: ItemId(9),
                revision: -2
            })
        );
    }
}
