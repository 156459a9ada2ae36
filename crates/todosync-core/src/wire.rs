//! Item records in chunk form.
//!
//! Outer record chunks hold inner field chunks:
//!
//! ```text
//! RECORD | NEW_RECORD | UPDATE_RECORD | DELETE_RECORD
//!   ID, TITLE, DEADLINE, PRIORITY, STATUS, DESCRIPTION, REVISION
//! ```
//!
//! Integer fields are exactly four bytes; text fields are raw UTF-8 with no
//! terminator.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chunk::{read_i32, read_text, Chunk, ChunkCursor, ChunkWriter};
use crate::error::CodecError;
use crate::record::{ContentPatch, TodoContent, TodoRecord};
use crate::types::{ItemId, Revision};

/// Chunk tag values.
pub mod tags {
    pub const RECORD: u8 = 0x01;
    pub const NEW_RECORD: u8 = 0x02;
    pub const UPDATE_RECORD: u8 = 0x03;
    pub const DELETE_RECORD: u8 = 0x04;

    pub const ID: u8 = 0x10;
    pub const TITLE: u8 = 0x11;
    pub const DEADLINE: u8 = 0x12;
    pub const PRIORITY: u8 = 0x13;
    pub const STATUS: u8 = 0x14;
    pub const DESCRIPTION: u8 = 0x15;
    pub const REVISION: u8 = 0x16;
}

/// Outer record chunk type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Full item as the server knows it (bulk server-to-client form).
    Record,
    /// Item the server has not seen yet.
    NewRecord,
    /// Sparse change to an existing item.
    UpdateRecord,
    /// Removal of an existing item.
    DeleteRecord,
}

impl RecordKind {
    pub const fn tag(self) -> u8 {
        match self {
            RecordKind::Record => tags::RECORD,
            RecordKind::NewRecord => tags::NEW_RECORD,
            RecordKind::UpdateRecord => tags::UPDATE_RECORD,
            RecordKind::DeleteRecord => tags::DELETE_RECORD,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            tags::RECORD => Some(RecordKind::Record),
            tags::NEW_RECORD => Some(RecordKind::NewRecord),
            tags::UPDATE_RECORD => Some(RecordKind::UpdateRecord),
            tags::DELETE_RECORD => Some(RecordKind::DeleteRecord),
            _ => None,
        }
    }

    /// Fields a record of this kind must carry.
    fn required_fields(self) -> &'static [Field] {
        const FULL: &[Field] = &[
            Field::Id,
            Field::Title,
            Field::Deadline,
            Field::Priority,
            Field::Status,
            Field::Description,
        ];
        match self {
            RecordKind::Record => &[
                Field::Id,
                Field::Title,
                Field::Deadline,
                Field::Priority,
                Field::Status,
                Field::Description,
                Field::Revision,
            ],
            RecordKind::NewRecord => FULL,
            RecordKind::UpdateRecord | RecordKind::DeleteRecord => &[Field::Id],
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Record => "RECORD",
            RecordKind::NewRecord => "NEW_RECORD",
            RecordKind::UpdateRecord => "UPDATE_RECORD",
            RecordKind::DeleteRecord => "DELETE_RECORD",
        };
        f.write_str(name)
    }
}

/// Inner field chunk type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Id,
    Title,
    Deadline,
    Priority,
    Status,
    Description,
    Revision,
}

impl Field {
    pub const fn tag(self) -> u8 {
        match self {
            Field::Id => tags::ID,
            Field::Title => tags::TITLE,
            Field::Deadline => tags::DEADLINE,
            Field::Priority => tags::PRIORITY,
            Field::Status => tags::STATUS,
            Field::Description => tags::DESCRIPTION,
            Field::Revision => tags::REVISION,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            tags::ID => Some(Field::Id),
            tags::TITLE => Some(Field::Title),
            tags::DEADLINE => Some(Field::Deadline),
            tags::PRIORITY => Some(Field::Priority),
            tags::STATUS => Some(Field::Status),
            tags::DESCRIPTION => Some(Field::Description),
            tags::REVISION => Some(Field::Revision),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Id => "ID",
            Field::Title => "TITLE",
            Field::Deadline => "DEADLINE",
            Field::Priority => "PRIORITY",
            Field::Status => "STATUS",
            Field::Description => "DESCRIPTION",
            Field::Revision => "REVISION",
        };
        f.write_str(name)
    }
}

/// The fields present in one record chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub id: Option<ItemId>,
    pub title: Option<String>,
    pub deadline: Option<String>,
    pub priority: Option<i32>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub revision: Option<i32>,
}

impl RecordFields {
    fn has(&self, field: Field) -> bool {
        match field {
            Field::Id => self.id.is_some(),
            Field::Title => self.title.is_some(),
            Field::Deadline => self.deadline.is_some(),
            Field::Priority => self.priority.is_some(),
            Field::Status => self.status.is_some(),
            Field::Description => self.description.is_some(),
            Field::Revision => self.revision.is_some(),
        }
    }

    fn from_content(id: ItemId, content: &TodoContent) -> Self {
        Self {
            id: Some(id),
            title: Some(content.title.clone()),
            deadline: Some(content.deadline.clone()),
            priority: Some(content.priority),
            status: Some(content.status.clone()),
            description: Some(content.description.clone()),
            revision: None,
        }
    }

    /// Full content, if all five content fields are present.
    pub fn content(&self) -> Option<TodoContent> {
        Some(TodoContent {
            title: self.title.clone()?,
            deadline: self.deadline.clone()?,
            priority: self.priority?,
            status: self.status.clone()?,
            description: self.description.clone()?,
        })
    }

    /// The content fields present, as a patch.
    pub fn patch(&self) -> ContentPatch {
        ContentPatch {
            title: self.title.clone(),
            deadline: self.deadline.clone(),
            priority: self.priority,
            status: self.status.clone(),
            description: self.description.clone(),
        }
    }

    fn set_from_chunk(&mut self, chunk: Chunk<'_>) -> Result<(), CodecError> {
        let field = Field::from_tag(chunk.tag).ok_or(CodecError::UnknownFieldType(chunk.tag))?;
        if self.has(field) {
            return Err(CodecError::DuplicateField(field));
        }

        match field {
            Field::Id => self.id = Some(ItemId(read_i32(field, chunk.body)?)),
            Field::Title => self.title = Some(read_text(field, chunk.body)?),
            Field::Deadline => self.deadline = Some(read_text(field, chunk.body)?),
            Field::Priority => self.priority = Some(read_i32(field, chunk.body)?),
            Field::Status => self.status = Some(read_text(field, chunk.body)?),
            Field::Description => self.description = Some(read_text(field, chunk.body)?),
            Field::Revision => self.revision = Some(read_i32(field, chunk.body)?),
        }
        Ok(())
    }

    fn write(&self, w: &mut ChunkWriter) -> Result<(), CodecError> {
        if let Some(id) = self.id {
            w.int(tags::ID, id.get())?;
        }
        if let Some(title) = &self.title {
            w.bytes(tags::TITLE, title.as_bytes())?;
        }
        if let Some(deadline) = &self.deadline {
            w.bytes(tags::DEADLINE, deadline.as_bytes())?;
        }
        if let Some(priority) = self.priority {
            w.int(tags::PRIORITY, priority)?;
        }
        if let Some(status) = &self.status {
            w.bytes(tags::STATUS, status.as_bytes())?;
        }
        if let Some(description) = &self.description {
            w.bytes(tags::DESCRIPTION, description.as_bytes())?;
        }
        if let Some(revision) = self.revision {
            w.int(tags::REVISION, revision)?;
        }
        Ok(())
    }
}

/// One record chunk: its kind plus whichever fields it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub kind: RecordKind,
    pub fields: RecordFields,
}

impl WireRecord {
    /// Full server-side record, as sent in the bulk snapshot.
    pub fn snapshot(record: &TodoRecord) -> Self {
        let mut fields = RecordFields::from_content(record.id, &record.content);
        fields.revision = Some(record.revision.to_raw());
        Self {
            kind: RecordKind::Record,
            fields,
        }
    }

    /// Item the server should create. `revision` is only sent when known.
    pub fn new_item(id: ItemId, content: &TodoContent, revision: Option<i32>) -> Self {
        let mut fields = RecordFields::from_content(id, content);
        fields.revision = revision;
        Self {
            kind: RecordKind::NewRecord,
            fields,
        }
    }

    /// Sparse update carrying the id and only the changed fields.
    pub fn update(id: ItemId, patch: &ContentPatch) -> Self {
        Self {
            kind: RecordKind::UpdateRecord,
            fields: RecordFields {
                id: Some(id),
                title: patch.title.clone(),
                deadline: patch.deadline.clone(),
                priority: patch.priority,
                status: patch.status.clone(),
                description: patch.description.clone(),
                revision: None,
            },
        }
    }

    /// Deletion carrying only the id.
    pub fn delete(id: ItemId) -> Self {
        Self {
            kind: RecordKind::DeleteRecord,
            fields: RecordFields {
                id: Some(id),
                ..RecordFields::default()
            },
        }
    }

    /// The record id. Present on every decoded record.
    pub fn id(&self) -> Option<ItemId> {
        self.fields.id
    }

    /// Convert a `RECORD` chunk into a full item.
    pub fn into_record(self) -> Result<TodoRecord, CodecError> {
        if self.kind != RecordKind::Record {
            return Err(CodecError::UnexpectedRecordKind(self.kind));
        }
        self.check_required()?;

        match (self.fields.id, self.fields.revision, self.fields.content()) {
            (Some(id), Some(revision), _) if revision < 0 => Err(CodecError::NegativeRevision {
                kind: self.kind,
                id,
                revision,
            }),
            (Some(id), Some(revision), Some(content)) => {
                Ok(TodoRecord::new(id, content, Revision::Synced(revision)))
            }
            _ => Err(CodecError::MissingField {
                kind: self.kind,
                field: Field::Id,
            }),
        }
    }

    /// Decode one record chunk.
    pub fn decode(chunk: Chunk<'_>) -> Result<Self, CodecError> {
        let kind = RecordKind::from_tag(chunk.tag).ok_or(CodecError::UnknownRecordType(chunk.tag))?;
        let mut fields = RecordFields::default();
        for field in ChunkCursor::new(chunk.body) {
            fields.set_from_chunk(field?)?;
        }

        let record = Self { kind, fields };
        record.check_required()?;
        Ok(record)
    }

    /// Append this record as one chunk.
    pub fn encode_into(&self, w: &mut ChunkWriter) -> Result<(), CodecError> {
        w.chunk(self.kind.tag(), |w| self.fields.write(w))
    }

    pub(crate) fn check_required(&self) -> Result<(), CodecError> {
        match self
            .kind
            .required_fields()
            .iter()
            .find(|field| !self.fields.has(**field))
        {
            Some(field) => Err(CodecError::MissingField {
                kind: self.kind,
                field: *field,
            }),
            None => Ok(()),
        }
    }
}

/// Encode a run of record chunks.
pub fn encode_records<'a, I>(records: I) -> Result<Bytes, CodecError>
where
    I: IntoIterator<Item = &'a WireRecord>,
{
    let mut w = ChunkWriter::new();
    for record in records {
        record.encode_into(&mut w)?;
    }
    Ok(w.finish())
}

/// Decode a buffer holding a run of record chunks.
pub fn decode_records(buf: &[u8]) -> Result<Vec<WireRecord>, CodecError> {
    ChunkCursor::new(buf)
        .map(|chunk| chunk.and_then(WireRecord::decode))
        .collect()
}

/// Encode full server-side items as `RECORD` chunks.
pub fn encode_snapshot(records: &[TodoRecord]) -> Result<Bytes, CodecError> {
    let wire: Vec<WireRecord> = records.iter().map(WireRecord::snapshot).collect();
    encode_records(&wire)
}

/// Decode a bulk snapshot. Every chunk must be a `RECORD`.
pub fn decode_snapshot(buf: &[u8]) -> Result<Vec<TodoRecord>, CodecError> {
    decode_records(buf)?
        .into_iter()
        .map(WireRecord::into_record)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn content() -> TodoContent {
        TodoContent::new("buy milk", "tomorrow", 1, "open", "")
    }

    #[test]
    fn test_snapshot_roundtrip_with_empty_text() {
        let record = TodoRecord::new(ItemId(3), content(), Revision::Synced(4));
        let buf = encode_snapshot(std::slice::from_ref(&record)).unwrap();
        let decoded = decode_snapshot(&buf).unwrap();
        assert_eq!(decoded, vec![record]);
    }

    #[test]
    fn test_record_chunk_layout() {
        let record = TodoRecord::new(
            ItemId(1),
            TodoContent::new("a", "", 2, "", ""),
            Revision::Synced(0),
        );
        let buf = encode_snapshot(&[record]).unwrap();
        let expected = hex::decode(concat!(
            "010022",
            "100004", "00000001",
            "110001", "61",
            "120000",
            "130004", "00000002",
            "140000",
            "150000",
            "160004", "00000000",
        ))
        .unwrap();
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_update_carries_only_changed_fields() {
        let patch = ContentPatch::default().status("done");
        let buf = encode_records(&[WireRecord::update(ItemId(8), &patch)]).unwrap();
        let decoded = decode_records(&buf).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind, RecordKind::UpdateRecord);
        assert_eq!(decoded[0].id(), Some(ItemId(8)));
        assert_eq!(decoded[0].fields.patch(), patch);
        assert!(decoded[0].fields.revision.is_none());
    }

    #[test]
    fn test_delete_is_id_only() {
        let buf = encode_records(&[WireRecord::delete(ItemId(-5))]).unwrap();
        assert_eq!(buf.as_ref(), &[0x04, 0x00, 0x07, 0x10, 0x00, 0x04, 0xff, 0xff, 0xff, 0xfb]);
    }

    #[test]
    fn test_new_item_revision_is_optional() {
        let without = WireRecord::new_item(ItemId(2), &content(), None);
        let with = WireRecord::new_item(ItemId(2), &content(), Some(6));
        let buf = encode_records([&without, &with]).unwrap();
        let decoded = decode_records(&buf).unwrap();
        assert_eq!(decoded, vec![without, with]);
    }

    #[test]
    fn test_decode_rejects_record_overrun() {
        // Outer chunk claims 20 bytes, only 7 follow.
        let buf = [0x04, 0x00, 0x14, 0x10, 0x00, 0x04, 0, 0, 0, 1];
        assert!(matches!(
            decode_records(&buf),
            Err(CodecError::ChunkOverrun { tag: 0x04, declared: 20, available: 7 })
        ));
    }

    #[test]
    fn test_decode_rejects_field_overrun() {
        // Record is 7 bytes, its ID field claims 8.
        let buf = [0x04, 0x00, 0x07, 0x10, 0x00, 0x08, 0, 0, 0, 1];
        assert!(matches!(
            decode_records(&buf),
            Err(CodecError::ChunkOverrun { tag: 0x10, declared: 8, available: 4 })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_tags() {
        let unknown_record = [0x09, 0x00, 0x00];
        assert_eq!(
            decode_records(&unknown_record),
            Err(CodecError::UnknownRecordType(0x09))
        );

        let unknown_field = [0x04, 0x00, 0x03, 0x20, 0x00, 0x00];
        assert_eq!(
            decode_records(&unknown_field),
            Err(CodecError::UnknownFieldType(0x20))
        );
    }

    #[test]
    fn test_decode_rejects_missing_and_duplicate_fields() {
        let no_id = [0x04, 0x00, 0x00];
        assert_eq!(
            decode_records(&no_id),
            Err(CodecError::MissingField {
                kind: RecordKind::DeleteRecord,
                field: Field::Id
            })
        );

        let twice = [0x04, 0x00, 0x0e, 0x10, 0x00, 0x04, 0, 0, 0, 1, 0x10, 0x00, 0x04, 0, 0, 0, 2];
        assert_eq!(
            decode_records(&twice),
            Err(CodecError::DuplicateField(Field::Id))
        );
    }

    #[test]
    fn test_snapshot_rejects_delta_records() {
        let buf = encode_records(&[WireRecord::delete(ItemId(1))]).unwrap();
        assert_eq!(
            decode_snapshot(&buf),
            Err(CodecError::UnexpectedRecordKind(RecordKind::DeleteRecord))
        );
    }

    #[test]
    fn test_empty_buffer_decodes_to_nothing() {
        assert!(decode_records(&[]).unwrap().is_empty());
    }

    fn arb_record() -> impl Strategy<Value = TodoRecord> {
        (
            any::<i32>(),
            ".{0,24}",
            ".{0,12}",
            any::<i32>(),
            ".{0,8}",
            ".{0,48}",
            0i32..=i32::MAX,
        )
            .prop_map(|(id, title, deadline, priority, status, description, rev)| {
                TodoRecord::new(
                    ItemId(id),
                    TodoContent::new(title, deadline, priority, status, description),
                    Revision::Synced(rev),
                )
            })
    }

    proptest! {
        #[test]
        fn prop_snapshot_roundtrip(records in prop::collection::vec(arb_record(), 0..8)) {
            let buf = encode_snapshot(&records).unwrap();
            prop_assert_eq!(decode_snapshot(&buf).unwrap(), records);
        }

        #[test]
        fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_records(&bytes);
        }
    }

    #[test]
    fn test_snapshot_rejects_negative_revision() {
        let record = TodoRecord::new(ItemId(4), content(), Revision::Synced(0));
        let mut wire = WireRecord::snapshot(&record);
        wire.fields.revision = Some(-1);
        let buf = encode_records(&[wire]).unwrap();

        assert_eq!(
            decode_snapshot(&buf),
            Err(CodecError::NegativeRevision {
                kind: RecordKind::Record,
                id: ItemId(4),
                revision: -1
            })
        );
    }
}
