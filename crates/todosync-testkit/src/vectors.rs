//! Golden wire vectors.
//!
//! Each vector pairs a run of record chunks with its exact encoding, so any
//! implementation of the codec can be checked byte for byte.

use serde::{Deserialize, Serialize};

use todosync_core::{decode_records, encode_records, ItemId, RecordFields, RecordKind, WireRecord};

/// A golden test vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: String,
    /// Records, in wire order.
    pub records: Vec<WireRecord>,
    /// Expected encoding (hex).
    pub expected_hex: String,
}

fn full(kind: RecordKind, id: i32, text: [&str; 4], priority: i32, revision: Option<i32>) -> WireRecord {
    let [title, deadline, status, description] = text;
    WireRecord {
        kind,
        fields: RecordFields {
            id: Some(ItemId(id)),
            title: Some(title.into()),
            deadline: Some(deadline.into()),
            priority: Some(priority),
            status: Some(status.into()),
            description: Some(description.into()),
            revision,
        },
    }
}

fn sparse(kind: RecordKind, id: i32, fields: RecordFields) -> WireRecord {
    WireRecord {
        kind,
        fields: RecordFields {
            id: Some(ItemId(id)),
            ..fields
        },
    }
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "snapshot record with empty description".into(),
            records: vec![full(RecordKind::Record, 7, ["milk", "fri", "open", ""], 3, Some(2))],
            expected_hex: concat!(
                "01002c",
                "10000400000007",
                "1100046d696c6b",
                "120003667269",
                "13000400000003",
                "1400046f70656e",
                "150000",
                "16000400000002",
            )
            .into(),
        },
        GoldenVector {
            name: "delete record".into(),
            records: vec![sparse(RecordKind::DeleteRecord, 258, RecordFields::default())],
            expected_hex: "04000710000400000102".into(),
        },
        GoldenVector {
            name: "update with negative priority".into(),
            records: vec![sparse(
                RecordKind::UpdateRecord,
                5,
                RecordFields {
                    priority: Some(-1),
                    ..RecordFields::default()
                },
            )],
            expected_hex: "03000e10000400000005130004ffffffff".into(),
        },
        GoldenVector {
            name: "new record kept over remote deletion".into(),
            records: vec![full(RecordKind::NewRecord, 9, ["x", "", "", ""], 0, Some(4))],
            expected_hex: concat!(
                "020022",
                "10000400000009",
                "11000178",
                "120000",
                "13000400000000",
                "140000",
                "150000",
                "16000400000004",
            )
            .into(),
        },
        GoldenVector {
            name: "delta in wire order".into(),
            records: vec![
                full(RecordKind::NewRecord, 12, ["tea", "", "open", ""], 1, None),
                sparse(RecordKind::DeleteRecord, 3, RecordFields::default()),
                sparse(
                    RecordKind::UpdateRecord,
                    4,
                    RecordFields {
                        status: Some("done".into()),
                        ..RecordFields::default()
                    },
                ),
            ],
            expected_hex: concat!(
                "020021",
                "1000040000000c",
                "110003746561",
                "120000",
                "13000400000001",
                "1400046f70656e",
                "150000",
                "040007",
                "10000400000003",
                "03000e",
                "10000400000004",
                "140004646f6e65",
            )
            .into(),
        },
    ]
}

/// Check one vector in both directions.
pub fn verify_vector(vector: &GoldenVector) -> Result<(), String> {
    let encoded = encode_records(&vector.records).map_err(|e| format!("{}: {}", vector.name, e))?;
    let actual_hex = hex::encode(&encoded);
    if actual_hex != vector.expected_hex {
        return Err(format!(
            "{}: expected {}, got {}",
            vector.name, vector.expected_hex, actual_hex
        ));
    }

    let bytes = hex::decode(&vector.expected_hex).map_err(|e| format!("{}: {}", vector.name, e))?;
    let decoded = decode_records(&bytes).map_err(|e| format!("{}: {}", vector.name, e))?;
    if decoded != vector.records {
        return Err(format!("{}: decoded records differ", vector.name));
    }
    Ok(())
}

/// Verify all golden vectors.
pub fn verify_all_vectors() -> Result<(), String> {
    all_vectors().iter().try_for_each(verify_vector)
}

/// All vectors as pretty-printed JSON, for other implementations.
pub fn vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&all_vectors())
}

#[cfg(test)]
mod tests {
    use super::*;
    use todosync_core::{ContentPatch, NewItem, SyncDelta, TodoContent};

    #[test]
    fn test_all_vectors_verify() {
        verify_all_vectors().unwrap();
    }

    #[test]
    fn test_delta_vector_matches_sync_delta() {
        let delta = SyncDelta {
            new: vec![NewItem {
                local_id: ItemId(-1),
                id: ItemId(12),
                content: TodoContent::new("tea", "", 1, "open", ""),
                revision: None,
            }],
            updated: vec![todosync_core::ItemUpdate {
                id: ItemId(4),
                patch: ContentPatch::default().status("done"),
            }],
            deleted: vec![ItemId(3)],
        };

        let vector = all_vectors()
            .into_iter()
            .find(|v| v.name == "delta in wire order")
            .unwrap();
        assert_eq!(hex::encode(delta.encode().unwrap()), vector.expected_hex);
    }

    #[test]
    fn test_vectors_json_roundtrip() {
        let json = vectors_json().unwrap();
        let parsed: Vec<GoldenVector> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), all_vectors().len());
        assert_eq!(parsed[1].records, all_vectors()[1].records);
    }
}
