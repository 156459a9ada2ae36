//! Proptest generators for property-based testing.

use proptest::prelude::*;

use todosync_core::{
    ContentPatch, ItemId, ItemUpdate, NewItem, Revision, SyncDelta, TodoContent, TodoRecord,
};

/// Generate a text field, sometimes empty, sometimes non-ASCII.
pub fn text() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z ]{1,24}",
        "\\PC{0,12}",
    ]
}

/// Generate a positive item id.
pub fn item_id() -> impl Strategy<Value = ItemId> {
    (1i32..=10_000).prop_map(ItemId)
}

/// Generate a synced revision.
pub fn synced_revision() -> impl Strategy<Value = Revision> {
    (0i32..=1_000).prop_map(Revision::Synced)
}

/// Generate item content.
pub fn todo_content() -> impl Strategy<Value = TodoContent> {
    (text(), text(), any::<i32>(), text(), text()).prop_map(
        |(title, deadline, priority, status, description)| TodoContent {
            title,
            deadline,
            priority,
            status,
            description,
        },
    )
}

/// Generate a synced item.
pub fn todo_record() -> impl Strategy<Value = TodoRecord> {
    (item_id(), todo_content(), synced_revision())
        .prop_map(|(id, content, revision)| TodoRecord::new(id, content, revision))
}

/// Generate items with distinct ids, ordered by id.
pub fn todo_records(max: usize) -> impl Strategy<Value = Vec<TodoRecord>> {
    prop::collection::btree_map(item_id(), (todo_content(), synced_revision()), 0..=max).prop_map(
        |items| {
            items
                .into_iter()
                .map(|(id, (content, revision))| TodoRecord::new(id, content, revision))
                .collect()
        },
    )
}

/// Generate a patch touching a random subset of fields.
pub fn content_patch() -> impl Strategy<Value = ContentPatch> {
    (
        proptest::option::of(text()),
        proptest::option::of(text()),
        proptest::option::of(any::<i32>()),
        proptest::option::of(text()),
        proptest::option::of(text()),
    )
        .prop_map(|(title, deadline, priority, status, description)| ContentPatch {
            title,
            deadline,
            priority,
            status,
            description,
        })
}

/// Generate a client delta as it looks after decoding (local id = id).
pub fn sync_delta() -> impl Strategy<Value = SyncDelta> {
    let new = prop::collection::vec(
        (item_id(), todo_content(), proptest::option::of(0i32..=1_000)),
        0..4,
    );
    let updated = prop::collection::vec((item_id(), content_patch()), 0..4);
    let deleted = prop::collection::vec(item_id(), 0..4);

    (new, updated, deleted).prop_map(|(new, updated, deleted)| SyncDelta {
        new: new
            .into_iter()
            .map(|(id, content, revision)| NewItem {
                local_id: id,
                id,
                content,
                revision,
            })
            .collect(),
        updated: updated
            .into_iter()
            .map(|(id, patch)| ItemUpdate { id, patch })
            .collect(),
        deleted,
    })
}
