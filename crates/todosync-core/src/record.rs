//! Todo items: content, full records and sparse patches.

use serde::{Deserialize, Serialize};

use crate::types::{ItemId, Revision};

/// The user-editable part of a todo item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TodoContent {
    pub title: String,
    pub deadline: String,
    pub priority: i32,
    pub status: String,
    pub description: String,
}

impl TodoContent {
    /// Create content from its five fields.
    pub fn new(
        title: impl Into<String>,
        deadline: impl Into<String>,
        priority: i32,
        status: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            deadline: deadline.into(),
            priority,
            status: status.into(),
            description: description.into(),
        }
    }

    /// The fields of `self` that differ from `base`, as a patch.
    ///
    /// Applying the result to `base` yields `self`.
    pub fn diff(&self, base: &TodoContent) -> ContentPatch {
        fn changed<T: PartialEq + Clone>(ours: &T, theirs: &T) -> Option<T> {
            (ours != theirs).then(|| ours.clone())
        }

        ContentPatch {
            title: changed(&self.title, &base.title),
            deadline: changed(&self.deadline, &base.deadline),
            priority: changed(&self.priority, &base.priority),
            status: changed(&self.status, &base.status),
            description: changed(&self.description, &base.description),
        }
    }

    /// Overwrite every field present in `patch`.
    pub fn apply(&mut self, patch: &ContentPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(deadline) = &patch.deadline {
            self.deadline.clone_from(deadline);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(status) = &patch.status {
            self.status.clone_from(status);
        }
        if let Some(description) = &patch.description {
            self.description.clone_from(description);
        }
    }

    /// Return a copy with `patch` applied.
    pub fn patched(&self, patch: &ContentPatch) -> Self {
        let mut next = self.clone();
        next.apply(patch);
        next
    }
}

/// A todo item as stored in a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TodoRecord {
    pub id: ItemId,
    pub content: TodoContent,
    pub revision: Revision,
}

impl TodoRecord {
    /// Create a record.
    pub fn new(id: ItemId, content: TodoContent, revision: Revision) -> Self {
        Self {
            id,
            content,
            revision,
        }
    }

    /// Same record with a different revision.
    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }
}

/// A sparse set of content fields. `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub deadline: Option<String>,
    pub priority: Option<i32>,
    pub status: Option<String>,
    pub description: Option<String>,
}

impl ContentPatch {
    /// True if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.deadline.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.description.is_none()
    }

    /// Number of fields the patch sets.
    pub fn len(&self) -> usize {
        [
            self.title.is_some(),
            self.deadline.is_some(),
            self.priority.is_some(),
            self.status.is_some(),
            self.description.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn deadline(mut self, deadline: impl Into<String>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
