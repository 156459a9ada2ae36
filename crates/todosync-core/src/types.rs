//! Strong type definitions for todosync.
//!
//! Identifiers and revisions are newtypes so the sentinel "not yet synced"
//! value can never be confused with a real revision number.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A server-assigned item identifier.
///
/// Carried on the wire as a 4-byte big-endian two's-complement integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i32);

impl ItemId {
    /// Create a new ItemId.
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw integer.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// The id following this one, if it does not overflow.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ItemId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Sentinel stored in the revision column for items created locally.
pub const NEW_REVISION_SENTINEL: i32 = -1;

/// Revision counter of an item.
///
/// `New` marks an item created locally whose id the server has not yet
/// confirmed. Synced revisions are never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Revision {
    /// Created locally, never synced.
    New,
    /// Revision as counted by the sync protocol.
    Synced(i32),
}

impl Revision {
    /// Whether this is the "never synced" sentinel.
    pub const fn is_new(self) -> bool {
        matches!(self, Revision::New)
    }

    /// The revision number, if synced.
    pub const fn number(self) -> Option<i32> {
        match self {
            Revision::New => None,
            Revision::Synced(n) => Some(n),
        }
    }

    /// Advance a synced revision by `by`. `New` stays `New`.
    pub fn advanced(self, by: i32) -> Self {
        match self {
            Revision::New => Revision::New,
            Revision::Synced(n) => Revision::Synced(n.saturating_add(by)),
        }
    }

    /// Encode for storage (and the wire), using the sentinel for `New`.
    pub const fn to_raw(self) -> i32 {
        match self {
            Revision::New => NEW_REVISION_SENTINEL,
            Revision::Synced(n) => n,
        }
    }

    /// Decode a stored or transmitted revision.
    ///
    /// Any negative value maps to `New`.
    pub const fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            Revision::New
        } else {
            Revision::Synced(raw)
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::New => write!(f, "new"),
            Revision::Synced(n) => write!(f, "{}", n),
        }
    }
}
