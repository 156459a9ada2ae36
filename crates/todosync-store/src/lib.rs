//! # todosync store
//!
//! Record store adapter for todosync. Provides trait-based interfaces for
//! the client's working copy and the listener's per-user records, with
//! SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync engine only reaches storage through [`ClientStore`] and
//! [`ServerStore`]. The primary implementation is [`SqliteStore`], with
//! [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`ClientStore`] - Local items, tombstones and the scratch snapshot
//! - [`ServerStore`] - Per-user records held by the listener
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`DeleteOutcome`] - Result of deleting an item locally
//!
//! ## Usage
//!
//! ```rust,no_run
//! use todosync_core::TodoContent;
//! use todosync_store::{ClientStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("todo_db_1_dev_1").unwrap();
//!
//!     let item = store
//!         .create_item(&TodoContent::new("buy milk", "today", 1, "open", ""))
//!         .await
//!         .unwrap();
//!     println!("created item {}", item.id);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Tombstones keep rows**: deleting a synced item hides it but keeps its
//!   content and revision for the next merge
//! - **Atomic plans**: a merge plan is applied in a single transaction

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AppliedDelta, ClientStore, DeleteOutcome, ServerStore};
