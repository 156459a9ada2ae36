//! # todosync
//!
//! A todo list that keeps a local working copy and syncs it with a central
//! listener over UDP when the network allows.
//!
//! ## Overview
//!
//! - **Local first**: create, edit and delete work offline against a
//!   per-user, per-device store
//! - **Three-way merge**: a sync downloads the server's records, merges
//!   them with local edits and deletions, and uploads only what changed
//! - **Conflicts**: when both sides changed an item, a
//!   [`ConflictResolver`](sync::ConflictResolver) decides
//! - **Lossy links**: every protocol leg is retried; the listener answers
//!   replays from its cache
//!
//! ## Usage
//!
//! ```rust,no_run
//! use todosync::{TodoConfig, TodoList};
//! use todosync::core::TodoContent;
//! use todosync::sync::ConsoleResolver;
//!
//! async fn example() {
//!     let todo = TodoList::open("/tmp", 1, 1, TodoConfig::default()).unwrap();
//!
//!     todo.create(TodoContent::new("buy milk", "today", 1, "open", ""))
//!         .await
//!         .unwrap();
//!
//!     let client = todo.connect().await.unwrap();
//!     let report = todo
//!         .sync(&client, &mut ConsoleResolver::stdio())
//!         .await
//!         .unwrap();
//!     println!("sent {} changes", report.sent());
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `todosync::core` - Items, revisions, deltas and the chunk codec
//! - `todosync::store` - Storage traits, SQLite and in-memory stores
//! - `todosync::sync` - Merge engine, listener and sync client

pub mod error;
pub mod todo;

// Re-export component crates
pub use todosync_core as core;
pub use todosync_store as store;
pub use todosync_sync as sync;

// Re-export main types for convenience
pub use error::{Result, TodoError};
pub use todo::{store_path, TodoConfig, TodoList};

pub use todosync_core::{ContentPatch, ItemId, Revision, TodoContent, TodoRecord};
pub use todosync_store::DeleteOutcome;
