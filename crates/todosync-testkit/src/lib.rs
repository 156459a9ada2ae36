//! # todosync testkit
//!
//! Testing utilities for todosync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Record chunks with their exact encoding
//! - **Generators**: Proptest strategies for items, patches and deltas
//! - **Fixtures**: Sample items and an in-process listener over the memory
//!   network, with loss injection
//!
//! ## Golden Vectors
//!
//! ```rust
//! use todosync_testkit::vectors::{all_vectors, verify_vector};
//!
//! for vector in all_vectors() {
//!     verify_vector(&vector).unwrap();
//! }
//! ```
//!
//! ## Listener Harness
//!
//! ```rust,no_run
//! use todosync_store::MemoryStore;
//! use todosync_sync::{Choice, FixedResolver};
//! use todosync_testkit::fixtures::{sample_record, ListenerHarness};
//!
//! async fn example() {
//!     let harness = ListenerHarness::start().await;
//!     harness.seed(1, &[sample_record(1, 0)]).await;
//!
//!     let client = harness.client(1, 4000).await;
//!     let store = MemoryStore::new();
//!     client
//!         .sync(&store, &mut FixedResolver(Choice::KeepLocal))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{fast_sync_config, sample_content, sample_record, ListenerHarness};
pub use todosync_sync::ScriptedResolver;
pub use vectors::{all_vectors, verify_all_vectors, verify_vector, GoldenVector};

use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
