//! # todosync sync
//!
//! Reconciliation engine and UDP session protocol for todosync.
//!
//! ## Overview
//!
//! A client syncs its local todo list with a central listener over plain
//! UDP. The listener holds the authoritative records of every user; the
//! client downloads them, merges them with its working copy and uploads
//! what changed locally.
//!
//! - [`reconcile`] is the pure three-way merge of local items, local
//!   tombstones and the server snapshot
//! - [`Listener`] answers sessions, one per client id
//! - [`SyncClient`] drives one sync as a fixed sequence of retried legs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use todosync_store::SqliteStore;
//! use todosync_sync::{FixedResolver, Choice, SyncClient, SyncConfig, UdpTransport};
//!
//! async fn example() {
//!     let store = SqliteStore::open("todo_db_1_dev_1").unwrap();
//!     let transport = UdpTransport::bind("0.0.0.0:0").await.unwrap();
//!
//!     let config = SyncConfig {
//!         client_id: 1,
//!         ..SyncConfig::default()
//!     };
//!     let client = SyncClient::new(transport, config);
//!
//!     let report = client
//!         .sync(&store, &mut FixedResolver(Choice::KeepLocal))
//!         .await
//!         .unwrap();
//!     println!("received {} records, sent {}", report.received, report.sent());
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                                   Listener
//!   |-------- REGISTER{id} ----------------->|
//!   |<------- REGISTER_ACK ------------------|
//!   |-------- SERVER_CLIENT_SYNC ----------->|
//!   |<------- SERVER_CLIENT_RESP{len} -------|
//!   |-------- SERVER_CLIENT_RESP_ACK ------->|
//!   |<------- SERVER_CLIENT_DATA ------------|
//!   |                 (merge)                |
//!   |-------- CLIENT_SERVER_SYNC{len} ------>|
//!   |<------- CLIENT_SERVER_RESP ------------|
//!   |-------- CLIENT_SERVER_DATA ----------->|
//!   |<------- CLIENT_SERVER_ACK -------------|
//!   |-------- RESET ------------------------>|
//!   |<------- RESET_ACK ---------------------|
//! ```
//!
//! Every leg is retried by the client on timeout; the listener answers a
//! replayed request with its cached reply.

pub mod client;
pub mod conflict;
pub mod convergence;
pub mod error;
pub mod listener;
pub mod packet;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use client::{Leg, SyncClient, SyncConfig, SyncReport};
pub use conflict::{
    Choice, Conflict, ConflictKind, ConflictResolver, ConsoleResolver, FixedResolver, FnResolver,
    ScriptedResolver,
};
pub use convergence::{content_digest, verify_convergence, ContentDigest, ConvergenceResult};
pub use error::{MergeError, PacketError, ResolveError, Result, SyncError};
pub use listener::{Dispatch, DropReason, Listener, ListenerConfig};
pub use packet::{limits, Packet, PacketType, DEFAULT_PORT};
pub use reconcile::{reconcile, MergeAction, MergeInput, MergeOutcome};
pub use session::{Session, SessionState, SessionTable};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport, UdpTransport};
