//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: sample items, seeded stores and
//! an in-process listener on a memory network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use todosync_core::{ItemId, Revision, TodoContent, TodoRecord};
use todosync_store::{MemoryStore, ServerStore};
use todosync_sync::{
    Listener, ListenerConfig, MemoryNetwork, MemoryTransport, SyncClient, SyncConfig,
};

/// Port the harness listener binds on the memory network.
pub const LISTENER_PORT: u16 = 50001;

/// Loopback address with `port`.
pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Deterministic content for the `n`th sample item.
pub fn sample_content(n: i32) -> TodoContent {
    TodoContent::new(
        format!("task {}", n),
        format!("2024-06-{:02}", n.rem_euclid(28) + 1),
        n % 5,
        if n % 2 == 0 { "open" } else { "done" },
        format!("notes for task {}", n),
    )
}

/// A synced sample item.
pub fn sample_record(id: i32, revision: i32) -> TodoRecord {
    TodoRecord::new(ItemId(id), sample_content(id), Revision::Synced(revision))
}

/// Client config with short timeouts for the harness listener.
pub fn fast_sync_config(client_id: u32) -> SyncConfig {
    SyncConfig {
        client_id,
        server: addr(LISTENER_PORT),
        control_timeout: Duration::from_millis(50),
        bulk_timeout: Duration::from_millis(250),
        ..SyncConfig::default()
    }
}

/// A listener running on a memory network, with its own server store.
pub struct ListenerHarness {
    pub network: Arc<MemoryNetwork>,
    pub server: Arc<MemoryStore>,
    task: JoinHandle<()>,
}

impl ListenerHarness {
    /// Start a listener with the default configuration.
    pub async fn start() -> Self {
        Self::with_config(ListenerConfig::default()).await
    }

    /// Start a listener with `config`.
    pub async fn with_config(config: ListenerConfig) -> Self {
        let network = MemoryNetwork::new();
        let server = Arc::new(MemoryStore::new());
        let transport = network.create_transport(addr(LISTENER_PORT)).await;

        let mut listener = Listener::new(Arc::clone(&server), transport, config);
        let task = tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                tracing::warn!("harness listener stopped: {}", e);
            }
        });

        Self {
            network,
            server,
            task,
        }
    }

    /// Store `records` on the server for `user`.
    pub async fn seed(&self, user: u32, records: &[TodoRecord]) {
        for record in records {
            self.server
                .insert_record(user, record)
                .await
                .expect("seeding server store");
        }
    }

    /// Server records of `user`.
    pub async fn records(&self, user: u32) -> Vec<TodoRecord> {
        self.server
            .records_for(user)
            .await
            .expect("reading server store")
    }

    /// A sync client for `user` on its own port.
    pub async fn client(&self, user: u32, port: u16) -> SyncClient<MemoryTransport> {
        let transport = self.network.create_transport(addr(port)).await;
        SyncClient::new(transport, fast_sync_config(user))
    }

    /// Lose the next `count` datagrams sent to the listener.
    pub async fn drop_to_listener(&self, count: usize) {
        self.network.drop_next(addr(LISTENER_PORT), count).await;
    }

    /// Lose the next `count` datagrams sent to `port`.
    pub async fn drop_to(&self, port: u16, count: usize) {
        self.network.drop_next(addr(port), count).await;
    }
}

impl Drop for ListenerHarness {
    fn drop(&mut self) {
        self.task.abort();
    }
}
