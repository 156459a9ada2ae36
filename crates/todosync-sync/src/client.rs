//! Client side of the session protocol.
//!
//! A sync is a fixed sequence of request/reply legs. Each leg sends its
//! request, waits for the one reply it accepts from the listener and
//! re-sends on timeout until its attempts run out.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use todosync_core::{decode_snapshot, ItemId};
use todosync_store::ClientStore;

use crate::conflict::ConflictResolver;
use crate::convergence::{content_digest, ContentDigest};
use crate::error::{Result, SyncError};
use crate::packet::{limits, Packet, DEFAULT_PORT};
use crate::reconcile::{reconcile, MergeAction, MergeInput, MergeOutcome};
use crate::transport::Transport;

/// One request/reply exchange of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// REGISTER → REGISTER_ACK
    Register,
    /// SERVER_CLIENT_SYNC → SERVER_CLIENT_RESP
    ServerClientSync,
    /// SERVER_CLIENT_RESP_ACK → SERVER_CLIENT_DATA
    ServerClientData,
    /// CLIENT_SERVER_SYNC → CLIENT_SERVER_RESP
    ClientServerSync,
    /// CLIENT_SERVER_DATA → CLIENT_SERVER_ACK
    ClientServerData,
    /// RESET → RESET_ACK
    Reset,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Leg::Register => "REGISTER",
            Leg::ServerClientSync => "SERVER_CLIENT_SYNC",
            Leg::ServerClientData => "SERVER_CLIENT_RESP_ACK",
            Leg::ClientServerSync => "CLIENT_SERVER_SYNC",
            Leg::ClientServerData => "CLIENT_SERVER_DATA",
            Leg::Reset => "RESET",
        };
        f.write_str(name)
    }
}

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Id the client registers under; selects its records on the server.
    pub client_id: u32,
    /// Listener address.
    pub server: SocketAddr,
    /// Reply timeout for control legs.
    pub control_timeout: Duration,
    /// Reply timeout for legs that move a data packet.
    pub bulk_timeout: Duration,
    /// Attempts for the REGISTER leg.
    pub register_retries: u32,
    /// Attempts for every other leg.
    pub leg_retries: u32,
    /// Largest datagram sent or accepted.
    pub max_datagram: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: 0,
            server: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            control_timeout: Duration::from_secs(1),
            bulk_timeout: Duration::from_secs(10),
            register_retries: 5,
            leg_retries: 20,
            max_datagram: limits::MAX_DATAGRAM,
        }
    }
}

/// Result of a sync.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Records received from the server.
    pub received: usize,
    /// New items sent.
    pub sent_new: usize,
    /// Updates sent.
    pub sent_updated: usize,
    /// Deletions sent.
    pub sent_deleted: usize,
    /// Branch the merge took per item.
    pub actions: Vec<(ItemId, MergeAction)>,
    /// Requests sent again after a timeout.
    pub retransmissions: u32,
    /// Digest of the visible local items after the sync.
    pub local_digest: ContentDigest,
}

impl SyncReport {
    /// Number of items that took `action`.
    pub fn count(&self, action: MergeAction) -> usize {
        self.actions.iter().filter(|(_, a)| *a == action).count()
    }

    /// Total entries sent to the server.
    pub fn sent(&self) -> usize {
        self.sent_new + self.sent_updated + self.sent_deleted
    }
}

/// Drives syncs against one listener.
pub struct SyncClient<T: Transport> {
    transport: T,
    config: SyncConfig,
}

impl<T: Transport> SyncClient<T> {
    /// Create a new sync client.
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one full sync of `store` with the listener.
    ///
    /// Conflicts are settled by `resolver`. The merge is committed locally
    /// only once the listener acknowledged the outbound delta; a sync that
    /// fails earlier leaves Local and Tombstones untouched.
    pub async fn sync<S, R>(&self, store: &S, resolver: &mut R) -> Result<SyncReport>
    where
        S: ClientStore + ?Sized,
        R: ConflictResolver + ?Sized,
    {
        let config = &self.config;
        let mut buf = vec![0u8; config.max_datagram + 1];
        let mut retransmissions = 0;

        tracing::debug!("sync of client {} with {}", config.client_id, config.server);

        // Phase 1: Register
        let register = Packet::Register {
            client_id: config.client_id,
        }
        .encode();
        self.exchange(
            Leg::Register,
            &register,
            config.control_timeout,
            config.register_retries,
            &mut buf,
            &mut retransmissions,
            |packet| matches!(packet, Packet::RegisterAck).then_some(()),
        )
        .await?;

        // Phase 2: Download the server's records
        let len = self
            .exchange(
                Leg::ServerClientSync,
                &Packet::ServerClientSync.encode(),
                config.control_timeout,
                config.leg_retries,
                &mut buf,
                &mut retransmissions,
                |packet| match packet {
                    Packet::ServerClientResp { len } => Some(len),
                    _ => None,
                },
            )
            .await?;
        if len == 0 || len as usize > config.max_datagram {
            return Err(SyncError::Protocol(format!(
                "server announced a {} byte data packet",
                len
            )));
        }

        let payload = self
            .exchange(
                Leg::ServerClientData,
                &Packet::ServerClientRespAck.encode(),
                config.bulk_timeout,
                config.leg_retries,
                &mut buf,
                &mut retransmissions,
                |packet| match packet {
                    Packet::ServerClientData(payload) if payload.len() + 1 == len as usize => {
                        Some(payload)
                    }
                    _ => None,
                },
            )
            .await?;
        let snapshot = decode_snapshot(&payload)?;
        let received = snapshot.len();

        // Phase 3: Merge
        let (outcome, data) = self.merge(store, &snapshot, resolver).await?;

        // Phase 4: Upload the delta, then commit the plan locally
        if let Err(e) = self.upload(&data, &mut buf, &mut retransmissions).await {
            self.discard_snapshot(store).await;
            return Err(e);
        }
        store.apply_changes(&outcome.changes).await?;
        store.clear_snapshot().await?;

        // Phase 5: Close the session
        self.exchange(
            Leg::Reset,
            &Packet::Reset.encode(),
            config.control_timeout,
            config.leg_retries,
            &mut buf,
            &mut retransmissions,
            |packet| matches!(packet, Packet::ResetAck).then_some(()),
        )
        .await?;

        let local_digest = content_digest(&store.list_items().await?);
        let report = SyncReport {
            received,
            sent_new: outcome.outbound.new.len(),
            sent_updated: outcome.outbound.updated.len(),
            sent_deleted: outcome.outbound.deleted.len(),
            actions: outcome.actions,
            retransmissions,
            local_digest,
        };

        tracing::info!(
            "client {} synced: received {}, sent {}, {} retransmissions",
            config.client_id,
            report.received,
            report.sent(),
            report.retransmissions
        );
        Ok(report)
    }

    /// Merge against the downloaded snapshot.
    ///
    /// Returns the outcome and the encoded `CLIENT_SERVER_DATA` datagram.
    /// The snapshot stays in the store until the plan is committed.
    async fn merge<S, R>(
        &self,
        store: &S,
        snapshot: &[todosync_core::TodoRecord],
        resolver: &mut R,
    ) -> Result<(MergeOutcome, Bytes)>
    where
        S: ClientStore + ?Sized,
        R: ConflictResolver + ?Sized,
    {
        store.replace_snapshot(snapshot).await?;

        let (outcome, data) = match self.plan(store, resolver).await {
            Ok(planned) => planned,
            Err(e) => {
                self.discard_snapshot(store).await;
                return Err(e);
            }
        };

        tracing::debug!(
            "merge planned {} local changes, {} outbound entries",
            outcome.changes.len(),
            outcome.outbound.len()
        );
        Ok((outcome, data))
    }

    /// Announce and send the `CLIENT_SERVER_DATA` datagram.
    async fn upload(&self, data: &[u8], buf: &mut [u8], retransmissions: &mut u32) -> Result<()> {
        let config = &self.config;
        let announce = Packet::ClientServerSync {
            len: data.len() as u32,
        }
        .encode();
        self.exchange(
            Leg::ClientServerSync,
            &announce,
            config.control_timeout,
            config.leg_retries,
            buf,
            retransmissions,
            |packet| matches!(packet, Packet::ClientServerResp).then_some(()),
        )
        .await?;
        self.exchange(
            Leg::ClientServerData,
            data,
            config.bulk_timeout,
            config.leg_retries,
            buf,
            retransmissions,
            |packet| matches!(packet, Packet::ClientServerAck).then_some(()),
        )
        .await
    }

    /// Drop the scratch snapshot after a failed sync, leaving Local as it was.
    async fn discard_snapshot<S: ClientStore + ?Sized>(&self, store: &S) {
        if let Err(e) = store.clear_snapshot().await {
            tracing::warn!("failed to clear snapshot: {}", e);
        }
    }

    async fn plan<S, R>(&self, store: &S, resolver: &mut R) -> Result<(MergeOutcome, Bytes)>
    where
        S: ClientStore + ?Sized,
        R: ConflictResolver + ?Sized,
    {
        let input = MergeInput::load(store).await?;
        let outcome = reconcile(&input, resolver)?;
        let data = Packet::ClientServerData(outcome.outbound.encode()?).encode();
        if data.len() > self.config.max_datagram {
            return Err(SyncError::Protocol(format!(
                "outbound delta needs {} bytes, more than one datagram",
                data.len()
            )));
        }
        Ok((outcome, data))
    }

    /// Send `request` until a reply `accept` takes arrives from the server.
    #[allow(clippy::too_many_arguments)]
    async fn exchange<A>(
        &self,
        leg: Leg,
        request: &[u8],
        timeout: Duration,
        attempts: u32,
        buf: &mut [u8],
        retransmissions: &mut u32,
        mut accept: impl FnMut(Packet) -> Option<A> + Send,
    ) -> Result<A> {
        for attempt in 1..=attempts {
            if attempt > 1 {
                *retransmissions += 1;
                tracing::warn!("{}: no reply, attempt {} of {}", leg, attempt, attempts);
            }
            self.transport.send_to(self.config.server, request).await?;

            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }

                let Some((n, from)) = self.transport.recv_timeout(buf, remaining).await? else {
                    break;
                };
                if from != self.config.server {
                    tracing::debug!("{}: ignoring datagram from {}", leg, from);
                    continue;
                }

                match Packet::decode(&buf[..n]) {
                    Ok(packet) => {
                        let kind = packet.packet_type();
                        match accept(packet) {
                            Some(reply) => return Ok(reply),
                            None => tracing::debug!("{}: discarding {}", leg, kind),
                        }
                    }
                    Err(e) => tracing::debug!("{}: discarding malformed reply: {}", leg, e),
                }
            }
        }

        Err(SyncError::Communication { leg, attempts })
    }
}
