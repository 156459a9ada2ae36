//! Listener: the server side of the session protocol.
//!
//! A single task owns one socket and the session table and processes one
//! datagram at a time. [`Listener::handle_datagram`] is the state machine
//! step; [`Listener::run`] is the receive loop around it.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use todosync_core::{encode_snapshot, CodecError, SyncDelta};
use todosync_store::ServerStore;

use crate::error::Result;
use crate::packet::{limits, Packet, PacketType};
use crate::session::{Session, SessionState, SessionTable};
use crate::transport::Transport;

/// Configuration for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
    /// How long a closed session keeps its slot.
    pub time_to_death: Duration,
    /// How long an open session may go without traffic.
    pub session_idle_timeout: Duration,
    /// Largest datagram sent or accepted.
    pub max_datagram: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_sessions: limits::MAX_SESSIONS,
            time_to_death: Duration::from_secs(100),
            session_idle_timeout: Duration::from_secs(100),
            max_datagram: limits::MAX_DATAGRAM,
        }
    }
}

/// Why a datagram got no reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not a well-formed packet.
    Malformed,
    /// Sender has no session and did not register.
    UnknownSession,
    /// Packet is valid only in another state.
    WrongState {
        state: SessionState,
        packet: PacketType,
    },
    /// No free slot for a new session.
    TableFull,
    /// A packet only the listener sends.
    UnexpectedPacket(PacketType),
    /// `CLIENT_SERVER_SYNC` announced a size no data packet can have.
    BadAnnouncedLength(u32),
    /// Data packet size differs from the announced size.
    LengthMismatch { expected: u32, actual: usize },
    /// Data packet payload did not decode.
    BadPayload(CodecError),
    /// The store failed; the peer will retry.
    Storage(String),
    /// The client's records do not fit one datagram.
    PayloadTooLarge(usize),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed => write!(f, "malformed packet"),
            DropReason::UnknownSession => write!(f, "no session for sender"),
            DropReason::WrongState { state, packet } => {
                write!(f, "{} not accepted in {}", packet, state)
            }
            DropReason::TableFull => write!(f, "session table full"),
            DropReason::UnexpectedPacket(packet) => write!(f, "unexpected {}", packet),
            DropReason::BadAnnouncedLength(len) => write!(f, "bad announced length {}", len),
            DropReason::LengthMismatch { expected, actual } => {
                write!(f, "data packet is {} bytes, announced {}", actual, expected)
            }
            DropReason::BadPayload(e) => write!(f, "bad payload: {}", e),
            DropReason::Storage(e) => write!(f, "storage failure: {}", e),
            DropReason::PayloadTooLarge(len) => write!(f, "payload of {} bytes too large", len),
        }
    }
}

/// Outcome of processing one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this datagram back to the sender.
    Reply(Bytes),
    Dropped(DropReason),
}

impl Dispatch {
    pub fn reply(&self) -> Option<&Bytes> {
        match self {
            Dispatch::Reply(bytes) => Some(bytes),
            Dispatch::Dropped(_) => None,
        }
    }
}

/// The sync listener.
pub struct Listener<S: ServerStore, T: Transport> {
    /// Per-user records.
    store: S,
    transport: T,
    config: ListenerConfig,
    sessions: SessionTable,
}

impl<S: ServerStore, T: Transport> Listener<S, T> {
    /// Create a new listener.
    pub fn new(store: S, transport: T, config: ListenerConfig) -> Self {
        let sessions = SessionTable::new(config.max_sessions);
        Self {
            store,
            transport,
            config,
            sessions,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// The address the listener receives on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Receive and answer datagrams until the transport fails.
    pub async fn run(&mut self) -> Result<()> {
        // One byte of headroom so oversized datagrams are visible.
        let mut buf = vec![0u8; self.config.max_datagram + 1];
        tracing::info!("listener started on {}", self.transport.local_addr()?);

        loop {
            let (n, from) = self.transport.recv_from(&mut buf).await?;
            let dispatch = self.handle_datagram(from, &buf[..n], Instant::now()).await;

            if let Dispatch::Reply(reply) = dispatch {
                if let Err(e) = self.transport.send_to(from, &reply).await {
                    tracing::warn!("failed to reply to {}: {}", from, e);
                }
            }
        }
    }

    /// Process one datagram from `from` received at `now`.
    pub async fn handle_datagram(&mut self, from: SocketAddr, datagram: &[u8], now: Instant) -> Dispatch {
        self.sessions.evict_expired(now);

        if datagram.len() > self.config.max_datagram {
            return self.reject(from, DropReason::PayloadTooLarge(datagram.len()));
        }

        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("dropping datagram from {}: {}", from, e);
                return Dispatch::Dropped(DropReason::Malformed);
            }
        };
        tracing::debug!("{} from {}", packet.packet_type(), from);

        if !packet.packet_type().is_server_bound() {
            return self.reject(from, DropReason::UnexpectedPacket(packet.packet_type()));
        }

        if let Packet::Register { client_id } = packet {
            return self.register(client_id, from, now);
        }

        let Some(client_id) = self.sessions.client_at(from) else {
            return self.reject(from, DropReason::UnknownSession);
        };

        let dispatch = self.step(client_id, packet, now).await;
        if let Dispatch::Dropped(reason) = &dispatch {
            tracing::warn!("client {}: {}", client_id, reason);
        }
        dispatch
    }

    fn reject(&self, from: SocketAddr, reason: DropReason) -> Dispatch {
        tracing::warn!("dropping datagram from {}: {}", from, reason);
        Dispatch::Dropped(reason)
    }

    fn idle_deadline(&self, now: Instant) -> Instant {
        now + self.config.session_idle_timeout
    }

    fn register(&mut self, client_id: u32, from: SocketAddr, now: Instant) -> Dispatch {
        let ack = Packet::RegisterAck.encode();
        let expires_at = self.idle_deadline(now);

        if let Some(session) = self.sessions.get_mut(client_id) {
            match session.state {
                SessionState::WaitScSync => {
                    // The first REGISTER_ACK was lost, or the client moved.
                    session.expires_at = expires_at;
                    self.sessions.rebind(client_id, from);
                    tracing::debug!("client {} re-registered from {}", client_id, from);
                    return Dispatch::Reply(ack);
                }
                SessionState::Closed => {}
                state => {
                    // A client only registers when it starts a sync, so the
                    // old exchange was abandoned.
                    tracing::info!("client {} restarted its sync from {}", client_id, state);
                }
            }
        }

        let mut session = Session::new(client_id, from, expires_at);
        session.last_reply = Some(ack.clone());
        if self.sessions.insert(session).is_err() {
            return self.reject(from, DropReason::TableFull);
        }

        tracing::info!("client {} registered from {}", client_id, from);
        Dispatch::Reply(ack)
    }

    async fn step(&mut self, client_id: u32, packet: Packet, now: Instant) -> Dispatch {
        let idle_deadline = self.idle_deadline(now);
        let Some(session) = self.sessions.get_mut(client_id) else {
            return Dispatch::Dropped(DropReason::UnknownSession);
        };
        let state = session.state;
        let kind = packet.packet_type();

        match (state, packet) {
            (SessionState::WaitScSync, Packet::ServerClientSync) => {
                let records = match self.store.records_for(client_id).await {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::error!("loading records of client {}: {}", client_id, e);
                        return Dispatch::Dropped(DropReason::Storage(e.to_string()));
                    }
                };
                let payload = match encode_snapshot(&records) {
                    Ok(payload) => payload,
                    Err(e) => return Dispatch::Dropped(DropReason::BadPayload(e)),
                };
                let data = Packet::ServerClientData(payload).encode();
                if data.len() > self.config.max_datagram {
                    tracing::error!(
                        "records of client {} need {} bytes, more than one datagram",
                        client_id,
                        data.len()
                    );
                    return Dispatch::Dropped(DropReason::PayloadTooLarge(data.len()));
                }

                // Bounded by max_datagram above.
                let resp = Packet::ServerClientResp {
                    len: data.len() as u32,
                }
                .encode();
                tracing::debug!("client {}: {} records, {} bytes", client_id, records.len(), data.len());

                session.expires_at = idle_deadline;
                session.outgoing = Some(data);
                session.advance(SessionState::WaitScRespAck, resp.clone());
                Dispatch::Reply(resp)
            }

            (SessionState::WaitScRespAck, Packet::ServerClientRespAck) => {
                let Some(data) = session.outgoing.take() else {
                    return Dispatch::Dropped(DropReason::WrongState { state, packet: kind });
                };
                session.expires_at = idle_deadline;
                session.advance(SessionState::WaitCsSync, data.clone());
                Dispatch::Reply(data)
            }

            (SessionState::WaitCsSync, Packet::ClientServerSync { len }) => {
                if len == 0 || len as usize > self.config.max_datagram {
                    return Dispatch::Dropped(DropReason::BadAnnouncedLength(len));
                }
                let resp = Packet::ClientServerResp.encode();
                session.expires_at = idle_deadline;
                session.expected_len = Some(len);
                session.advance(SessionState::WaitCsData, resp.clone());
                Dispatch::Reply(resp)
            }

            (SessionState::WaitCsData, Packet::ClientServerData(payload)) => {
                let expected = session.expected_len.unwrap_or(0);
                let actual = payload.len() + 1;
                if actual != expected as usize {
                    return Dispatch::Dropped(DropReason::LengthMismatch { expected, actual });
                }

                let delta = match SyncDelta::decode(&payload) {
                    Ok(delta) => delta,
                    Err(e) => return Dispatch::Dropped(DropReason::BadPayload(e)),
                };
                let applied = match self.store.apply_delta(client_id, &delta).await {
                    Ok(applied) => applied,
                    Err(e) => {
                        tracing::error!("applying delta of client {}: {}", client_id, e);
                        return Dispatch::Dropped(DropReason::Storage(e.to_string()));
                    }
                };
                tracing::debug!(
                    "client {}: created {}, updated {}, deleted {}, skipped {}",
                    client_id,
                    applied.created.len(),
                    applied.updated,
                    applied.deleted,
                    applied.skipped
                );

                let ack = Packet::ClientServerAck.encode();
                session.expires_at = idle_deadline;
                session.advance(SessionState::WaitReset, ack.clone());
                Dispatch::Reply(ack)
            }

            (SessionState::WaitReset, Packet::Reset) => {
                let ack = Packet::ResetAck.encode();
                session.expires_at = now + self.config.time_to_death;
                session.expected_len = None;
                session.advance(SessionState::Closed, ack.clone());
                tracing::info!("client {} sync session closed", client_id);
                Dispatch::Reply(ack)
            }

            // Replays of the request that led into the current state.
            (SessionState::WaitScRespAck, Packet::ServerClientSync)
            | (SessionState::WaitCsSync, Packet::ServerClientRespAck)
            | (SessionState::WaitCsData, Packet::ClientServerSync { .. })
            | (SessionState::WaitReset, Packet::ClientServerData(_))
            | (SessionState::Closed, Packet::Reset) => match session.last_reply.clone() {
                Some(reply) => {
                    if state != SessionState::Closed {
                        session.expires_at = idle_deadline;
                    }
                    tracing::debug!("client {}: replaying reply in {}", client_id, state);
                    Dispatch::Reply(reply)
                }
                None => Dispatch::Dropped(DropReason::WrongState { state, packet: kind }),
            },

            _ => Dispatch::Dropped(DropReason::WrongState { state, packet: kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use todosync_core::{ItemId, NewItem, Revision, TodoContent, TodoRecord};
    use todosync_store::MemoryStore;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn record(id: i32, title: &str) -> TodoRecord {
        TodoRecord::new(
            ItemId(id),
            TodoContent::new(title, "friday", 1, "open", ""),
            Revision::Synced(0),
        )
    }

    async fn listener() -> Listener<MemoryStore, MemoryTransport> {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(addr(50001)).await;
        Listener::new(MemoryStore::new(), transport, ListenerConfig::default())
    }

    fn reply(dispatch: Dispatch) -> Packet {
        match dispatch {
            Dispatch::Reply(bytes) => Packet::decode(&bytes).unwrap(),
            Dispatch::Dropped(reason) => panic!("expected a reply, dropped: {}", reason),
        }
    }

    fn state_of(listener: &Listener<MemoryStore, MemoryTransport>, client_id: u32) -> Option<SessionState> {
        listener.sessions().get(client_id).map(|s| s.state)
    }

    /// Drive one client through the bulk download; returns the data payload.
    async fn download(listener: &mut Listener<MemoryStore, MemoryTransport>, from: SocketAddr, now: Instant) -> Bytes {
        let sync = Packet::ServerClientSync.encode();
        let len = match reply(listener.handle_datagram(from, &sync, now).await) {
            Packet::ServerClientResp { len } => len,
            other => panic!("unexpected {:?}", other),
        };

        let ack = Packet::ServerClientRespAck.encode();
        match reply(listener.handle_datagram(from, &ack, now).await) {
            Packet::ServerClientData(payload) => {
                assert_eq!(payload.len() + 1, len as usize);
                payload
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_session() {
        let mut listener = listener().await;
        let now = Instant::now();
        let client = addr(4000);
        listener.store().insert_record(3, &record(1, "one")).await.unwrap();

        let register = Packet::Register { client_id: 3 }.encode();
        assert_eq!(reply(listener.handle_datagram(client, &register, now).await), Packet::RegisterAck);

        let payload = download(&mut listener, client, now).await;
        assert_eq!(
            todosync_core::decode_snapshot(&payload).unwrap(),
            vec![record(1, "one")]
        );
        assert_eq!(state_of(&listener, 3), Some(SessionState::WaitCsSync));

        let delta = SyncDelta {
            new: vec![NewItem {
                local_id: ItemId(-5),
                id: ItemId(2),
                content: TodoContent::new("two", "", 0, "open", ""),
                revision: None,
            }],
            ..SyncDelta::default()
        };
        let data = Packet::ClientServerData(delta.encode().unwrap()).encode();

        let announce = Packet::ClientServerSync { len: data.len() as u32 }.encode();
        assert_eq!(reply(listener.handle_datagram(client, &announce, now).await), Packet::ClientServerResp);
        assert_eq!(reply(listener.handle_datagram(client, &data, now).await), Packet::ClientServerAck);

        let reset = Packet::Reset.encode();
        assert_eq!(reply(listener.handle_datagram(client, &reset, now).await), Packet::ResetAck);
        assert_eq!(state_of(&listener, 3), Some(SessionState::Closed));

        let stored = listener.store().records_for(3).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].id, ItemId(2));
    }

    #[tokio::test]
    async fn test_out_of_order_request_is_ignored() {
        let mut listener = listener().await;
        let now = Instant::now();
        let client = addr(4000);

        let register = Packet::Register { client_id: 1 }.encode();
        reply(listener.handle_datagram(client, &register, now).await);

        let announce = Packet::ClientServerSync { len: 1 }.encode();
        let dispatch = listener.handle_datagram(client, &announce, now).await;
        assert_eq!(
            dispatch,
            Dispatch::Dropped(DropReason::WrongState {
                state: SessionState::WaitScSync,
                packet: PacketType::ClientServerSync
            })
        );
        assert_eq!(state_of(&listener, 1), Some(SessionState::WaitScSync));
    }

    #[tokio::test]
    async fn test_replayed_requests_resend_cached_reply() {
        let mut listener = listener().await;
        let now = Instant::now();
        let client = addr(4000);
        listener.store().insert_record(1, &record(1, "one")).await.unwrap();

        let register = Packet::Register { client_id: 1 }.encode();
        reply(listener.handle_datagram(client, &register, now).await);
        // Lost REGISTER_ACK.
        assert_eq!(reply(listener.handle_datagram(client, &register, now).await), Packet::RegisterAck);

        let first = download(&mut listener, client, now).await;
        // Lost SERVER_CLIENT_DATA: the client re-sends its ack.
        let ack = Packet::ServerClientRespAck.encode();
        match reply(listener.handle_datagram(client, &ack, now).await) {
            Packet::ServerClientData(again) => assert_eq!(again, first),
            other => panic!("unexpected {:?}", other),
        }

        let data = Packet::ClientServerData(Bytes::new()).encode();
        let announce = Packet::ClientServerSync { len: 1 }.encode();
        reply(listener.handle_datagram(client, &announce, now).await);
        assert_eq!(reply(listener.handle_datagram(client, &announce, now).await), Packet::ClientServerResp);
        reply(listener.handle_datagram(client, &data, now).await);
        assert_eq!(reply(listener.handle_datagram(client, &data, now).await), Packet::ClientServerAck);

        let reset = Packet::Reset.encode();
        reply(listener.handle_datagram(client, &reset, now).await);
        assert_eq!(reply(listener.handle_datagram(client, &reset, now).await), Packet::ResetAck);
    }

    #[tokio::test]
    async fn test_register_mid_session_restarts_it() {
        let mut listener = listener().await;
        let now = Instant::now();
        let register = Packet::Register { client_id: 1 }.encode();

        reply(listener.handle_datagram(addr(4000), &register, now).await);
        download(&mut listener, addr(4000), now).await;
        let announce = Packet::ClientServerSync { len: 8 }.encode();
        reply(listener.handle_datagram(addr(4000), &announce, now).await);
        assert_eq!(state_of(&listener, 1), Some(SessionState::WaitCsData));

        // The client gave up on the upload and starts over from a new port.
        assert_eq!(reply(listener.handle_datagram(addr(4001), &register, now).await), Packet::RegisterAck);
        let session = listener.sessions().get(1).unwrap();
        assert_eq!(session.state, SessionState::WaitScSync);
        assert_eq!(session.expected_len, None);
        assert!(session.outgoing.is_none());
        assert_eq!(listener.sessions().client_at(addr(4000)), None);
        assert_eq!(listener.sessions().client_at(addr(4001)), Some(1));

        download(&mut listener, addr(4001), now).await;
        assert_eq!(state_of(&listener, 1), Some(SessionState::WaitCsSync));
    }

    #[tokio::test]
    async fn test_closed_session_restarts_on_register() {
        let mut listener = listener().await;
        let now = Instant::now();
        let client = addr(4000);
        let register = Packet::Register { client_id: 1 }.encode();

        reply(listener.handle_datagram(client, &register, now).await);
        listener.sessions.get_mut(1).unwrap().state = SessionState::Closed;

        assert_eq!(reply(listener.handle_datagram(client, &register, now).await), Packet::RegisterAck);
        assert_eq!(state_of(&listener, 1), Some(SessionState::WaitScSync));
    }

    #[tokio::test]
    async fn test_unknown_sender_and_malformed() {
        let mut listener = listener().await;
        let now = Instant::now();

        let sync = Packet::ServerClientSync.encode();
        assert_eq!(
            listener.handle_datagram(addr(1), &sync, now).await,
            Dispatch::Dropped(DropReason::UnknownSession)
        );
        assert_eq!(
            listener.handle_datagram(addr(1), &[1, 0, 0], now).await,
            Dispatch::Dropped(DropReason::Malformed)
        );
        assert_eq!(
            listener.handle_datagram(addr(1), &[2], now).await,
            Dispatch::Dropped(DropReason::UnexpectedPacket(PacketType::RegisterAck))
        );
    }

    #[tokio::test]
    async fn test_full_table_drops_register_until_expiry() {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(addr(50001)).await;
        let config = ListenerConfig {
            max_sessions: 1,
            ..ListenerConfig::default()
        };
        let mut listener = Listener::new(MemoryStore::new(), transport, config);
        let now = Instant::now();

        let first = Packet::Register { client_id: 1 }.encode();
        let second = Packet::Register { client_id: 2 }.encode();
        reply(listener.handle_datagram(addr(1), &first, now).await);
        assert_eq!(
            listener.handle_datagram(addr(2), &second, now).await,
            Dispatch::Dropped(DropReason::TableFull)
        );

        let later = now + Duration::from_secs(101);
        assert_eq!(reply(listener.handle_datagram(addr(2), &second, later).await), Packet::RegisterAck);
        assert!(listener.sessions().get(1).is_none());
    }

    #[tokio::test]
    async fn test_data_length_must_match_announcement() {
        let mut listener = listener().await;
        let now = Instant::now();
        let client = addr(4000);

        let register = Packet::Register { client_id: 1 }.encode();
        reply(listener.handle_datagram(client, &register, now).await);
        download(&mut listener, client, now).await;

        let announce = Packet::ClientServerSync { len: 10 }.encode();
        reply(listener.handle_datagram(client, &announce, now).await);

        let data = Packet::ClientServerData(Bytes::new()).encode();
        assert_eq!(
            listener.handle_datagram(client, &data, now).await,
            Dispatch::Dropped(DropReason::LengthMismatch { expected: 10, actual: 1 })
        );
        assert_eq!(state_of(&listener, 1), Some(SessionState::WaitCsData));
    }

    #[tokio::test]
    async fn test_run_answers_over_transport() {
        let network = MemoryNetwork::new();
        let server = network.create_transport(addr(50001)).await;
        let client = network.create_transport(addr(4000)).await;
        let mut listener = Listener::new(MemoryStore::new(), server, ListenerConfig::default());
        let task = tokio::spawn(async move { listener.run().await });

        client
            .send_to(addr(50001), &Packet::Register { client_id: 9 }.encode())
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = client
            .recv_timeout(&mut buf, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, addr(50001));
        assert_eq!(Packet::decode(&buf[..n]), Ok(Packet::RegisterAck));

        task.abort();
    }
}
