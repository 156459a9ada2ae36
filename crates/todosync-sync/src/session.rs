//! Listener session table.
//!
//! One session per client id, capacity-bounded, with an address index so
//! datagrams other than `REGISTER` can be routed by sender. Every entry
//! carries the instant it expires; expired entries are evicted lazily.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::time::Instant;

/// Where a session stands in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Finished; the slot is kept until it expires so a late `RESET` can
    /// still be answered.
    Closed,
    WaitScSync,
    WaitScRespAck,
    WaitCsSync,
    WaitCsData,
    WaitReset,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "CLOSED",
            SessionState::WaitScSync => "WAIT_SC_SYNC",
            SessionState::WaitScRespAck => "WAIT_SC_RESP_ACK",
            SessionState::WaitCsSync => "WAIT_CS_SYNC",
            SessionState::WaitCsData => "WAIT_CS_DATA",
            SessionState::WaitReset => "WAIT_RESET",
        };
        f.write_str(name)
    }
}

/// One client's session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Client (user) id the session serves.
    pub client_id: u32,
    /// Address the client last registered from.
    pub addr: SocketAddr,
    pub state: SessionState,
    /// When the slot may be reused.
    pub expires_at: Instant,
    /// Reply that moved the session into its current state, re-sent when
    /// the request that caused it is replayed.
    pub last_reply: Option<Bytes>,
    /// `SERVER_CLIENT_DATA` datagram prepared for the client.
    pub outgoing: Option<Bytes>,
    /// Announced size of the client's data datagram.
    pub expected_len: Option<u32>,
}

impl Session {
    /// A fresh session waiting for `SERVER_CLIENT_SYNC`.
    pub fn new(client_id: u32, addr: SocketAddr, expires_at: Instant) -> Self {
        Self {
            client_id,
            addr,
            state: SessionState::WaitScSync,
            expires_at,
            last_reply: None,
            outgoing: None,
            expected_len: None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Move to `state`, remembering the reply that goes with the move.
    pub fn advance(&mut self, state: SessionState, reply: Bytes) {
        self.state = state;
        self.last_reply = Some(reply);
    }
}

/// The table has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

/// Capacity-bounded map from client id to session.
#[derive(Debug)]
pub struct SessionTable {
    sessions: HashMap<u32, Session>,
    by_addr: HashMap<SocketAddr, u32>,
    capacity: usize,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::with_capacity(capacity),
            by_addr: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every session that expired at `now`. Returns how many went.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.client_id)
            .collect();

        for client_id in &expired {
            self.remove(*client_id);
        }
        expired.len()
    }

    pub fn get(&self, client_id: u32) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&client_id)
    }

    /// Client id of the session bound to `addr`.
    pub fn client_at(&self, addr: SocketAddr) -> Option<u32> {
        self.by_addr.get(&addr).copied()
    }

    /// Insert or replace the session for its client id.
    pub fn insert(&mut self, session: Session) -> Result<(), TableFull> {
        if !self.sessions.contains_key(&session.client_id) && self.sessions.len() >= self.capacity {
            return Err(TableFull);
        }

        let client_id = session.client_id;
        self.unbind(client_id);
        self.by_addr.insert(session.addr, client_id);
        self.sessions.insert(client_id, session);
        Ok(())
    }

    /// Point `client_id`'s session at a new address.
    pub fn rebind(&mut self, client_id: u32, addr: SocketAddr) {
        self.unbind(client_id);
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.addr = addr;
            self.by_addr.insert(addr, client_id);
        }
    }

    pub fn remove(&mut self, client_id: u32) -> Option<Session> {
        self.unbind(client_id);
        self.sessions.remove(&client_id)
    }

    /// Iterate over all sessions.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    fn unbind(&mut self, client_id: u32) {
        if let Some(session) = self.sessions.get(&client_id) {
            if self.by_addr.get(&session.addr) == Some(&client_id) {
                self.by_addr.remove(&session.addr);
            }
        }
    }
}
