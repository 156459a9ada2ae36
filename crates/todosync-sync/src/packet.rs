//! Session protocol packets.
//!
//! Every datagram starts with a one-byte packet type. Integers are 4-byte
//! big-endian. Data packets carry a run of record chunks after the type
//! byte; every other packet has a fixed size and must match it exactly.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// Default UDP port of the listener.
pub const DEFAULT_PORT: u16 = 50001;

/// Protocol limits.
pub mod limits {
    /// Largest UDP payload over IPv4.
    pub const MAX_DATAGRAM: usize = 65_507;
    /// Default number of concurrent listener sessions.
    pub const MAX_SESSIONS: usize = 16;
}

/// Packet type tag. 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Register = 1,
    RegisterAck = 2,
    ServerClientSync = 3,
    ServerClientResp = 4,
    ServerClientRespAck = 5,
    ServerClientData = 6,
    ClientServerSync = 7,
    ClientServerResp = 8,
    ClientServerData = 9,
    ClientServerAck = 10,
    Reset = 11,
    ResetAck = 12,
}

impl PacketType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PacketType::Register),
            2 => Some(PacketType::RegisterAck),
            3 => Some(PacketType::ServerClientSync),
            4 => Some(PacketType::ServerClientResp),
            5 => Some(PacketType::ServerClientRespAck),
            6 => Some(PacketType::ServerClientData),
            7 => Some(PacketType::ClientServerSync),
            8 => Some(PacketType::ClientServerResp),
            9 => Some(PacketType::ClientServerData),
            10 => Some(PacketType::ClientServerAck),
            11 => Some(PacketType::Reset),
            12 => Some(PacketType::ResetAck),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Exact datagram size for fixed-size packets, `None` for data packets.
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            PacketType::Register | PacketType::ServerClientResp | PacketType::ClientServerSync => {
                Some(5)
            }
            PacketType::ServerClientData | PacketType::ClientServerData => None,
            _ => Some(1),
        }
    }

    /// Whether the listener is the receiver of this packet type.
    pub const fn is_server_bound(self) -> bool {
        matches!(
            self,
            PacketType::Register
                | PacketType::ServerClientSync
                | PacketType::ServerClientRespAck
                | PacketType::ClientServerSync
                | PacketType::ClientServerData
                | PacketType::Reset
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::Register => "REGISTER",
            PacketType::RegisterAck => "REGISTER_ACK",
            PacketType::ServerClientSync => "SERVER_CLIENT_SYNC",
            PacketType::ServerClientResp => "SERVER_CLIENT_RESP",
            PacketType::ServerClientRespAck => "SERVER_CLIENT_RESP_ACK",
            PacketType::ServerClientData => "SERVER_CLIENT_DATA",
            PacketType::ClientServerSync => "CLIENT_SERVER_SYNC",
            PacketType::ClientServerResp => "CLIENT_SERVER_RESP",
            PacketType::ClientServerData => "CLIENT_SERVER_DATA",
            PacketType::ClientServerAck => "CLIENT_SERVER_ACK",
            PacketType::Reset => "RESET",
            PacketType::ResetAck => "RESET_ACK",
        };
        f.write_str(name)
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Client announces itself under its client (user) id.
    Register { client_id: u32 },
    RegisterAck,
    /// Client asks for the server's records.
    ServerClientSync,
    /// Size of the data packet that will follow, type byte included.
    ServerClientResp { len: u32 },
    ServerClientRespAck,
    /// Server's records as `RECORD` chunks.
    ServerClientData(Bytes),
    /// Size of the data packet the client is about to send.
    ClientServerSync { len: u32 },
    ClientServerResp,
    /// Client's changes as `NEW_RECORD`/`UPDATE_RECORD`/`DELETE_RECORD` chunks.
    ClientServerData(Bytes),
    ClientServerAck,
    Reset,
    ResetAck,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Register { .. } => PacketType::Register,
            Packet::RegisterAck => PacketType::RegisterAck,
            Packet::ServerClientSync => PacketType::ServerClientSync,
            Packet::ServerClientResp { .. } => PacketType::ServerClientResp,
            Packet::ServerClientRespAck => PacketType::ServerClientRespAck,
            Packet::ServerClientData(_) => PacketType::ServerClientData,
            Packet::ClientServerSync { .. } => PacketType::ClientServerSync,
            Packet::ClientServerResp => PacketType::ClientServerResp,
            Packet::ClientServerData(_) => PacketType::ClientServerData,
            Packet::ClientServerAck => PacketType::ClientServerAck,
            Packet::Reset => PacketType::Reset,
            Packet::ResetAck => PacketType::ResetAck,
        }
    }

    /// Size of the encoded datagram.
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::ServerClientData(payload) | Packet::ClientServerData(payload) => {
                1 + payload.len()
            }
            other => other.packet_type().fixed_len().unwrap_or(1),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.packet_type().to_u8());

        match self {
            Packet::Register { client_id } => buf.put_u32(*client_id),
            Packet::ServerClientResp { len } | Packet::ClientServerSync { len } => {
                buf.put_u32(*len)
            }
            Packet::ServerClientData(payload) | Packet::ClientServerData(payload) => {
                buf.put_slice(payload)
            }
            _ => {}
        }

        buf.freeze()
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        let (&tag, body) = datagram.split_first().ok_or(PacketError::Empty)?;
        let kind = PacketType::from_u8(tag).ok_or(PacketError::UnknownType(tag))?;

        if let Some(expected) = kind.fixed_len() {
            if datagram.len() != expected {
                return Err(PacketError::BadLength {
                    kind,
                    expected,
                    actual: datagram.len(),
                });
            }
        }

        let word = || u32::from_be_bytes([body[0], body[1], body[2], body[3]]);

        Ok(match kind {
            PacketType::Register => Packet::Register { client_id: word() },
            PacketType::RegisterAck => Packet::RegisterAck,
            PacketType::ServerClientSync => Packet::ServerClientSync,
            PacketType::ServerClientResp => Packet::ServerClientResp { len: word() },
            PacketType::ServerClientRespAck => Packet::ServerClientRespAck,
            PacketType::ServerClientData => Packet::ServerClientData(Bytes::copy_from_slice(body)),
            PacketType::ClientServerSync => Packet::ClientServerSync { len: word() },
            PacketType::ClientServerResp => Packet::ClientServerResp,
            PacketType::ClientServerData => Packet::ClientServerData(Bytes::copy_from_slice(body)),
            PacketType::ClientServerAck => Packet::ClientServerAck,
            PacketType::Reset => Packet::Reset,
            PacketType::ResetAck => Packet::ResetAck,
        })
    }
}
