//! Datagram transport abstraction.
//!
//! The session protocol only needs unreliable, unordered datagrams between
//! socket addresses. [`UdpTransport`] is the production implementation;
//! [`memory`] provides an in-process network with loss injection for tests.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{ToSocketAddrs, UdpSocket};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, io::Error>;

/// A datagram socket.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `peer`. Delivery is not guaranteed.
    async fn send_to(&self, peer: SocketAddr, datagram: &[u8]) -> Result<()>;

    /// Receive the next datagram into `buf`.
    ///
    /// Returns the datagram length and sender. Datagrams longer than `buf`
    /// are truncated.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Receive with timeout.
    ///
    /// Returns None if the timeout expires before a datagram arrives.
    async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(timeout, self.recv_from(buf)).await {
            Ok(received) => received.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// The address this transport receives on.
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// UDP transport over a tokio socket.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a UDP socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Wrap an already bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, peer: SocketAddr, datagram: &[u8]) -> Result<()> {
        let sent = self.socket.send_to(datagram, peer).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate datagrams between addresses. Datagrams to an
/// address nobody listens on vanish, as they would over UDP.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::{mpsc, Mutex, RwLock};

    type Datagram = (SocketAddr, Bytes);

    /// Shared state for the memory network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        /// Inbox of each bound address.
        inboxes: RwLock<HashMap<SocketAddr, mpsc::Sender<Datagram>>>,
        /// Datagrams still to be dropped, per destination.
        pending_drops: Mutex<HashMap<SocketAddr, usize>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport bound to `addr` on this network.
        pub async fn create_transport(self: &Arc<Self>, addr: SocketAddr) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1024);

            self.inboxes.write().await.insert(addr, tx);

            MemoryTransport {
                addr,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Silently drop the next `count` datagrams sent to `addr`.
        pub async fn drop_next(&self, addr: SocketAddr, count: usize) {
            *self.pending_drops.lock().await.entry(addr).or_default() += count;
        }

        async fn should_drop(&self, addr: SocketAddr) -> bool {
            let mut drops = self.pending_drops.lock().await;
            match drops.get_mut(&addr) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        addr: SocketAddr,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Datagram>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_to(&self, peer: SocketAddr, datagram: &[u8]) -> Result<()> {
            if self.network.should_drop(peer).await {
                tracing::trace!("memory network dropped {} bytes to {}", datagram.len(), peer);
                return Ok(());
            }

            let inboxes = self.network.inboxes.read().await;
            if let Some(inbox) = inboxes.get(&peer) {
                // A full or closed inbox loses the datagram.
                let _ = inbox.try_send((self.addr, Bytes::copy_from_slice(datagram)));
            }
            Ok(())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some((from, datagram)) => {
                    let len = datagram.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    Ok((len, from))
                }
                None => Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "memory network closed",
                )),
            }
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_memory_transport_send_recv() {
        let network = MemoryNetwork::new();
        let a = network.create_transport(addr(1)).await;
        let b = network.create_transport(addr(2)).await;

        a.send_to(addr(2), b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, addr(1));
    }

    #[tokio::test]
    async fn test_memory_transport_drops_and_times_out() {
        let network = MemoryNetwork::new();
        let a = network.create_transport(addr(1)).await;
        let b = network.create_transport(addr(2)).await;

        network.drop_next(addr(2), 1).await;
        a.send_to(addr(2), b"lost").await.unwrap();
        a.send_to(addr(9), b"nobody").await.unwrap();

        let mut buf = [0u8; 16];
        let received = b
            .recv_timeout(&mut buf, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(received.is_none());

        a.send_to(addr(2), b"kept").await.unwrap();
        let (n, _) = b
            .recv_timeout(&mut buf, Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"kept");
    }

    #[tokio::test]
    async fn test_udp_transport_loopback() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        a.send_to(b.local_addr().unwrap(), &[11]).await.unwrap();

        let mut buf = [0u8; 8];
        let (n, from) = b
            .recv_timeout(&mut buf, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &[11]);
        assert_eq!(from, a.local_addr().unwrap());
    }
}
