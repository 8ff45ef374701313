//! Datagram transport underneath the hub.
//!
//! The hub only sees [`ConnectionHandle`]s. [`UdpTransport`] assigns a fresh
//! handle the first time a peer address is heard from and reports it with a
//! `Connected` event ahead of that peer's first datagram.

use log::debug;
use shared::MAX_DATAGRAM_LEN;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Opaque identifier of a live transport peer. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(ConnectionHandle),
    Datagram(ConnectionHandle, Vec<u8>),
    Disconnected(ConnectionHandle),
}

/// Transport consumed by the hub.
///
/// `recv` must be cancel safe: the hub polls it inside `tokio::select!`.
pub trait Transport: Send {
    fn recv(&mut self) -> impl Future<Output = io::Result<TransportEvent>> + Send;

    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> io::Result<()>;

    /// Releases whatever the transport holds for `handle`.
    fn close(&mut self, handle: ConnectionHandle);
}

/// UDP transport multiplexing every peer on one socket.
pub struct UdpTransport {
    socket: UdpSocket,
    buffer: Vec<u8>,
    by_addr: HashMap<SocketAddr, ConnectionHandle>,
    by_handle: HashMap<ConnectionHandle, SocketAddr>,
    next_handle: u64,
    pending: Option<TransportEvent>,
}

impl UdpTransport {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            buffer: vec![0u8; MAX_DATAGRAM_LEN],
            by_addr: HashMap::new(),
            by_handle: HashMap::new(),
            next_handle: 1,
            pending: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self, handle: ConnectionHandle) -> Option<SocketAddr> {
        self.by_handle.get(&handle).copied()
    }

    fn handle_for(&mut self, addr: SocketAddr) -> (ConnectionHandle, bool) {
        if let Some(handle) = self.by_addr.get(&addr) {
            return (*handle, false);
        }

        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        self.by_addr.insert(addr, handle);
        self.by_handle.insert(handle, addr);
        debug!("New peer {} assigned {}", addr, handle);
        (handle, true)
    }
}

impl Transport for UdpTransport {
    async fn recv(&mut self) -> io::Result<TransportEvent> {
        if let Some(event) = self.pending.take() {
            return Ok(event);
        }

        let (len, addr) = self.socket.recv_from(&mut self.buffer).await?;
        let bytes = self.buffer[..len].to_vec();
        let (handle, is_new) = self.handle_for(addr);

        if is_new {
            self.pending = Some(TransportEvent::Datagram(handle, bytes));
            Ok(TransportEvent::Connected(handle))
        } else {
            Ok(TransportEvent::Datagram(handle, bytes))
        }
    }

    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> io::Result<()> {
        let addr = self.by_handle.get(&handle).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{} is closed", handle))
        })?;

        match self.socket.try_send_to(bytes, addr) {
            Ok(_) => Ok(()),
            // A full send buffer drops this datagram only; UDP is lossy anyway.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Send buffer full, dropped datagram to {}", handle);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self, handle: ConnectionHandle) {
        if let Some(addr) = self.by_handle.remove(&handle) {
            self.by_addr.remove(&addr);
        }
    }
}
