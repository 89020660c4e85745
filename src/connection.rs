use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::{Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{info, trace};

bitflags! {
    /// What kinds of request a connection can carry. A connection declares its capabilities up
    ///  front, and each request declares what it requires.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Capabilities: u8 {
        /// commands to the monitor processor on the board
        const SCP = 0b0001;
        /// commands to the board management processor
        const BMP = 0b0010;
        /// boot packets
        const BOOT = 0b0100;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("no datagram received before the timeout")]
    Timeout,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// The raw datagram channel to one board, introduced to decouple the windowing logic from
///  actual I/O (and to facilitate mocking it away for testing).
///
/// Datagrams are exchanged including the two padding bytes in front of the SDP header.
///
/// NB: `receive` must be cancel safe, i.e. dropping the future before it completes must not
///      lose a datagram
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn send(&self, datagram: &[u8]) -> Result<(), ConnectionError>;

    async fn receive(&self, timeout: Duration) -> Result<Bytes, ConnectionError>;

    /// true if a datagram is waiting to be received right now
    fn is_ready_to_receive(&self) -> bool;

    fn capabilities(&self) -> Capabilities;
}

/// A connection to a board via a connected UDP socket
pub struct UdpConnection {
    socket: UdpSocket,
    capabilities: Capabilities,
    /// a datagram that was received while probing for readiness, to be returned by the next
    ///  call to `receive`
    stash: Mutex<Option<Bytes>>,
}

impl UdpConnection {
    /// comfortably bigger than the largest SCP response
    const MAX_DATAGRAM_LEN: usize = 1500;

    pub async fn connect(remote_addr: SocketAddr, capabilities: Capabilities) -> anyhow::Result<UdpConnection> {
        let local_addr: SocketAddr = if remote_addr.is_ipv4() {
            "0.0.0.0:0".parse()?
        }
        else {
            "[::]:0".parse()?
        };

        let socket = UdpSocket::bind(local_addr).await?;
        socket.connect(remote_addr).await?;
        info!("bound UDP connection {:?} to board at {:?}", socket.local_addr()?, remote_addr);

        Ok(Self::from_socket(socket, capabilities))
    }

    /// wraps a socket that is already connected to the board
    pub fn from_socket(socket: UdpSocket, capabilities: Capabilities) -> UdpConnection {
        UdpConnection {
            socket,
            capabilities,
            stash: Mutex::new(None),
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn take_stashed(&self) -> Option<Bytes> {
        self.stash.lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

#[async_trait]
impl Connection for UdpConnection {
    async fn send(&self, datagram: &[u8]) -> Result<(), ConnectionError> {
        trace!("UDP connection: sending {} bytes", datagram.len());
        self.socket.send(datagram).await?;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Bytes, ConnectionError> {
        if let Some(stashed) = self.take_stashed() {
            return Ok(stashed);
        }

        let mut buf = BytesMut::zeroed(Self::MAX_DATAGRAM_LEN);
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Err(_) => Err(ConnectionError::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(num_read)) => {
                buf.truncate(num_read);
                trace!("UDP connection: received {} bytes", num_read);
                Ok(buf.freeze())
            }
        }
    }

    fn is_ready_to_receive(&self) -> bool {
        let mut stash = self.stash.lock()
            .unwrap_or_else(|e| e.into_inner());
        if stash.is_some() {
            return true;
        }

        let mut buf = BytesMut::zeroed(Self::MAX_DATAGRAM_LEN);
        match self.socket.try_recv(&mut buf) {
            Ok(num_read) => {
                buf.truncate(num_read);
                *stash = Some(buf.freeze());
                true
            }
            Err(_) => false,
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}
