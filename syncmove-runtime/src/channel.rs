use std::{net::SocketAddr, time::Duration};

use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    sync::mpsc,
};

use crate::protocol::{Frame, MAX_PACKET_SIZE};

/// One end of a channel pair.
///
/// The outbound direction carries frames towards the peer, the inbound
/// direction carries frames from the peer. Each end has exactly one writer
/// and one reader, the owner of the link.
#[async_trait::async_trait]
pub trait Link: Send {
    /// Write a raw message to the outbound side.
    async fn send(&mut self, buffer: &[u8]) -> std::io::Result<()>;

    /// Wait at most `timeout` for a raw message on the inbound side.
    ///
    /// Returns `None` when nothing arrived in time. A zero timeout performs a
    /// single non-blocking attempt.
    async fn recv(&mut self, timeout: Duration) -> std::io::Result<Option<Vec<u8>>>;

    /// Encode and send a frame.
    async fn send_frame(&mut self, values: &[f64]) -> std::io::Result<()> {
        self.send(&crate::protocol::encode(values)).await
    }

    /// Receive and decode a frame.
    ///
    /// Malformed messages are discarded and reported as no data.
    async fn recv_frame(&mut self, timeout: Duration) -> std::io::Result<Option<Frame>> {
        match self.recv(timeout).await? {
            Some(buffer) => match Frame::try_from(&buffer[..]) {
                Ok(frame) => Ok(Some(frame)),
                Err(e) => {
                    log::debug!("Discarding malformed frame: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

/// Channel end over UDP.
///
/// Every frame travels as a single datagram, so message boundaries survive
/// the transport and the decoder sees exactly what the peer sent.
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
    buffer: Vec<u8>,
}

impl UdpLink {
    /// Bind the inbound side to `local` and direct the outbound side at `peer`.
    pub async fn bind(local: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;

        let peer = tokio::net::lookup_host(peer).await?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Peer address did not resolve")
        })?;

        log::debug!(
            "Channel bound on {} towards {}",
            socket.local_addr()?,
            peer
        );

        Ok(Self {
            socket,
            peer,
            buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    #[inline]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait::async_trait]
impl Link for UdpLink {
    async fn send(&mut self, buffer: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(buffer, self.peer).await.map(|_| ())
    }

    async fn recv(&mut self, timeout: Duration) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let (size, address) =
                match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buffer)).await {
                    Ok(result) => result?,
                    Err(_) => return Ok(None),
                };

            if address.ip() != self.peer.ip() {
                log::trace!("Ignoring datagram from {}", address);
                continue;
            }

            return Ok(Some(self.buffer[..size].to_vec()));
        }
    }
}

/// In-process channel end.
pub struct MemoryLink {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Create two connected in-process channel ends.
pub fn memory_pair() -> (MemoryLink, MemoryLink) {
    let (a_tx, b_rx) = mpsc::channel(crate::consts::QUEUE_SIZE_FRAME);
    let (b_tx, a_rx) = mpsc::channel(crate::consts::QUEUE_SIZE_FRAME);

    (
        MemoryLink { tx: a_tx, rx: a_rx },
        MemoryLink { tx: b_tx, rx: b_rx },
    )
}

fn peer_gone() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Channel peer is gone")
}

#[async_trait::async_trait]
impl Link for MemoryLink {
    async fn send(&mut self, buffer: &[u8]) -> std::io::Result<()> {
        self.tx.send(buffer.to_vec()).await.map_err(|_| peer_gone())
    }

    async fn recv(&mut self, timeout: Duration) -> std::io::Result<Option<Vec<u8>>> {
        use tokio::sync::mpsc::error::TryRecvError;

        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(buffer) => Ok(Some(buffer)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(peer_gone()),
            };
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(buffer)) => Ok(Some(buffer)),
            Ok(None) => Err(peer_gone()),
            Err(_) => Ok(None),
        }
    }
}
