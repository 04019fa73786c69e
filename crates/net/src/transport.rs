//! Transport adapter: stream vs datagram socket plumbing
//!
//! Binds are attempted on the socket type the relay will actually use, so
//! an `AddressInUse` report is accurate for the chosen transport. A TCP
//! probe says nothing about UDP availability, and vice versa.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::frame::MAX_FRAME_SIZE;
use crate::protocol::Envelope;

/// Capacity of each stream peer's outbox
pub(crate) const OUTBOX_CAPACITY: usize = 64;

/// Transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Connection-oriented, ordered, reliable (TCP)
    Stream,
    /// Connectionless, unordered, best-effort (UDP)
    Datagram,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Stream => "tcp",
            Transport::Datagram => "udp",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "stream" => Ok(Transport::Stream),
            "udp" | "datagram" => Ok(Transport::Datagram),
            other => Err(Error::Protocol(format!("Unknown transport: {}", other))),
        }
    }
}

/// Bind a TCP listener, reporting `AddressInUse` for an occupied port
pub(crate) async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| map_bind(e, addr))
}

/// Bind a UDP socket, reporting `AddressInUse` for an occupied port
pub(crate) async fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr).await.map_err(|e| map_bind(e, addr))
}

fn map_bind(e: std::io::Error, addr: SocketAddr) -> Error {
    if e.kind() == std::io::ErrorKind::AddrInUse {
        Error::AddressInUse(addr)
    } else {
        Error::Io(e)
    }
}

/// Connect to a stream server, reporting `Unavailable` if it cannot be reached
pub(crate) async fn connect_stream(addr: SocketAddr) -> Result<TcpStream> {
    TcpStream::connect(addr).await.map_err(|e| {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::TimedOut | ErrorKind::HostUnreachable => {
                Error::Unavailable(format!("{}: {}", addr, e))
            }
            _ => Error::Io(e),
        }
    })
}

/// Bind an ephemeral local UDP socket and direct it at the server.
///
/// Datagram transport gives no connect-time reachability signal; only
/// local bind/connect failures surface here.
pub(crate) async fn connect_socket(remote: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket
        .connect(remote)
        .await
        .map_err(|e| Error::Unavailable(format!("{}: {}", remote, e)))?;
    Ok(socket)
}

/// Delivery handle for one registered peer
#[derive(Debug, Clone)]
pub enum SendHandle {
    /// Outbox drained by the peer connection's writer task
    Stream(mpsc::Sender<Envelope>),
    /// Shared server socket plus the peer's datagram address
    Datagram {
        socket: Arc<UdpSocket>,
        addr: SocketAddr,
    },
}

impl SendHandle {
    /// Attempt delivery of one envelope to this peer.
    ///
    /// Never blocks on the peer: a closed or full stream outbox and a
    /// failed datagram send both report `PeerUnreachable`. A datagram
    /// failure says nothing about the shared socket, which stays open.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        match self {
            SendHandle::Stream(tx) => tx
                .try_send(envelope.clone())
                .map_err(|_| Error::PeerUnreachable),
            SendHandle::Datagram { socket, addr } => {
                let payload = envelope
                    .to_bytes()
                    .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;
                if payload.len() > MAX_FRAME_SIZE as usize {
                    return Err(Error::Protocol(format!(
                        "Envelope too large: {} bytes (max {})",
                        payload.len(),
                        MAX_FRAME_SIZE
                    )));
                }
                match socket.send_to(&payload, *addr).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(Error::PeerUnreachable),
                }
            }
        }
    }
}
