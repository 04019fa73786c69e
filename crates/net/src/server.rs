//! Relay server: accept and receive loops for both transports
//!
//! Stream role: one task accepts connections, each connection gets its
//! own read loop plus a writer task draining the peer's outbox.
//! Datagram role: a single task pulls datagrams off the shared socket and
//! folds them into relay broadcasts.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rand::Rng;
use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame, MAX_FRAME_SIZE};
use crate::protocol::Envelope;
use crate::registry::{Peer, PeerId};
use crate::relay::Relay;
use crate::transport::{self, SendHandle, Transport, OUTBOX_CAPACITY};

/// Relay server handle
pub struct Server {
    addr: SocketAddr,
    transport: Transport,
    relay: Arc<Relay>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the requested address and start serving.
    ///
    /// Binding tests the actual transport's socket: a port occupied for
    /// that transport fails with `AddressInUse` and nothing is started.
    pub async fn start(host: IpAddr, port: u16, transport: Transport) -> Result<Self> {
        let requested = SocketAddr::new(host, port);
        let (shutdown_tx, _) = broadcast::channel(1);
        let relay = Arc::new(Relay::new());

        let addr = match transport {
            Transport::Stream => {
                let listener = transport::bind_listener(requested).await?;
                let addr = listener.local_addr()?;
                tokio::spawn(accept_loop(listener, relay.clone(), shutdown_tx.clone()));
                addr
            }
            Transport::Datagram => {
                let socket = Arc::new(transport::bind_socket(requested).await?);
                let addr = socket.local_addr()?;
                tokio::spawn(datagram_loop(socket, relay.clone(), shutdown_tx.subscribe()));
                addr
            }
        };

        info!(addr = %addr, transport = %transport, "Server started");

        Ok(Server {
            addr,
            transport,
            relay,
            shutdown_tx,
        })
    }

    /// The server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Current membership snapshot
    pub async fn peers(&self) -> Vec<Peer> {
        self.relay.registry().snapshot().await
    }

    /// The relay engine, for server-originated announcements
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Stop the server: unblock the accept/receive loops and every
    /// per-connection loop, then drop all peer handles and clear the
    /// registry.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let evicted = self.relay.registry().clear().await;
        info!(peers = evicted.len(), "Server stopped");
    }
}

/// Accept incoming stream connections
async fn accept_loop(listener: TcpListener, relay: Arc<Relay>, shutdown_tx: broadcast::Sender<()>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            relay.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single stream peer from registration to disconnect
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: Arc<Relay>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, writer) = tokio::io::split(stream);

    // The first frame must register the peer; anything else is a
    // protocol violation and the connection is dropped unregistered.
    let name = match read_frame(&mut reader).await {
        Ok(Envelope::Register { name }) => name,
        Ok(_) => {
            warn!(addr = %addr, "First frame was not a registration");
            return;
        }
        Err(e) => {
            warn!(addr = %addr, error = %e, "Registration failed");
            return;
        }
    };

    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(writer, outbox_rx));

    let handle = SendHandle::Stream(outbox_tx);
    relay.register(addr, name, handle.clone()).await;

    let stopping = read_loop(&mut reader, addr, &relay, &handle, &mut shutdown_rx).await;

    writer_handle.abort();

    if stopping {
        // Shutdown clears the registry wholesale; no per-peer leave notices
        return;
    }

    relay.remove(addr).await;
    info!(peer = %addr, "Peer disconnected");
}

/// Read frames from one stream peer until it disconnects.
///
/// Returns true when the loop ended because the server is shutting down.
async fn read_loop(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    addr: PeerId,
    relay: &Relay,
    handle: &SendHandle,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            result = read_frame(reader) => {
                match result {
                    Ok(envelope) => {
                        handle_envelope(envelope, addr, relay, handle).await;
                    }
                    Err(Error::PeerClosed) => {
                        debug!(peer = %addr, "Connection closed");
                        return false;
                    }
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "Dropping peer");
                        return false;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                return true;
            }
        }
    }
}

/// Fold one inbound envelope from a registered stream peer into the relay
async fn handle_envelope(envelope: Envelope, addr: PeerId, relay: &Relay, handle: &SendHandle) {
    match envelope {
        Envelope::Chat { text, time, .. } => {
            // Relay under the registered display name; inbound
            // attribution is not trusted.
            let sender = match relay.registry().lookup(addr).await {
                Some(peer) => peer.name,
                None => return,
            };
            relay
                .broadcast(
                    Envelope::Chat {
                        id: None,
                        text,
                        sender,
                        time,
                    },
                    Some(addr),
                )
                .await;
        }
        Envelope::Register { name } => {
            // Mid-session re-registration updates the display name
            relay.register(addr, name, handle.clone()).await;
        }
        Envelope::System { .. } => {
            debug!(peer = %addr, "Ignoring system envelope from peer");
        }
    }
}

/// Writer task: drains one stream peer's outbox onto the socket
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &envelope).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Receive datagrams on the shared socket
async fn datagram_loop(
    socket: Arc<UdpSocket>,
    relay: Arc<Relay>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE as usize];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, addr)) => {
                        handle_datagram(&buf[..len], addr, &socket, &relay).await;
                    }
                    Err(e) => {
                        // Some platforms surface per-peer ICMP failures
                        // here; the shared socket stays up.
                        warn!(error = %e, "Datagram receive failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Datagram loop shutting down");
                break;
            }
        }
    }
}

/// Fold one inbound datagram into the relay
async fn handle_datagram(
    payload: &[u8],
    addr: SocketAddr,
    socket: &Arc<UdpSocket>,
    relay: &Relay,
) {
    match Envelope::from_bytes(payload) {
        Ok(Envelope::Register { name }) => {
            relay
                .register(addr, name, datagram_handle(socket, addr))
                .await;
        }
        Ok(Envelope::Chat { text, time, .. }) => {
            let sender = match relay.registry().lookup(addr).await {
                Some(peer) => peer.name,
                None => {
                    // Unknown sender: admit it under a generated name
                    let name = guest_name();
                    relay
                        .register(addr, name.clone(), datagram_handle(socket, addr))
                        .await;
                    name
                }
            };
            relay
                .broadcast(
                    Envelope::Chat {
                        id: None,
                        text,
                        sender,
                        time,
                    },
                    Some(addr),
                )
                .await;
        }
        Ok(Envelope::System { .. }) => {
            debug!(peer = %addr, "Ignoring system envelope from peer");
        }
        Err(e) => {
            warn!(peer = %addr, error = %e, "Malformed datagram, dropping peer");
            relay.remove(addr).await;
        }
    }
}

fn datagram_handle(socket: &Arc<UdpSocket>, addr: SocketAddr) -> SendHandle {
    SendHandle::Datagram {
        socket: socket.clone(),
        addr,
    }
}

fn guest_name() -> String {
    format!("guest-{:04}", rand::thread_rng().gen_range(0..10_000))
}
