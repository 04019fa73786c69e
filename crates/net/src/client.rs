//! Relay client for both transports
//!
//! A session registers once on startup, then a background task
//! multiplexes socket reads with outgoing commands. Incoming envelopes
//! surface as [`ClientEvent`]s on the session's event channel.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame, MAX_FRAME_SIZE};
use crate::protocol::Envelope;
use crate::transport::{self, Transport};

/// Event received from the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A chat message from another peer
    Chat {
        sender: String,
        text: String,
        time: i64,
        id: Option<u64>,
    },
    /// A relay notice (join/leave)
    System {
        text: String,
        time: i64,
        id: Option<u64>,
    },
    /// The session ended: server gone, socket error, or local disconnect
    Disconnected,
}

enum Command {
    Send(Envelope),
    Disconnect,
}

/// Client session handle
pub struct Client {
    name: String,
    event_rx: mpsc::Receiver<ClientEvent>,
    cmd_tx: mpsc::Sender<Command>,
}

impl Client {
    /// Connect to a relay server and register under `name`.
    ///
    /// A stream server that cannot be reached fails with `Unavailable`
    /// and no session is started. Datagram reachability is best-effort:
    /// only local socket failures surface here.
    pub async fn connect(
        host: IpAddr,
        port: u16,
        transport: Transport,
        name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let addr = SocketAddr::new(host, port);
        let register = Envelope::Register { name: name.clone() };

        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        match transport {
            Transport::Stream => {
                let stream = transport::connect_stream(addr).await?;
                let (reader, mut writer) = tokio::io::split(stream);
                write_frame(&mut writer, &register).await?;
                tokio::spawn(stream_task(reader, writer, event_tx, cmd_rx));
            }
            Transport::Datagram => {
                let socket = transport::connect_socket(addr).await?;
                let payload = register
                    .to_bytes()
                    .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;
                socket.send(&payload).await?;
                tokio::spawn(datagram_task(socket, event_tx, cmd_rx));
            }
        }

        info!(addr = %addr, transport = %transport, name = %name, "Connected to relay");

        Ok(Client {
            name,
            event_rx,
            cmd_tx,
        })
    }

    /// The display name this session registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next event from the relay; `None` once the session has closed
    /// and all buffered events are drained.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Send a chat line under this session's display name
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        let envelope = Envelope::chat(self.name.clone(), text);
        self.cmd_tx
            .send(Command::Send(envelope))
            .await
            .map_err(|_| Error::PeerClosed)
    }

    /// End the session, closing the socket and unblocking the receive loop
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }
}

/// Session task for a stream connection
async fn stream_task(
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(envelope) => forward_event(envelope, &event_tx).await,
                    Err(Error::PeerClosed) => {
                        debug!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(envelope)) => {
                        if let Err(e) = write_frame(&mut writer, &envelope).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }
        }
    }

    let _ = event_tx.send(ClientEvent::Disconnected).await;
    info!("Disconnected from relay");
}

/// Session task for a datagram socket
async fn datagram_task(
    socket: UdpSocket,
    event_tx: mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE as usize];
    loop {
        tokio::select! {
            result = socket.recv(&mut buf) => {
                match result {
                    Ok(len) => match Envelope::from_bytes(&buf[..len]) {
                        Ok(envelope) => forward_event(envelope, &event_tx).await,
                        Err(e) => debug!(error = %e, "Ignoring malformed datagram"),
                    },
                    Err(e) => {
                        warn!(error = %e, "Receive error");
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(envelope)) => {
                        let payload = match envelope.to_bytes() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "Serialization failed");
                                continue;
                            }
                        };
                        if let Err(e) = socket.send(&payload).await {
                            warn!(error = %e, "Send error");
                            break;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }
        }
    }

    let _ = event_tx.send(ClientEvent::Disconnected).await;
    info!("Disconnected from relay");
}

/// Surface one inbound envelope as a client event
async fn forward_event(envelope: Envelope, event_tx: &mpsc::Sender<ClientEvent>) {
    let event = match envelope {
        Envelope::Chat {
            id,
            text,
            sender,
            time,
        } => ClientEvent::Chat {
            sender,
            text,
            time,
            id,
        },
        Envelope::System { id, text, time } => ClientEvent::System { text, time, id },
        Envelope::Register { .. } => {
            debug!("Ignoring register envelope from relay");
            return;
        }
    };
    let _ = event_tx.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_connect_without_server_is_unavailable() {
        // Bind then drop to find a port nothing is listening on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Client::connect(Ipv4Addr::LOCALHOST.into(), port, Transport::Stream, "alice").await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_client_registers_with_server() {
        let server = Server::start(Ipv4Addr::LOCALHOST.into(), 0, Transport::Stream)
            .await
            .unwrap();
        let port = server.addr().port();

        let client = Client::connect(Ipv4Addr::LOCALHOST.into(), port, Transport::Stream, "alice")
            .await
            .unwrap();
        assert_eq!(client.name(), "alice");

        // Wait until the registration frame has been folded in
        let mut attempts = 0;
        while server.peers().await.is_empty() && attempts < 50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            attempts += 1;
        }
        let peers = server.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "alice");

        client.disconnect().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_shutdown_wakes_client() {
        let server = Server::start(Ipv4Addr::LOCALHOST.into(), 0, Transport::Stream)
            .await
            .unwrap();
        let port = server.addr().port();

        let mut client = Client::connect(Ipv4Addr::LOCALHOST.into(), port, Transport::Stream, "alice")
            .await
            .unwrap();

        let mut attempts = 0;
        while server.peers().await.is_empty() && attempts < 50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert_eq!(server.peers().await.len(), 1);

        server.shutdown().await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                match client.next_event().await {
                    Some(ClientEvent::Disconnected) | None => break,
                    Some(_) => continue,
                }
            }
        })
        .await;
        assert!(event.is_ok(), "client receive loop was not unblocked");
    }
}
