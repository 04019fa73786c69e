//! Parley Relay Library
//!
//! A minimal multi-client chat relay over stream (TCP) or datagram (UDP)
//! transport.
//!
//! # Architecture
//!
//! - **Server**: accepts registrations and fans every message out to all
//!   other registered peers
//! - **Client**: registers once, then sends chat lines and receives relayed
//!   envelopes
//! - **Protocol**: JSON envelopes; length-prefixed on a stream, one
//!   envelope per datagram
//!
//! # Usage
//!
//! ```ignore
//! // Host starts a relay
//! let server = Server::start("0.0.0.0".parse()?, 5555, Transport::Stream).await?;
//!
//! // Peers connect
//! let mut client = Client::connect("127.0.0.1".parse()?, 5555, Transport::Stream, "alice").await?;
//! client.send_chat("hello everyone").await?;
//!
//! // Process events
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         ClientEvent::Chat { sender, text, .. } => { /* render */ }
//!         ClientEvent::System { text, .. } => { /* render */ }
//!         ClientEvent::Disconnected => break,
//!     }
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod transport;

pub use client::{Client, ClientEvent};
pub use error::{Error, Result};
pub use protocol::Envelope;
pub use registry::{Peer, PeerId, Registry};
pub use relay::Relay;
pub use server::Server;
pub use transport::{SendHandle, Transport};

/// Default port for parley relays
pub const DEFAULT_PORT: u16 = 5555;
