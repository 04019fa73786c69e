//! Network error types

use std::io;
use std::net::SocketAddr;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Address {0} already in use")]
    AddressInUse(SocketAddr),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Peer unreachable")]
    PeerUnreachable,

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Server unavailable: {0}")]
    Unavailable(String),
}
