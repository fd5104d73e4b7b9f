// src/generic/error.rs

use crate::utils::binary::BinaryError;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// Datagram shorter than a header, or an out-of-range kind byte.
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] BinaryError),
    /// Non-`Connect` traffic from an address with no peer state, or a send
    /// addressed to one.
    #[error("unknown peer {0}")]
    UnknownPeer(SocketAddr),
    /// Client send attempted before the handshake completed.
    #[error("not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}
