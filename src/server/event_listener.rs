// src/server/event_listener.rs

use crate::generic::disconnect_reason::DisconnectReason;
use std::net::SocketAddr;

/// Observer for server-side connection events.
///
/// All hooks are invoked from the thread driving [`Server::tick`], never
/// while the endpoint lock is held, so implementations may call back into
/// the server.
///
/// [`Server::tick`]: crate::server::Server::tick
pub trait ServerEventListener: Send + Sync {
    /// A handshake completed and the peer is now addressable.
    fn on_connect(&self, peer: SocketAddr);

    /// The peer was removed: explicit disconnect, idle timeout, or
    /// retransmit exhaustion.
    fn on_disconnect(&self, peer: SocketAddr, reason: DisconnectReason);

    /// A data payload arrived from the peer. Fires at most once per
    /// `(peer, sequence)` pair.
    fn on_data(&self, peer: SocketAddr, payload: Vec<u8>);
}
