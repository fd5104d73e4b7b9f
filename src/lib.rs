//! Reliable-UDP transport for a multiplayer gameplay runtime.
//!
//! Layers ordered acknowledgement, duplicate suppression, retransmission,
//! connection lifecycle, and group multicast on top of raw datagrams. One
//! protocol, two roles:
//!
//! - [`Server`] keeps per-client sliding-window state, answers data with
//!   immediate acks, routes group broadcasts, and reaps idle or
//!   unresponsive clients.
//! - [`Client`] tracks the single server peer, piggybacks its ack state on
//!   every outbound header, and keeps the link alive with pings when idle.
//!
//! Each endpoint runs a receiver thread that only copies datagrams off the
//! socket; all protocol work happens in the caller-driven `tick`. The
//! socket and clock sit behind the [`DatagramSocket`] and [`Clock`] traits,
//! so the whole stack runs against an in-memory network in tests.

pub mod client;
pub mod generic;
pub mod protocol;
pub mod server;
pub mod utils;

pub use client::{Client, ClientState};
pub use generic::clock::{Clock, MonotonicClock};
pub use generic::disconnect_reason::DisconnectReason;
pub use generic::error::NetError;
pub use generic::peer::{MAX_RETRIES, RECEIVE_WINDOW, RESEND_TIMEOUT};
pub use generic::socket::{DatagramSocket, UdpDatagramSocket};
pub use protocol::{CLIENT_PORT, PacketHeader, PacketKind, SERVER_PORT};
pub use server::{Server, ServerEventListener};
