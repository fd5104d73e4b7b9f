// src/client/client.rs

use crate::generic::clock::{Clock, MonotonicClock};
use crate::generic::error::NetError;
use crate::generic::peer::{PeerState, ReceiveOutcome};
use crate::generic::receiver::{RawDatagram, spawn_receiver};
use crate::generic::socket::{DatagramSocket, UdpDatagramSocket};
use crate::protocol::{CLIENT_PORT, PacketHeader, PacketKind, build_packet, encode_group_id};
use crate::utils::binary::BinaryStream;
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// `Connect` sent, waiting for the server's accepting ack.
    Handshaking,
    Connected,
}

/// Mutable connection state, present between `connect` and `disconnect`.
struct ClientShared {
    state: ClientState,
    /// Sliding-window view of the one peer that matters: the server.
    peer: PeerState,
    /// Inbound payload queue drained by [`Client::poll`].
    received_data: VecDeque<Vec<u8>>,
    /// Timestamp of the last outbound packet of any kind.
    last_send_time: f64,
}

/// Reliable-UDP client endpoint.
///
/// Mirrors the server's protocol with a single peer. The client never sends
/// standalone acks for received data; ack state rides on every outbound
/// header, with a keep-alive ping filling send-idle gaps.
pub struct Client {
    shared: Mutex<Option<ClientShared>>,
    socket: Option<Arc<dyn DatagramSocket>>,
    clock: Arc<dyn Clock>,
    server_addr: Option<SocketAddr>,
    raw_rx: Option<Receiver<RawDatagram>>,
    receiver_thread: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<io::Error>>>,
}

impl Client {
    /// Send-idle gap after which a keep-alive ping goes out. Well under the
    /// retry-exhaustion horizon so a quiet client still carries acks.
    pub const PING_INTERVAL: f64 = 1.0;

    pub fn new() -> Self {
        Self {
            shared: Mutex::new(None),
            socket: None,
            clock: Arc::new(MonotonicClock),
            server_addr: None,
            raw_rx: None,
            receiver_thread: None,
            stopping: Arc::new(AtomicBool::new(false)),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Binds the default client port and begins the handshake with the
    /// server at `server_ip:server_port`.
    pub fn connect(&mut self, server_ip: IpAddr, server_port: u16) -> Result<(), NetError> {
        let socket = UdpDatagramSocket::bind(CLIENT_PORT).map_err(|err| {
            error!(%err, "failed to create client socket");
            err
        })?;
        self.connect_with(
            Arc::new(socket),
            Arc::new(MonotonicClock),
            SocketAddr::new(server_ip, server_port),
        )
    }

    /// Begins the handshake over an injected socket and clock. This is the
    /// seam the integration tests drive an in-memory network through.
    pub fn connect_with(
        &mut self,
        socket: Arc<dyn DatagramSocket>,
        clock: Arc<dyn Clock>,
        server_addr: SocketAddr,
    ) -> Result<(), NetError> {
        if self.receiver_thread.is_some() {
            warn!("client already connected or handshaking");
            return Ok(());
        }

        self.stopping = Arc::new(AtomicBool::new(false));
        self.fault = Arc::new(Mutex::new(None));
        self.clock = clock;
        self.server_addr = Some(server_addr);

        let (tx, rx) = mpsc::channel();
        let handle = spawn_receiver(
            "rudp-client-recv",
            Arc::clone(&socket),
            tx,
            Arc::clone(&self.stopping),
            Arc::clone(&self.fault),
        )?;
        self.socket = Some(socket);
        self.raw_rx = Some(rx);
        self.receiver_thread = Some(handle);

        let now = self.clock.now();
        *self.lock_shared() = Some(ClientShared {
            state: ClientState::Handshaking,
            peer: PeerState::new(server_addr, now),
            received_data: VecDeque::new(),
            last_send_time: now,
        });

        self.send_packet(PacketKind::Connect, &[])?;
        info!(%server_addr, "sent connect request");
        Ok(())
    }

    /// Tears the connection down: a best-effort `Disconnect` notice first,
    /// then the receiver thread is joined and the socket released.
    pub fn disconnect(&mut self) {
        let was_connected = self.is_connected();
        if was_connected && self.send_packet(PacketKind::Disconnect, &[]).is_ok() {
            debug!("sent disconnect notice to server");
        }

        self.stopping.store(true, Ordering::Release);
        if let Some(handle) = self.receiver_thread.take() {
            let _ = handle.join();
        }
        self.socket = None;
        self.raw_rx = None;
        self.server_addr = None;

        let had_session = self.lock_shared().take().is_some();
        if had_session && was_connected {
            info!("client disconnected");
        }
    }

    /// One maintenance pass: drain received datagrams, keep the connection
    /// alive, retransmit overdue packets. Call at application cadence.
    pub fn tick(&mut self) {
        self.process_received_packets();
        if self.is_connected() {
            self.maybe_send_ping();
            self.check_for_resends();
        }
    }

    /// Sends a reliable data payload. Fails with [`NetError::NotConnected`]
    /// before the handshake completes; nothing touches the network then.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.send_packet(PacketKind::Data, payload)
    }

    /// Asks the server to add this client to `group_id`.
    pub fn join_group(&mut self, group_id: u32) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.send_packet(PacketKind::JoinGroup, &encode_group_id(group_id))?;
        debug!(group_id, "sent join-group request");
        Ok(())
    }

    /// Asks the server to remove this client from `group_id`.
    pub fn leave_group(&mut self, group_id: u32) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.send_packet(PacketKind::LeaveGroup, &encode_group_id(group_id))?;
        debug!(group_id, "sent leave-group request");
        Ok(())
    }

    /// Next received payload, in arrival order, if any.
    pub fn poll(&mut self) -> Option<Vec<u8>> {
        self.lock_shared()
            .as_mut()
            .and_then(|shared| shared.received_data.pop_front())
    }

    pub fn is_connected(&self) -> bool {
        self.lock_shared()
            .as_ref()
            .is_some_and(|shared| shared.state == ClientState::Connected)
    }

    /// The error that killed the receive loop, if any.
    pub fn socket_fault(&self) -> Option<String> {
        self.fault
            .lock()
            .expect("fault slot poisoned")
            .as_ref()
            .map(ToString::to_string)
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, Option<ClientShared>> {
        self.shared.lock().expect("client state mutex poisoned")
    }

    /// Shared outbound path: only `Data` consumes a sequence and is tracked
    /// for retransmission; every kind piggybacks current receive state.
    fn send_packet(&self, kind: PacketKind, payload: &[u8]) -> Result<(), NetError> {
        let socket = self.socket.as_ref().ok_or(NetError::NotConnected)?;
        let server_addr = self.server_addr.ok_or(NetError::NotConnected)?;
        let now = self.clock.now();

        let bytes = {
            let mut guard = self.lock_shared();
            let shared = guard.as_mut().ok_or(NetError::NotConnected)?;

            let mut header = PacketHeader::new(kind);
            if kind == PacketKind::Data {
                header.sequence = shared.peer.next_sequence();
            }
            (header.last_acked, header.ack_bitfield) = shared.peer.ack_state();

            let bytes = build_packet(&header, payload);
            if kind == PacketKind::Data {
                shared
                    .peer
                    .record_pending(header.sequence, bytes.clone(), now);
            }
            shared.last_send_time = now;
            trace!(
                kind = ?header.kind,
                seq = header.sequence,
                ack = header.last_acked,
                bits = header.ack_bitfield,
                len = payload.len(),
                "sending packet"
            );
            bytes
        };
        socket.send_to(&bytes, server_addr)?;
        Ok(())
    }

    fn process_received_packets(&mut self) {
        let batch: Vec<RawDatagram> = match &self.raw_rx {
            Some(rx) => rx.try_iter().collect(),
            None => return,
        };
        for raw in batch {
            self.handle_datagram(raw);
        }
    }

    fn handle_datagram(&mut self, raw: RawDatagram) {
        let mut stream = BinaryStream::from_slice(&raw.bytes);
        let header = match PacketHeader::decode(&mut stream) {
            Ok(header) => header,
            Err(err) => {
                warn!(%err, "dropping malformed packet");
                return;
            }
        };
        let payload = stream.remaining().to_vec();
        let now = self.clock.now();
        trace!(
            kind = ?header.kind,
            seq = header.sequence,
            ack = header.last_acked,
            bits = header.ack_bitfield,
            "packet received"
        );

        let handshake_completed = {
            let mut guard = self.lock_shared();
            let Some(shared) = guard.as_mut() else {
                return;
            };
            shared.peer.last_receive_time = now;

            // The server's first ack (nothing received yet on its side)
            // confirms the connection.
            let handshake_completed = shared.state == ClientState::Handshaking
                && header.kind == PacketKind::Ack
                && header.last_acked == 0;
            if handshake_completed {
                shared.state = ClientState::Connected;
            }

            shared
                .peer
                .process_acks(header.last_acked, header.ack_bitfield);

            if header.kind == PacketKind::Data {
                match shared.peer.update_received(header.sequence) {
                    ReceiveOutcome::Fresh => {
                        trace!(seq = header.sequence, "data packet enqueued for application");
                        shared.received_data.push_back(payload);
                    }
                    ReceiveOutcome::Duplicate | ReceiveOutcome::Stale => {
                        trace!(seq = header.sequence, "duplicate data suppressed");
                    }
                }
            }
            handshake_completed
        };

        if handshake_completed {
            info!("handshake complete, connection to server established");
        }
        if header.kind == PacketKind::Ping {
            let _ = self.send_packet(PacketKind::Pong, &[]);
        }
    }

    /// Keeps a send-idle connection visible to the server and carries ack
    /// state for anything it sent us recently.
    fn maybe_send_ping(&mut self) {
        let now = self.clock.now();
        let due = self
            .lock_shared()
            .as_ref()
            .is_some_and(|shared| now - shared.last_send_time >= Self::PING_INTERVAL);
        if due {
            trace!("sending keep-alive ping");
            let _ = self.send_packet(PacketKind::Ping, &[]);
        }
    }

    fn check_for_resends(&mut self) {
        let now = self.clock.now();
        let (resends, exhausted) = {
            let mut guard = self.lock_shared();
            let Some(shared) = guard.as_mut() else {
                return;
            };
            let scan = shared.peer.collect_resends(now);
            (scan.resends, scan.exhausted)
        };

        if let (Some(socket), Some(server_addr)) = (&self.socket, self.server_addr) {
            for bytes in resends {
                if let Err(err) = socket.send_to(&bytes, server_addr) {
                    warn!(%err, "socket send failed during resend");
                }
            }
        }

        if exhausted {
            error!("server not responding after max retries, disconnecting");
            self.disconnect();
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
