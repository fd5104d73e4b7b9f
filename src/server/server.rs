// src/server/server.rs

use crate::generic::clock::{Clock, MonotonicClock};
use crate::generic::disconnect_reason::DisconnectReason;
use crate::generic::error::NetError;
use crate::generic::peer::{PeerState, ReceiveOutcome};
use crate::generic::receiver::{RawDatagram, spawn_receiver};
use crate::generic::socket::{DatagramSocket, UdpDatagramSocket};
use crate::protocol::{PacketHeader, PacketKind, build_packet, decode_group_id};
use crate::server::event_listener::ServerEventListener;
use crate::utils::binary::BinaryStream;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Peer and group tables, guarded together by one endpoint-level mutex.
/// Socket I/O and listener callbacks never run while it is held.
#[derive(Default)]
struct ServerShared {
    connections: HashMap<SocketAddr, PeerState>,
    groups: HashMap<u32, HashSet<SocketAddr>>,
}

/// Reliable-UDP server endpoint.
///
/// `start` binds the socket and spawns the receiver thread. Everything else
/// (inbound processing, retransmits, timeout reaping, sends) happens inside
/// [`tick`](Self::tick) or the send-family calls, which must run on one
/// thread or be externally serialized.
pub struct Server {
    listener: Arc<dyn ServerEventListener>,
    shared: Mutex<ServerShared>,
    socket: Option<Arc<dyn DatagramSocket>>,
    clock: Arc<dyn Clock>,
    raw_rx: Option<Receiver<RawDatagram>>,
    receiver_thread: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<io::Error>>>,
    max_clients: Option<usize>,
}

impl Server {
    /// Idle time after which a client is reaped.
    pub const CLIENT_TIMEOUT: f64 = 5.0;

    pub fn new(listener: Arc<dyn ServerEventListener>) -> Self {
        Self {
            listener,
            shared: Mutex::new(ServerShared::default()),
            socket: None,
            clock: Arc::new(MonotonicClock),
            raw_rx: None,
            receiver_thread: None,
            stopping: Arc::new(AtomicBool::new(false)),
            fault: Arc::new(Mutex::new(None)),
            max_clients: None,
        }
    }

    /// Binds a UDP socket on `port` and starts the receive loop.
    pub fn start(&mut self, port: u16, max_clients: Option<usize>) -> Result<(), NetError> {
        let socket = UdpDatagramSocket::bind(port).map_err(|err| {
            error!(port, %err, "failed to create server socket");
            err
        })?;
        info!(port, "server socket created and listening");
        self.start_with(Arc::new(socket), Arc::new(MonotonicClock), max_clients)
    }

    /// Starts the endpoint on an injected socket and clock. This is the
    /// seam the integration tests drive an in-memory network through.
    pub fn start_with(
        &mut self,
        socket: Arc<dyn DatagramSocket>,
        clock: Arc<dyn Clock>,
        max_clients: Option<usize>,
    ) -> Result<(), NetError> {
        if self.receiver_thread.is_some() {
            warn!("server already started");
            return Ok(());
        }

        self.stopping = Arc::new(AtomicBool::new(false));
        self.fault = Arc::new(Mutex::new(None));
        self.clock = clock;
        self.max_clients = max_clients;

        let (tx, rx) = mpsc::channel();
        let handle = spawn_receiver(
            "rudp-server-recv",
            Arc::clone(&socket),
            tx,
            Arc::clone(&self.stopping),
            Arc::clone(&self.fault),
        )?;

        self.socket = Some(socket);
        self.raw_rx = Some(rx);
        self.receiver_thread = Some(handle);
        Ok(())
    }

    /// Stops the receive loop, joins its thread, and releases the socket.
    /// Peer and group tables are left intact.
    pub fn stop(&mut self) {
        if self.receiver_thread.is_none() && self.socket.is_none() {
            return;
        }
        self.stopping.store(true, Ordering::Release);
        if let Some(handle) = self.receiver_thread.take() {
            let _ = handle.join();
        }
        self.socket = None;
        self.raw_rx = None;
        info!("server stopped");
    }

    /// One maintenance pass: drain received datagrams, retransmit overdue
    /// packets, reap idle clients. Call at application cadence.
    pub fn tick(&mut self) {
        self.process_received_packets();
        self.check_for_resends();
        self.check_for_timeouts();
    }

    /// Connected peer count.
    pub fn peer_count(&self) -> usize {
        self.lock_shared().connections.len()
    }

    /// Current members of a group; empty if the group does not exist.
    pub fn group_members(&self, group_id: u32) -> Vec<SocketAddr> {
        self.lock_shared()
            .groups
            .get(&group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True while the receive loop is alive and the socket has not faulted.
    pub fn is_running(&self) -> bool {
        self.receiver_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
            && self.socket_fault().is_none()
    }

    /// The error that killed the receive loop, if any.
    pub fn socket_fault(&self) -> Option<String> {
        self.fault
            .lock()
            .expect("fault slot poisoned")
            .as_ref()
            .map(ToString::to_string)
    }

    /// Sends a reliable data payload to one connected peer.
    pub fn send_to(&mut self, peer: SocketAddr, payload: &[u8]) -> Result<(), NetError> {
        let now = self.clock.now();
        let bytes = {
            let mut shared = self.lock_shared();
            let connection = shared
                .connections
                .get_mut(&peer)
                .ok_or(NetError::UnknownPeer(peer))?;

            let mut header = PacketHeader::new(PacketKind::Data);
            header.sequence = connection.next_sequence();
            (header.last_acked, header.ack_bitfield) = connection.ack_state();

            let bytes = build_packet(&header, payload);
            connection.record_pending(header.sequence, bytes.clone(), now);
            trace!(
                %peer,
                seq = header.sequence,
                ack = header.last_acked,
                bits = header.ack_bitfield,
                len = payload.len(),
                "sending data packet"
            );
            bytes
        };
        self.transmit(peer, &bytes);
        Ok(())
    }

    /// Sends `payload` to every member of `group_id` except `exclude`.
    ///
    /// Membership is snapshotted under the lock, then each key is
    /// re-resolved by `send_to`; peers that vanished in between are
    /// skipped.
    pub fn broadcast_to_group(
        &mut self,
        group_id: u32,
        payload: &[u8],
        exclude: Option<SocketAddr>,
    ) {
        let members: Vec<SocketAddr> = {
            let shared = self.lock_shared();
            match shared.groups.get(&group_id) {
                Some(members) => members
                    .iter()
                    .copied()
                    .filter(|addr| Some(*addr) != exclude)
                    .collect(),
                None => return,
            }
        };
        debug!(group_id, members = members.len(), "broadcasting to group");
        for peer in members {
            if let Err(err) = self.send_to(peer, payload) {
                debug!(%peer, %err, "skipping vanished broadcast member");
            }
        }
    }

    /// Adds a peer to a group. Idempotent.
    pub fn join_group(&mut self, peer: SocketAddr, group_id: u32) -> Result<(), NetError> {
        let mut shared = self.lock_shared();
        let shared = &mut *shared;
        let connection = shared
            .connections
            .get_mut(&peer)
            .ok_or(NetError::UnknownPeer(peer))?;

        if !connection.groups.insert(group_id) {
            debug!(%peer, group_id, "client already in group");
            return Ok(());
        }
        let members = shared.groups.entry(group_id).or_default();
        members.insert(peer);
        info!(%peer, group_id, members = members.len(), "client joined group");
        Ok(())
    }

    /// Removes a peer from a group; drops the group once empty. Idempotent.
    pub fn leave_group(&mut self, peer: SocketAddr, group_id: u32) -> Result<(), NetError> {
        let mut shared = self.lock_shared();
        let shared = &mut *shared;
        let connection = shared
            .connections
            .get_mut(&peer)
            .ok_or(NetError::UnknownPeer(peer))?;

        if !connection.groups.remove(&group_id) {
            debug!(%peer, group_id, "client not in group");
            return Ok(());
        }
        if let Some(members) = shared.groups.get_mut(&group_id) {
            members.remove(&peer);
            info!(%peer, group_id, members = members.len(), "client left group");
            if members.is_empty() {
                shared.groups.remove(&group_id);
                debug!(group_id, "group empty, removed");
            }
        }
        Ok(())
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, ServerShared> {
        self.shared.lock().expect("connection mutex poisoned")
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
                warn!(source = %raw.source, %err, "dropping malformed packet");
                return;
            }
        };
        let payload = stream.remaining().to_vec();
        let now = self.clock.now();
        trace!(
            source = %raw.source,
            kind = ?header.kind,
            seq = header.sequence,
            ack = header.last_acked,
            bits = header.ack_bitfield,
            "packet received"
        );

        let known = self.lock_shared().connections.contains_key(&raw.source);
        if !known {
            if header.kind == PacketKind::Connect {
                self.handle_new_connection(raw.source, now);
            } else {
                warn!(source = %raw.source, kind = ?header.kind, "packet from unknown peer dropped");
            }
            return;
        }

        // Ack bookkeeping first, then the per-kind action; one lock scope.
        let receive_outcome = {
            let mut shared = self.lock_shared();
            let Some(connection) = shared.connections.get_mut(&raw.source) else {
                return;
            };
            connection.last_receive_time = now;
            connection.process_acks(header.last_acked, header.ack_bitfield);
            if header.kind == PacketKind::Data {
                Some(connection.update_received(header.sequence))
            } else {
                None
            }
        };

        match header.kind {
            PacketKind::Data => {
                // Delivery happens before the ack goes out.
                if receive_outcome == Some(ReceiveOutcome::Fresh) {
                    self.listener.on_data(raw.source, payload);
                } else {
                    trace!(source = %raw.source, seq = header.sequence, "duplicate data suppressed");
                }
                self.send_control(raw.source, PacketKind::Ack);
            }
            PacketKind::Ack => {}
            PacketKind::Connect => {
                // The handshake ack can be lost and Connect is never
                // retransmitted, so answer it again.
                debug!(source = %raw.source, "repeat connect, re-sending handshake ack");
                self.send_control(raw.source, PacketKind::Ack);
            }
            PacketKind::Disconnect => {
                self.disconnect_client(raw.source, DisconnectReason::ClientRequest);
            }
            PacketKind::Ping => {
                self.send_control(raw.source, PacketKind::Pong);
            }
            PacketKind::Pong => {}
            PacketKind::JoinGroup => match decode_group_id(&payload) {
                Ok(group_id) => {
                    debug!(source = %raw.source, group_id, "client requested to join group");
                    let _ = self.join_group(raw.source, group_id);
                }
                Err(err) => {
                    warn!(source = %raw.source, %err, "malformed join-group request");
                }
            },
            PacketKind::LeaveGroup => match decode_group_id(&payload) {
                Ok(group_id) => {
                    debug!(source = %raw.source, group_id, "client requested to leave group");
                    let _ = self.leave_group(raw.source, group_id);
                }
                Err(err) => {
                    warn!(source = %raw.source, %err, "malformed leave-group request");
                }
            },
        }
    }

    fn handle_new_connection(&mut self, peer: SocketAddr, now: f64) {
        {
            let mut shared = self.lock_shared();
            if let Some(max) = self.max_clients
                && shared.connections.len() >= max
            {
                warn!(%peer, max, "connection rejected, server full");
                return;
            }
            shared.connections.insert(peer, PeerState::new(peer, now));
            info!(%peer, total = shared.connections.len(), "new client connected");
        }
        self.listener.on_connect(peer);
        // Accepting ack completes the handshake on the client side.
        self.send_control(peer, PacketKind::Ack);
    }

    /// Removes a peer and purges it from every group in one critical
    /// section, then notifies the listener.
    fn disconnect_client(&mut self, peer: SocketAddr, reason: DisconnectReason) {
        let removed = {
            let mut shared = self.lock_shared();
            let shared = &mut *shared;
            match shared.connections.remove(&peer) {
                Some(connection) => {
                    for group_id in &connection.groups {
                        if let Some(members) = shared.groups.get_mut(group_id) {
                            members.remove(&peer);
                            if members.is_empty() {
                                shared.groups.remove(group_id);
                            }
                        }
                    }
                    info!(
                        %peer,
                        %reason,
                        total = shared.connections.len(),
                        "client disconnected"
                    );
                    true
                }
                None => false,
            }
        };
        if removed {
            self.listener.on_disconnect(peer, reason);
        }
    }

    fn check_for_resends(&mut self) {
        let now = self.clock.now();
        let mut resends: Vec<(SocketAddr, Vec<Vec<u8>>)> = Vec::new();
        let mut exhausted: Vec<SocketAddr> = Vec::new();
        {
            let mut shared = self.lock_shared();
            for (addr, connection) in shared.connections.iter_mut() {
                let scan = connection.collect_resends(now);
                if scan.exhausted {
                    exhausted.push(*addr);
                }
                if !scan.resends.is_empty() {
                    resends.push((*addr, scan.resends));
                }
            }
        }
        for (peer, packets) in resends {
            for bytes in packets {
                self.transmit(peer, &bytes);
            }
        }
        for peer in exhausted {
            self.disconnect_client(peer, DisconnectReason::RetryExhausted);
        }
    }

    fn check_for_timeouts(&mut self) {
        let now = self.clock.now();
        let timed_out: Vec<SocketAddr> = {
            let shared = self.lock_shared();
            shared
                .connections
                .iter()
                .filter(|(_, connection)| {
                    now - connection.last_receive_time > Self::CLIENT_TIMEOUT
                })
                .map(|(addr, _)| *addr)
                .collect()
        };
        for peer in timed_out {
            debug!(%peer, "client timed out");
            self.disconnect_client(peer, DisconnectReason::Timeout);
        }
    }

    /// Sends a sequence-less packet (ack, pong) carrying the peer's current
    /// receive state.
    fn send_control(&self, peer: SocketAddr, kind: PacketKind) {
        let header = {
            let shared = self.lock_shared();
            let Some(connection) = shared.connections.get(&peer) else {
                return;
            };
            let mut header = PacketHeader::new(kind);
            (header.last_acked, header.ack_bitfield) = connection.ack_state();
            header
        };
        trace!(
            %peer,
            kind = ?header.kind,
            ack = header.last_acked,
            bits = header.ack_bitfield,
            "sending control packet"
        );
        self.transmit(peer, &build_packet(&header, &[]));
    }

    fn transmit(&self, peer: SocketAddr, bytes: &[u8]) {
        if let Some(socket) = &self.socket
            && let Err(err) = socket.send_to(bytes, peer)
        {
            warn!(%peer, %err, "socket send failed");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
