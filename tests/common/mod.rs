// tests/common/mod.rs
//
// In-memory stand-ins for the endpoint collaborators: a datagram network
// with a pluggable delivery policy, a manually advanced clock, and a
// listener that records server events. Protocol time (resend timers, idle
// timeouts) is driven entirely by the manual clock; wall-clock waits exist
// only to let receiver threads ferry bytes, bounded by `pump_until`.
#![allow(dead_code)]

use rudp_rs::{Clock, DatagramSocket, DisconnectReason, Server, ServerEventListener};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(0.0) }
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock().unwrap() += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }
}

type Inbox = (Mutex<VecDeque<(Vec<u8>, SocketAddr)>>, Condvar);

/// Returns true to deliver the packet, false to drop it.
pub type DeliveryPolicy = Box<dyn FnMut(SocketAddr, SocketAddr, &[u8]) -> bool + Send>;

#[derive(Clone)]
pub struct SentRecord {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
    pub delivered: bool,
}

/// Routes datagrams between registered addresses, recording every send.
pub struct MemoryNetwork {
    inboxes: Mutex<HashMap<SocketAddr, Arc<Inbox>>>,
    policy: Mutex<Option<DeliveryPolicy>>,
    log: Mutex<Vec<SentRecord>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: Mutex::new(HashMap::new()),
            policy: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Registers `addr` on the network and returns its socket.
    pub fn socket(self: &Arc<Self>, addr: SocketAddr) -> Arc<MemorySocket> {
        let inbox: Arc<Inbox> = Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));
        self.inboxes.lock().unwrap().insert(addr, Arc::clone(&inbox));
        Arc::new(MemorySocket {
            addr,
            inbox,
            net: Arc::clone(self),
        })
    }

    pub fn set_policy(
        &self,
        policy: impl FnMut(SocketAddr, SocketAddr, &[u8]) -> bool + Send + 'static,
    ) {
        *self.policy.lock().unwrap() = Some(Box::new(policy));
    }

    pub fn clear_policy(&self) {
        *self.policy.lock().unwrap() = None;
    }

    /// Delivers a raw datagram directly, bypassing the policy. Used for
    /// replays and crafted packets.
    pub fn inject(&self, to: SocketAddr, from: SocketAddr, bytes: &[u8]) {
        if let Some(inbox) = self.inboxes.lock().unwrap().get(&to) {
            let (queue, cv) = &**inbox;
            queue.lock().unwrap().push_back((bytes.to_vec(), from));
            cv.notify_one();
        }
    }

    pub fn log_snapshot(&self) -> Vec<SentRecord> {
        self.log.lock().unwrap().clone()
    }

    fn route(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        let deliver = match self.policy.lock().unwrap().as_mut() {
            Some(policy) => policy(from, to, bytes),
            None => true,
        };
        self.log.lock().unwrap().push(SentRecord {
            from,
            to,
            bytes: bytes.to_vec(),
            delivered: deliver,
        });
        if deliver {
            self.inject(to, from, bytes);
        }
    }
}

pub struct MemorySocket {
    addr: SocketAddr,
    inbox: Arc<Inbox>,
    net: Arc<MemoryNetwork>,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.net.route(self.addr, addr, buf);
        Ok(buf.len())
    }

    fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        let (lock, cv) = &*self.inbox;
        let queue = lock.lock().unwrap();
        let (mut queue, _) = cv
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        match queue.pop_front() {
            Some((bytes, from)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(Some((bytes.len(), from)))
            }
            None => Ok(None),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connect(SocketAddr),
    Disconnect(SocketAddr, String),
    Data(SocketAddr, Vec<u8>),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ServerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn connects(&self) -> Vec<SocketAddr> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Connect(addr) => Some(addr),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> Vec<(SocketAddr, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Disconnect(addr, reason) => Some((addr, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn payloads_from(&self, peer: SocketAddr) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Data(addr, payload) if addr == peer => Some(payload),
                _ => None,
            })
            .collect()
    }
}

impl ServerEventListener for RecordingListener {
    fn on_connect(&self, peer: SocketAddr) {
        self.events.lock().unwrap().push(ServerEvent::Connect(peer));
    }

    fn on_disconnect(&self, peer: SocketAddr, reason: DisconnectReason) {
        self.events
            .lock()
            .unwrap()
            .push(ServerEvent::Disconnect(peer, reason.to_string()));
    }

    fn on_data(&self, peer: SocketAddr, payload: Vec<u8>) {
        self.events.lock().unwrap().push(ServerEvent::Data(peer, payload));
    }
}

/// Polls `f` every millisecond until it returns true or the deadline
/// passes. Receiver threads deliver within microseconds; the generous
/// deadline only matters on a pathologically loaded machine.
pub fn pump_until(deadline_ms: u64, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    loop {
        if f() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Wire-level peeks at a recorded datagram.
pub fn kind_of(bytes: &[u8]) -> u8 {
    bytes[0]
}

pub fn seq_of(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[1..5].try_into().unwrap())
}

pub fn last_acked_of(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[5..9].try_into().unwrap())
}

pub fn addr(last_octet: u8, port: u16) -> SocketAddr {
    format!("10.0.0.{last_octet}:{port}").parse().unwrap()
}

pub struct Harness {
    pub net: Arc<MemoryNetwork>,
    pub clock: Arc<ManualClock>,
    pub listener: Arc<RecordingListener>,
    pub server: Server,
    pub server_addr: SocketAddr,
}

/// A started server on the in-memory network, no clients yet.
pub fn server_harness(max_clients: Option<usize>) -> Harness {
    let net = MemoryNetwork::new();
    let clock = Arc::new(ManualClock::new());
    let listener = Arc::new(RecordingListener::default());
    let server_addr = addr(1, 7777);

    let mut server = Server::new(listener.clone());
    server
        .start_with(net.socket(server_addr), clock.clone(), max_clients)
        .unwrap();

    Harness {
        net,
        clock,
        listener,
        server,
        server_addr,
    }
}

/// Connects a client at `client_addr` and pumps both endpoints until the
/// handshake completes.
pub fn connect_client(h: &mut Harness, client_addr: SocketAddr) -> rudp_rs::Client {
    let mut client = rudp_rs::Client::new();
    client
        .connect_with(h.net.socket(client_addr), h.clock.clone(), h.server_addr)
        .unwrap();
    let server = &mut h.server;
    assert!(
        pump_until(2_000, || {
            server.tick();
            client.tick();
            client.is_connected()
        }),
        "handshake with {client_addr} timed out"
    );
    client
}
