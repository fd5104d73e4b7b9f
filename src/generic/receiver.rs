// src/generic/receiver.rs

use crate::generic::socket::{DatagramSocket, RECV_BUFFER_LEN, RECV_WAIT};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// One datagram as pulled off the socket, before any decoding.
pub struct RawDatagram {
    pub source: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Spawns the receive loop that owns the read side of the socket.
///
/// The loop copies each datagram into the raw-packet channel and never
/// touches peer state. It exits when the stopping flag is set (checked
/// between bounded waits), when the channel consumer goes away, or when the
/// socket fails, in which case the error is parked in `fault` for the
/// endpoint to surface.
pub fn spawn_receiver(
    name: &str,
    socket: Arc<dyn DatagramSocket>,
    tx: Sender<RawDatagram>,
    stopping: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<io::Error>>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut scratch = vec![0u8; RECV_BUFFER_LEN];
        while !stopping.load(Ordering::Acquire) {
            match socket.recv_timeout(&mut scratch, RECV_WAIT) {
                Ok(Some((len, source))) if len > 0 => {
                    trace!(%source, len, "socket received datagram");
                    let raw = RawDatagram {
                        source,
                        bytes: scratch[..len].to_vec(),
                    };
                    if tx.send(raw).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    error!(%err, "receive loop stopping on socket error");
                    *fault.lock().expect("fault slot poisoned") = Some(err);
                    break;
                }
            }
        }
        debug!("receiver thread finished");
    })
}
