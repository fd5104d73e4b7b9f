// src/generic/socket.rs

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Scratch buffer size for a single receive; larger than any datagram this
/// protocol produces.
pub const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Upper bound on a single blocking wait in the receiver loop, so the
/// stopping flag is observed promptly.
pub const RECV_WAIT: Duration = Duration::from_millis(100);

/// One datagram in, one datagram out; no framing or buffering underneath.
///
/// Implemented by the real UDP socket and by the in-memory network the
/// integration tests run on.
pub trait DatagramSocket: Send + Sync {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Waits up to `timeout` for a datagram. `Ok(None)` means nothing became
    /// readable in time.
    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration)
    -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub struct UdpDatagramSocket {
    inner: UdpSocket,
}

impl UdpDatagramSocket {
    pub fn bind(port: u16) -> io::Result<Self> {
        let inner = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        inner.set_read_timeout(Some(RECV_WAIT))?;
        Ok(Self { inner })
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr)
    }

    fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        self.inner.set_read_timeout(Some(timeout))?;
        match self.inner.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
