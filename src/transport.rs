//! The datagram transport seam. Production code backs this with a real
//! `UdpSocket`; tests back it with an in-memory double that can drop,
//! reorder, or corrupt datagrams under a scripted policy.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::TransportError;

/// Minimal send/receive contract the engine needs from a datagram socket.
pub trait DatagramTransport: Send {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, TransportError>;

    /// Blocks until a datagram arrives or `timeout` elapses, returning
    /// `Ok(None)` on timeout. `buf` must be large enough for one datagram.
    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, SocketAddr)>, TransportError>;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(local_port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).map_err(TransportError)?;
        Ok(UdpTransport { socket })
    }
}

impl DatagramTransport for UdpTransport {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, TransportError> {
        self.socket.send_to(buf, target).map_err(TransportError)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        self.socket.set_read_timeout(timeout).map_err(TransportError)?;

        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(TransportError(e)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError)
    }
}
