//! The transport back-end seam.
//!
//! Concrete UDP/SCTP socket I/O is an external collaborator per spec.md §1:
//! this module only defines the trait the dispatcher threads program
//! against, plus a couple of implementations useful for tests (a real UDP
//! loopback and an in-memory pair), grounded on the `Transport` trait in
//! `merkle-tox-core`'s `lib.rs`.

use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::error::TransportError;

/// Which concrete transport a link is configured for. The core only ever
/// special-cases SCTP for the "protocol unsupported" skip signal (spec.md
/// §7); everything else is backend-opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Sctp,
}

/// A single datagram transport endpoint bound to one link.
///
/// Implementations must be safe to poll from the RX worker and write to from
/// the TX worker concurrently; the core never multiplexes a single endpoint
/// across more than one worker role at a time, so no internal locking is
/// required beyond what the implementation itself needs for the underlying
/// socket.
pub trait Transport: fmt::Debug + Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Sends one datagram to the link's configured remote address. Returns
    /// `Ok(())` only once the datagram has been handed to the OS (or
    /// simulated backend); it does not imply delivery.
    fn send(&self, buf: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking receive. `Ok(None)` means nothing is currently pending;
    /// callers are expected to multiplex many endpoints with a `poll`-style
    /// wait and then drain each with repeated calls to this method.
    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError>;

    /// Learns (or confirms) the remote address data actually arrived from,
    /// used by dynamic (unspecified-remote) links per spec.md §8 scenario 2.
    fn set_remote(&self, addr: SocketAddr);

    fn local_addr(&self) -> SocketAddr;
}

/// A real UDP socket transport.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote: parking_lot::RwLock<Option<SocketAddr>>,
}

impl UdpTransport {
    pub fn bind(local: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local).map_err(|_| TransportError::AddressInUse)?;
        socket.set_nonblocking(true).ok();
        Ok(Self {
            socket,
            remote: parking_lot::RwLock::new(None),
        })
    }

    pub fn connected(local: SocketAddr, remote: SocketAddr) -> Result<Self, TransportError> {
        let t = Self::bind(local)?;
        t.set_remote(remote);
        Ok(t)
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        let remote = *self.remote.read();
        let remote = remote.ok_or_else(|| {
            TransportError::SendFailed(0, 0, "no remote address configured yet".into())
        })?;
        self.socket
            .send_to(buf, remote)
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(0, 0, e.to_string()))
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::SendFailed(0, 0, e.to_string())),
        }
    }

    fn set_remote(&self, addr: SocketAddr) {
        *self.remote.write() = Some(addr);
    }

    fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("bound socket has a local address")
    }
}

/// An in-memory, lossless datagram pair for unit tests that don't need real
/// sockets. Two `LoopbackTransport`s constructed via [`LoopbackTransport::pair`]
/// deliver datagrams to each other through bounded channels.
#[derive(Debug)]
pub struct LoopbackTransport {
    local_addr: SocketAddr,
    remote: parking_lot::RwLock<Option<SocketAddr>>,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn pair(addr_a: SocketAddr, addr_b: SocketAddr) -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        let a = Arc::new(Self {
            local_addr: addr_a,
            remote: parking_lot::RwLock::new(Some(addr_b)),
            tx: tx_b,
            rx: rx_a,
        });
        let b = Arc::new(Self {
            local_addr: addr_b,
            remote: parking_lot::RwLock::new(Some(addr_a)),
            tx: tx_a,
            rx: rx_b,
        });
        (a, b)
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| TransportError::SendFailed(0, 0, "peer dropped".into()))
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.rx.try_recv() {
            Ok(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                let from = self.remote.read().unwrap_or(self.local_addr);
                Ok(Some((n, from)))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn set_remote(&self, addr: SocketAddr) {
        *self.remote.write() = Some(addr);
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
