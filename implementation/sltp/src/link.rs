//! The boundary to the physical link.
//!
//! A link carries single, small frames between nodes identified by a flat
//! link address. Frames may be dropped, but they are never corrupted,
//! duplicated or reordered.

use futures::{prelude::*, try_ready};
use log::trace;
use rand::{self, Rng};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    io::{self, Error, ErrorKind},
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use tokio::net::UdpSocket;

/// The UDP port node `0` of a [`UdpLink`] segment listens on.
pub const DEFAULT_BASE_PORT: u16 = 15000;

/// The address of a node on the link.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LinkAddr(pub u8);

/// A physical link that sends and receives one frame at a time.
///
/// The methods follow the polling conventions of tokio's UDP socket and must
/// register the current task when returning `Async::NotReady`.
pub trait Link: Debug + Send + 'static {
    /// The address of this node.
    fn local_addr(&self) -> LinkAddr;

    /// Hands a frame to the link.
    ///
    /// Completes once the link is ready to accept the next frame. A completed
    /// send does not imply delivery.
    fn poll_send_to(&mut self, frame: &[u8], dst: LinkAddr) -> Poll<(), Error>;

    /// Receives the next frame that arrived at this node.
    fn poll_recv_from(&mut self, buf: &mut [u8]) -> Poll<(usize, LinkAddr), Error>;
}

/// A link emulated over UDP on the loopback interface.
///
/// Node `n` owns the UDP socket at `127.0.0.1:(base_port + n)`. Each sent
/// frame is only delivered with the configured reliability, which emulates a
/// lossy segment.
#[derive(Debug)]
pub struct UdpLink {
    addr: LinkAddr,
    base_port: u16,
    reliability: f64,
    socket: UdpSocket,
}

impl Display for LinkAddr {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        Display::fmt(&self.0, fmt)
    }
}

impl From<u8> for LinkAddr {
    fn from(addr: u8) -> Self {
        LinkAddr(addr)
    }
}

/// Decides whether a frame survives a link with the given reliability.
pub(crate) fn survives(reliability: f64) -> bool {
    reliability >= 1.0 || rand::thread_rng().gen_bool(reliability)
}

/// Asserts that the reliability is a probability.
pub(crate) fn check_reliability(reliability: f64) -> io::Result<()> {
    if reliability > 0.0 && reliability <= 1.0 {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::InvalidInput,
            format!("reliability {} is not within (0, 1]", reliability),
        ))
    }
}

impl UdpLink {
    /// Binds the socket of the given node using the default base port.
    pub fn bind(addr: LinkAddr) -> io::Result<Self> {
        Self::bind_with(addr, DEFAULT_BASE_PORT, 1.0)
    }

    /// Binds the socket of the given node.
    ///
    /// `reliability` is the probability in `(0, 1]` that a sent frame is
    /// actually put on the wire.
    pub fn bind_with(
        addr: LinkAddr,
        base_port: u16,
        reliability: f64,
    ) -> io::Result<Self> {
        check_reliability(reliability)?;

        let socket = UdpSocket::bind(&Self::socket_addr(base_port, addr)?)?;

        Ok(Self {
            addr,
            base_port,
            reliability,
            socket,
        })
    }

    /// Computes the UDP address of a node.
    fn socket_addr(base_port: u16, addr: LinkAddr) -> io::Result<SocketAddr> {
        let port = base_port.checked_add(addr.0 as u16).ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput, "link address exceeds the port range")
        })?;

        Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    /// Maps a UDP sender back to its link address, if it belongs to the segment.
    fn link_addr(&self, from: &SocketAddr) -> Option<LinkAddr> {
        if !from.ip().is_loopback() {
            return None;
        }

        from.port()
            .checked_sub(self.base_port)
            .filter(|&offset| offset <= u8::max_value() as u16)
            .map(|offset| LinkAddr(offset as u8))
    }
}

impl Link for UdpLink {
    fn local_addr(&self) -> LinkAddr {
        self.addr
    }

    fn poll_send_to(&mut self, frame: &[u8], dst: LinkAddr) -> Poll<(), Error> {
        if !survives(self.reliability) {
            trace!("dropping frame to {} on the floor", dst);
            return Ok(Async::Ready(()));
        }

        let target = Self::socket_addr(self.base_port, dst)?;
        try_ready!(self.socket.poll_send_to(frame, &target));

        Ok(Async::Ready(()))
    }

    fn poll_recv_from(&mut self, buf: &mut [u8]) -> Poll<(usize, LinkAddr), Error> {
        loop {
            let (nread, from) = try_ready!(self.socket.poll_recv_from(buf));

            match self.link_addr(&from) {
                Some(src) => return Ok(Async::Ready((nread, src))),
                None => trace!("discarding frame from foreign sender {}", from),
            }
        }
    }
}
