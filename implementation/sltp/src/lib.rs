//! SLTP, a small reliable transport over a lossy datagram link.
//!
//! Nodes on a shared link exchange frames of at most `LINK_MTU` bytes that
//! may get lost on the way. On top of that, SLTP offers ordered and reliable
//! connections between ports of two nodes, opened with a three-way handshake
//! and closed with a FIN exchange. Every data segment is retransmitted until
//! it is acknowledged, with a single segment in flight per direction.
//!
//! All I/O is driven by tokio: each [`Node`] spawns a background driver onto
//! the runtime, and every connection runs a small task of its own.

// Macros need to lexically come before the rest to be usable
#[macro_use]
mod macros;

mod accept;
mod config;
mod connect;
mod connection;
pub mod datagram;
mod driver;
mod error;
mod hub;
mod link;
mod node;
mod ports;
mod state;
mod stream;
mod timer;

pub use crate::{
    accept::Accept,
    config::Config,
    connect::Connect,
    datagram::{Datagram, Flags, FramingError, Header, Kind, Port, LINK_MTU, MAX_PAYLOAD, MAX_PORTS},
    error::{Error, Violation},
    hub::{Hub, HubLink},
    link::{Link, LinkAddr, UdpLink, DEFAULT_BASE_PORT},
    node::{Node, Transmit},
    ports::BoundPort,
    state::State,
    stream::SltpStream,
};
