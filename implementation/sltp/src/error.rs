use crate::datagram::{FramingError, Port};
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    io::{self, ErrorKind},
};

/// Errors surfaced by SLTP nodes and connections.
///
/// At the I/O boundary these are wrapped into an `io::Error`, from which they
/// can be recovered via `get_ref` and `downcast_ref`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// A datagram could not be framed.
    Framing(FramingError),

    /// Every port of the node is in use.
    NoFreePorts,

    /// The requested port is bound by another connection.
    PortInUse(Port),

    /// The port number lies outside of the port range.
    InvalidPort(Port),

    /// The peer broke the protocol and the connection cannot recover.
    ProtocolViolation(Violation),

    /// The connection is not in a state that allows the operation.
    NotConnected,

    /// The connection is closing or has been closed.
    Closed,

    /// A configuration value is unusable.
    InvalidConfig(&'static str),
}

/// The ways a peer can break the protocol.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Violation {
    /// Both sides sent a SYN to each other at the same time.
    SimultaneousOpen,
}

impl Error {
    /// The `io::ErrorKind` this error is reported with.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Framing(_) => ErrorKind::InvalidData,
            Error::NoFreePorts => ErrorKind::AddrNotAvailable,
            Error::PortInUse(_) => ErrorKind::AddrInUse,
            Error::InvalidPort(_) => ErrorKind::InvalidInput,
            Error::ProtocolViolation(_) => ErrorKind::ConnectionAborted,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::Closed => ErrorKind::BrokenPipe,
            Error::InvalidConfig(_) => ErrorKind::InvalidInput,
        }
    }
}

impl Display for Error {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            Error::Framing(e) => write!(fmt, "framing error: {}", e),
            Error::NoFreePorts => "no free ports".fmt(fmt),
            Error::PortInUse(port) => write!(fmt, "port {} is in use", port),
            Error::InvalidPort(port) => write!(fmt, "port {} is out of range", port),
            Error::ProtocolViolation(v) => write!(fmt, "protocol violation: {}", v),
            Error::NotConnected => "connection is not established".fmt(fmt),
            Error::Closed => "connection is closing".fmt(fmt),
            Error::InvalidConfig(msg) => write!(fmt, "invalid configuration: {}", msg),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            Violation::SimultaneousOpen => "simultaneous open".fmt(fmt),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Framing(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Error::Framing(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(e.kind(), e)
    }
}
