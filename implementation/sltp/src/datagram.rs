//! This module implements the wire format of SLTP datagrams.
//!
//! Every datagram starts with a fixed seven byte header, all numbers in
//! network byte order:
//!
//! ```ascii
//! 0: destination port (0..127)
//! 1: source port (0..127)
//! 2: flags (bit 0: SYN, bit 1: ACK, bit 2: STP, bit 3: FIN, none: DATA)
//! 3: sequence number (u32)
//! 7: payload (0..MAX_PAYLOAD bytes)
//! ```
//!
//! The link below guarantees integrity, so there is no checksum.

use crate::link::LinkAddr;
use bitflags::bitflags;
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    io::{self, Cursor},
};

/// The largest frame the link layer carries.
pub const LINK_MTU: usize = 64;

/// The size of the fixed datagram header.
pub const HEADER_LEN: usize = 7;

/// The largest payload a single datagram can carry.
pub const MAX_PAYLOAD: usize = LINK_MTU - HEADER_LEN;

/// The amount of ports available on every node.
pub const MAX_PORTS: usize = 128;

/// A port number in `[0, MAX_PORTS)`.
pub type Port = u8;

bitflags! {
    /// The control bits of a datagram.
    ///
    /// A datagram without any flag set carries data.
    pub struct Flags: u8 {
        const SYN = 0b0001;
        const ACK = 0b0010;
        const STP = 0b0100;
        const FIN = 0b1000;
    }
}

/// The meaning of a datagram as derived from its flags.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Data,
    Syn,
    SynAck,
    Ack,
    Stp,
    Fin,
    FinAck,

    /// A combination of flags the protocol does not use.
    Unknown,
}

/// The fixed-size part of a datagram.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Header {
    pub dst_port: Port,
    pub src_port: Port,
    pub flags: Flags,
    pub seq: u32,
}

/// A decoded datagram together with the link addresses it travels between.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Datagram {
    pub dst: LinkAddr,
    pub src: LinkAddr,
    pub header: Header,
    pub payload: Bytes,
}

/// The error when a frame cannot be encoded or decoded.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FramingError {
    /// The frame is shorter than the fixed header.
    Truncated(usize),

    /// A port field lies outside of `[0, MAX_PORTS)`.
    PortOutOfRange(u8),

    /// The payload is larger than `MAX_PAYLOAD`.
    PayloadTooLarge(usize),
}

impl Header {
    /// Constructs a new header.
    pub fn new(dst_port: Port, src_port: Port, flags: Flags, seq: u32) -> Self {
        Self {
            dst_port,
            src_port,
            flags,
            seq,
        }
    }

    /// Classifies the header by its flags.
    pub fn kind(&self) -> Kind {
        let f = self.flags;

        if f.is_empty() {
            Kind::Data
        } else if f == Flags::SYN {
            Kind::Syn
        } else if f == Flags::SYN | Flags::ACK {
            Kind::SynAck
        } else if f == Flags::ACK {
            Kind::Ack
        } else if f == Flags::STP {
            Kind::Stp
        } else if f == Flags::FIN {
            Kind::Fin
        } else if f == Flags::FIN | Flags::ACK {
            Kind::FinAck
        } else {
            Kind::Unknown
        }
    }

    /// Checks that both port fields lie within the valid range.
    fn check_ports(&self) -> Result<(), FramingError> {
        for &port in &[self.dst_port, self.src_port] {
            if port as usize >= MAX_PORTS {
                return Err(FramingError::PortOutOfRange(port));
            }
        }

        Ok(())
    }
}

/// Serializes the header and the payload into a single frame.
pub fn encode(header: &Header, payload: &[u8]) -> Result<Bytes, FramingError> {
    header.check_ports()?;
    if payload.len() > MAX_PAYLOAD {
        return Err(FramingError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());

    // Writing into a vector cannot fail
    buf.push(header.dst_port);
    buf.push(header.src_port);
    buf.push(header.flags.bits());
    buf.write_u32::<NetworkEndian>(header.seq)
        .expect("writing to a vec failed");
    buf.extend_from_slice(payload);

    Ok(buf.into())
}

/// Parses a frame into its header and payload.
///
/// The payload shares the memory of the given frame. Flag bits the protocol
/// does not know about are ignored.
pub fn decode(frame: &Bytes) -> Result<(Header, Bytes), FramingError> {
    if frame.len() < HEADER_LEN {
        return Err(FramingError::Truncated(frame.len()));
    }
    if frame.len() - HEADER_LEN > MAX_PAYLOAD {
        return Err(FramingError::PayloadTooLarge(frame.len() - HEADER_LEN));
    }

    let mut cursor = Cursor::new(&frame[..HEADER_LEN]);
    let read_err = |_: io::Error| FramingError::Truncated(frame.len());

    let header = Header {
        dst_port: cursor.read_u8().map_err(read_err)?,
        src_port: cursor.read_u8().map_err(read_err)?,
        flags: Flags::from_bits_truncate(cursor.read_u8().map_err(read_err)?),
        seq: cursor.read_u32::<NetworkEndian>().map_err(read_err)?,
    };
    header.check_ports()?;

    Ok((header, frame.slice_from(HEADER_LEN)))
}

impl Datagram {
    /// Creates a datagram without payload.
    pub fn control(
        dst: (LinkAddr, Port),
        src: (LinkAddr, Port),
        flags: Flags,
        seq: u32,
    ) -> Self {
        Self::with_payload(dst, src, flags, seq, Bytes::new())
    }

    /// Creates a datagram carrying the given payload.
    pub fn with_payload(
        dst: (LinkAddr, Port),
        src: (LinkAddr, Port),
        flags: Flags,
        seq: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            dst: dst.0,
            src: src.0,
            header: Header::new(dst.1, src.1, flags, seq),
            payload,
        }
    }

    /// Classifies the datagram by its flags.
    pub fn kind(&self) -> Kind {
        self.header.kind()
    }

    /// The sequence number.
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// The link address and port this datagram was sent from.
    pub fn source(&self) -> (LinkAddr, Port) {
        (self.src, self.header.src_port)
    }

    /// Serializes the datagram into a frame for the link.
    pub fn encode(&self) -> Result<Bytes, FramingError> {
        encode(&self.header, &self.payload)
    }
}

impl Display for Datagram {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "{}:{} -> {}:{} {:?} seq={} len={}",
            self.src,
            self.header.src_port,
            self.dst,
            self.header.dst_port,
            self.kind(),
            self.header.seq,
            self.payload.len(),
        )
    }
}

impl Display for FramingError {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match *self {
            FramingError::Truncated(len) => {
                write!(fmt, "frame of {} bytes is shorter than the header", len)
            }
            FramingError::PortOutOfRange(port) => {
                write!(fmt, "port {} is out of range", port)
            }
            FramingError::PayloadTooLarge(len) => write!(
                fmt,
                "payload of {} bytes exceeds the maximum of {}",
                len, MAX_PAYLOAD,
            ),
        }
    }
}

impl StdError for FramingError {}
