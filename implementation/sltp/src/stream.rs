use crate::{
    connection::Connection,
    datagram::{Port, MAX_PAYLOAD},
    link::LinkAddr,
    state::{Event, State},
};
use bytes::Bytes;
use futures::prelude::*;
use log::trace;
use std::io::{self, ErrorKind, Read, Write};
use tokio::io::{AsyncRead, AsyncWrite};

/// A full-duplex SLTP stream.
///
/// Writes are cut into segments of at most `MAX_PAYLOAD` bytes, and only one
/// segment is unacknowledged at a time, so a write blocks until the previous
/// one has been acknowledged.
///
/// Dropping the stream closes it in the background.
#[derive(Debug)]
pub struct SltpStream {
    conn: Connection,
}

impl SltpStream {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// The current protocol state.
    pub fn state(&self) -> State {
        self.conn.lock().control.state()
    }

    /// The local link address and port.
    pub fn local_addr(&self) -> (LinkAddr, Port) {
        self.conn.lock().control.local()
    }

    /// The remote link address and port.
    pub fn peer_addr(&self) -> (LinkAddr, Port) {
        self.conn
            .lock()
            .control
            .remote()
            .expect("stream without remote endpoint")
    }

    /// The sequence number of the next data segment to be sent.
    pub fn send_seq(&self) -> u32 {
        self.conn.lock().control.send_seq()
    }

    /// The sequence number of the next data segment expected from the peer.
    pub fn recv_seq(&self) -> u32 {
        self.conn.lock().control.recv_seq()
    }

    /// Starts closing the connection without waiting for it to finish.
    ///
    /// Data still in flight makes the peer stop sending before the FIN is
    /// exchanged. Buffered data can still be read afterwards.
    pub fn close(&mut self) {
        let mut shared = self.conn.lock();

        match shared.control.state() {
            State::Established | State::StpRcvd => shared.handle(Event::Close),
            state => trace!("close in state {:?} has no effect", state),
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Poll<usize, io::Error> {
        let mut shared = self.conn.lock();
        shared.check()?;

        match shared.control.read(buf)? {
            Some(nread) => Ok(Async::Ready(nread)),
            None if shared.finished => Err(ErrorKind::ConnectionAborted.into()),
            None => {
                shared.park();
                Ok(Async::NotReady)
            }
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> Poll<usize, io::Error> {
        if buf.is_empty() {
            return Ok(Async::Ready(0));
        }

        let mut shared = self.conn.lock();
        shared.check()?;

        if !shared.control.writable()? {
            shared.park();
            return Ok(Async::NotReady);
        }

        let len = buf.len().min(MAX_PAYLOAD);
        shared.handle(Event::Send(Bytes::from(&buf[..len])));

        Ok(Async::Ready(len))
    }

    fn try_flush(&mut self) -> Poll<(), io::Error> {
        let mut shared = self.conn.lock();
        shared.check()?;

        if shared.control.flushed()? {
            Ok(Async::Ready(()))
        } else {
            shared.park();
            Ok(Async::NotReady)
        }
    }
}

impl Read for SltpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        try_would_block!(self.try_read(buf))
    }
}

impl AsyncRead for SltpStream {}

impl Write for SltpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        try_would_block!(self.try_write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        try_would_block!(self.try_flush())
    }
}

impl AsyncWrite for SltpStream {
    /// Closes the connection and waits until it has been torn down.
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        self.close();

        let mut shared = self.conn.lock();
        if !shared.finished {
            shared.park();
            return Ok(Async::NotReady);
        }

        shared.check()?;
        match shared.control.error() {
            Some(e) => Err(e.clone().into()),
            None => Ok(Async::Ready(())),
        }
    }
}

impl Drop for SltpStream {
    fn drop(&mut self) {
        self.close();
    }
}
