//! Implements the future that builds up a new connection.

use crate::{
    connection::Connection,
    datagram::{Port, MAX_PORTS},
    error::Error,
    link::LinkAddr,
    node::Node,
    state::{Control, Event, State},
    stream::SltpStream,
};
use futures::prelude::*;
use log::debug;
use std::io;

const POLLED_TWICE: &str = "cannot poll Connect twice";

/// A future representing the connection of a new SLTP stream.
///
/// The SYN is retransmitted until the peer answers. Dropping the future
/// abandons the attempt and frees the local port.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Connect {
    node: Node,

    /// The remote node and port to connect to.
    remote: (LinkAddr, Port),

    /// The connection being set up.
    ///
    /// To honor that futures in Rust are created "cold" and only do things when
    /// polled, the port is taken and the SYN is sent on the first poll instead
    /// of during construction of this future.
    ///
    /// This is when this turns `Some`. It turns `None` again once resolved.
    conn: Option<Connection>,

    /// Whether the future has resolved already.
    resolved: bool,
}

impl Connect {
    pub(crate) fn new(node: Node, remote: (LinkAddr, Port)) -> Self {
        Self {
            node,
            remote,
            conn: None,
            resolved: false,
        }
    }

    /// Takes a local port and sends the SYN.
    fn start(&mut self) -> Result<Connection, Error> {
        if self.remote.1 as usize >= MAX_PORTS {
            return Err(Error::InvalidPort(self.remote.1));
        }

        let port = self.node.allocate_port()?;
        let local = (self.node.local_addr(), port.port());
        debug!(
            "connecting from port {} to {}:{}",
            local.1, self.remote.0, self.remote.1,
        );

        let conn = Connection::new(Control::connecting(local, self.remote, self.node.config()));
        conn.lock().handle(Event::Connect);
        conn.spawn(port);

        Ok(conn)
    }
}

impl Future for Connect {
    type Item = SltpStream;
    type Error = io::Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        assert!(!self.resolved, POLLED_TWICE);

        if self.conn.is_none() {
            let started = self.start();
            self.resolved = started.is_err();
            self.conn = Some(started?);
        }

        let res = {
            let conn = self.conn.as_ref().expect(POLLED_TWICE);
            let mut shared = conn.lock();

            match (shared.check(), shared.control.state()) {
                (Err(e), _) => Err(e),
                (Ok(_), State::Established) => Ok(Async::Ready(())),
                (Ok(_), State::SynSent) => {
                    shared.park();
                    Ok(Async::NotReady)
                }
                (Ok(_), State::Deadlock) => Err(shared
                    .control
                    .error()
                    .cloned()
                    .unwrap_or(Error::NotConnected)
                    .into()),
                (Ok(_), _) => Err(Error::NotConnected.into()),
            }
        };

        match res {
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Ok(Async::Ready(())) => {
                self.resolved = true;
                let conn = self.conn.take().expect(POLLED_TWICE);
                Ok(Async::Ready(SltpStream::new(conn)))
            }
            Err(e) => {
                self.resolved = true;
                Err(e)
            }
        }
    }
}

impl Drop for Connect {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.lock().handle(Event::Close);
        }
    }
}
