//! Implements the future that accepts a new connection.

use crate::{
    connection::Connection,
    datagram::Port,
    error::Error,
    node::Node,
    state::{Control, Event, State},
    stream::SltpStream,
};
use futures::prelude::*;
use log::debug;
use std::io;

const POLLED_TWICE: &str = "cannot poll Accept twice";

/// A future representing an SLTP stream being accepted on a port.
///
/// The port is bound on the first poll, and the future resolves as soon as a
/// SYN has been answered. Dropping the future before that frees the port.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Accept {
    node: Node,
    port: Port,

    /// The listening connection, once the port is bound.
    conn: Option<Connection>,

    resolved: bool,
}

impl Accept {
    pub(crate) fn new(node: Node, port: Port) -> Self {
        Self {
            node,
            port,
            conn: None,
            resolved: false,
        }
    }

    fn start(&mut self) -> Result<Connection, Error> {
        let port = self.node.bind_port(self.port)?;
        debug!("listening on port {}", self.port);

        let local = (self.node.local_addr(), self.port);
        let conn = Connection::new(Control::listening(local, self.node.config()));
        conn.spawn(port);

        Ok(conn)
    }
}

impl Future for Accept {
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
                (Ok(_), State::SynRcvd) => {
                    if let Some((addr, port)) = shared.control.remote() {
                        debug!("accepting {}:{} on port {}", addr, port, self.port);
                    }

                    shared.handle(Event::Accept);
                    Ok(Async::Ready(()))
                }
                (Ok(_), State::Closed) if !shared.control.is_terminated() => {
                    shared.park();
                    Ok(Async::NotReady)
                }
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

impl Drop for Accept {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.lock().handle(Event::Close);
        }
    }
}
