//! A host on the link.

use crate::{
    accept::Accept,
    config::Config,
    connect::Connect,
    datagram::{Datagram, Port},
    driver::{Driver, Outbound},
    error::Error,
    link::{Link, LinkAddr},
    ports::{BoundPort, PortTable},
};
use futures::{
    prelude::*,
    sync::{mpsc, oneshot},
};
use log::debug;
use std::{
    io::{self, ErrorKind},
    sync::{Arc, Mutex},
};

pub(crate) const DRIVER_AWAY: &str = "driver has gone away";
const POLLED_TWICE: &str = "cannot poll Transmit twice";

/// A node on the link, hosting any number of connections.
///
/// The node is a cheap handle: clones share the same ports and link. The
/// link is serviced by a background driver which is spawned onto the tokio
/// runtime as soon as one of the node's futures or streams is polled. It
/// runs until the node, its ports and all its connections are gone.
#[derive(Clone, Debug)]
pub struct Node {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    addr: LinkAddr,
    config: Config,

    /// The driver to spawn on the first poll.
    driver: Mutex<Option<Driver>>,

    /// The channel to hand frames to the driver.
    outbound: mpsc::UnboundedSender<Outbound>,

    ports: Arc<PortTable>,
}

/// A future resolving once a datagram has been handed to the link.
///
/// Resolving does not imply the datagram has been delivered.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Transmit {
    node: Node,
    done: Option<oneshot::Receiver<io::Result<()>>>,
    error: Option<io::Error>,
}

impl Node {
    /// Creates a node on the given link using the default configuration.
    pub fn new(link: impl Link) -> io::Result<Self> {
        Self::with_config(link, Config::default())
    }

    /// Creates a node on the given link.
    pub fn with_config(link: impl Link, config: Config) -> io::Result<Self> {
        config.validate()?;

        let ports = Arc::new(PortTable::new(config.port_queue_size));
        let (tx, rx) = mpsc::unbounded();
        let addr = link.local_addr();
        let driver = Driver::new(Box::new(link), rx, ports.clone());

        debug!("created node {}", addr);

        Ok(Self {
            inner: Arc::new(Inner {
                addr,
                config,
                driver: Mutex::new(Some(driver)),
                outbound: tx,
                ports,
            }),
        })
    }

    /// The link address of this node.
    pub fn local_addr(&self) -> LinkAddr {
        self.inner.addr
    }

    /// The configuration of this node.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Opens a connection to the given port of a remote node.
    ///
    /// The local port is the lowest free one at the time the returned future
    /// is first polled.
    pub fn connect(&self, remote: LinkAddr, port: Port) -> Connect {
        Connect::new(self.clone(), (remote, port))
    }

    /// Waits for a peer to open a connection to the given local port.
    pub fn accept(&self, port: Port) -> Accept {
        Accept::new(self.clone(), port)
    }

    /// Takes the lowest free port for raw datagram exchange.
    pub fn allocate_port(&self) -> Result<BoundPort, Error> {
        let (port, rx) = self.inner.ports.allocate()?;
        Ok(BoundPort::new(port, self.clone(), rx))
    }

    /// Takes the given port for raw datagram exchange.
    pub fn bind_port(&self, port: Port) -> Result<BoundPort, Error> {
        let rx = self.inner.ports.bind(port)?;
        Ok(BoundPort::new(port, self.clone(), rx))
    }

    /// Checks whether the given port is available.
    pub fn is_port_free(&self, port: Port) -> bool {
        self.inner.ports.is_free(port)
    }

    /// Puts a datagram on the link.
    ///
    /// Only the destination link address is taken from the datagram, the
    /// receiver sees this node as the sender. Frames are sent one at a time
    /// in the order this is called.
    pub fn send(&self, dgram: &Datagram) -> Transmit {
        let (tx, rx) = oneshot::channel();

        let error = match dgram.encode() {
            Ok(frame) => {
                let out = Outbound {
                    dst: dgram.dst,
                    frame,
                    done: tx,
                };

                self.inner
                    .outbound
                    .unbounded_send(out)
                    .err()
                    .map(|_| io::Error::new(ErrorKind::Other, DRIVER_AWAY))
            }
            Err(e) => Some(Error::from(e).into()),
        };

        Transmit {
            node: self.clone(),
            done: Some(rx),
            error,
        }
    }

    pub(crate) fn ports(&self) -> &PortTable {
        &self.inner.ports
    }

    /// Spawns the driver, if it hasn't been yet, onto the tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub(crate) fn spawn_driver(&self) {
        let driver = self
            .inner
            .driver
            .lock()
            .expect("driver lock poisoned")
            .take();

        if let Some(d) = driver {
            tokio::spawn(d);
        }
    }
}

impl Future for Transmit {
    type Item = ();
    type Error = io::Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        self.node.spawn_driver();

        let res = match self.done.as_mut().expect(POLLED_TWICE).poll() {
            Ok(Async::Ready(res)) => res,
            Ok(Async::NotReady) => return Ok(Async::NotReady),
            Err(_) => Err(io::Error::new(ErrorKind::Other, DRIVER_AWAY)),
        };

        self.done = None;
        res.map(Async::Ready)
    }
}
