//! The port multiplexer of a node.
//!
//! Every node owns `MAX_PORTS` ports, each with a bounded queue of received
//! datagrams. The driver files inbound datagrams into the queue of their
//! destination port, and connections consume them through a [`BoundPort`].
//! Datagrams for a port nobody is bound to are dropped.

use crate::{
    datagram::{Datagram, Port, MAX_PORTS},
    error::Error,
    node::Node,
};
use futures::{prelude::*, sync::mpsc};
use log::{trace, warn};
use std::sync::{Mutex, MutexGuard};

/// The table of all ports of a node.
#[derive(Debug)]
pub(crate) struct PortTable {
    slots: Mutex<Vec<Slot>>,
    queue_size: usize,
}

/// A single port.
///
/// The port is free as long as the table holds the receiving half of its
/// queue. Binding the port hands the receiver out.
#[derive(Debug)]
struct Slot {
    tx: mpsc::Sender<Datagram>,
    rx: Option<mpsc::Receiver<Datagram>>,
}

/// A port in exclusive use, yielding the datagrams that arrive on it.
///
/// The port is given back to the node when this is dropped.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct BoundPort {
    port: Port,
    node: Node,
    rx: mpsc::Receiver<Datagram>,
}

impl Slot {
    fn new(queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);

        Self { tx, rx: Some(rx) }
    }

    fn is_free(&self) -> bool {
        self.rx.is_some()
    }
}

impl PortTable {
    /// Creates a table where every port is free.
    pub fn new(queue_size: usize) -> Self {
        let slots = (0..MAX_PORTS).map(|_| Slot::new(queue_size)).collect();

        Self {
            slots: Mutex::new(slots),
            queue_size,
        }
    }

    /// Takes the lowest free port.
    pub fn allocate(&self) -> Result<(Port, mpsc::Receiver<Datagram>), Error> {
        let mut slots = self.lock();

        let (port, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_free())
            .ok_or(Error::NoFreePorts)?;
        let rx = slot.rx.take().expect("free slot without receiver");

        Ok((port as Port, rx))
    }

    /// Takes the given port.
    ///
    /// The port starts out empty. A peer that knocked before the port was
    /// bound has to retransmit.
    pub fn bind(&self, port: Port) -> Result<mpsc::Receiver<Datagram>, Error> {
        if port as usize >= MAX_PORTS {
            return Err(Error::InvalidPort(port));
        }

        self.lock()
            .get_mut(port as usize)
            .ok_or(Error::NoFreePorts)?
            .rx
            .take()
            .ok_or(Error::PortInUse(port))
    }

    /// Gives a port back to the table.
    pub fn release(&self, port: Port) {
        let queue_size = self.queue_size;

        if let Some(slot) = self.lock().get_mut(port as usize) {
            trace!("releasing port {}", port);
            *slot = Slot::new(queue_size);
        }
    }

    /// Whether nobody is bound to the given port.
    pub fn is_free(&self, port: Port) -> bool {
        self.lock()
            .get(port as usize)
            .map_or(false, Slot::is_free)
    }

    /// Queues an inbound datagram on its destination port.
    ///
    /// The datagram is dropped if nobody is bound to the port or if the port's
    /// queue is full.
    pub fn deliver(&self, dgram: Datagram) {
        let port = dgram.header.dst_port;
        let mut slots = self.lock();

        let slot = match slots.get_mut(port as usize) {
            Some(slot) => slot,
            None => return,
        };
        if slot.is_free() {
            trace!("nobody is bound to port {}, dropping {}", port, dgram);
            return;
        }

        match slot.tx.try_send(dgram) {
            Ok(()) => {}
            Err(ref e) if e.is_full() => {
                warn!("queue of port {} is full, dropping datagram", port);
            }
            Err(e) => trace!("port {} went away, dropping {}", port, e.into_inner()),
        }
    }

    /// Closes every port.
    ///
    /// Bound ports see the end of their stream, and no port can be taken
    /// anymore.
    pub fn shut_down(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().expect("port table lock poisoned")
    }
}

impl BoundPort {
    pub(crate) fn new(port: Port, node: Node, rx: mpsc::Receiver<Datagram>) -> Self {
        Self { port, node, rx }
    }

    /// The number of the port.
    pub fn port(&self) -> Port {
        self.port
    }

    /// The node the port belongs to.
    pub fn node(&self) -> &Node {
        &self.node
    }
}

impl Stream for BoundPort {
    type Item = Datagram;
    type Error = ();

    fn poll(&mut self) -> Poll<Option<Self::Item>, Self::Error> {
        self.node.spawn_driver();
        self.rx.poll()
    }
}

impl Drop for BoundPort {
    fn drop(&mut self) {
        self.node.ports().release(self.port);
    }
}
