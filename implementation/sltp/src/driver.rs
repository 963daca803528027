//! Implements the background processor of a node.

use crate::{
    datagram::{self, Datagram, LINK_MTU},
    link::{Link, LinkAddr},
    ports::PortTable,
};
use bytes::Bytes;
use futures::{
    prelude::*,
    sync::{mpsc, oneshot},
};
use log::{debug, error, trace, warn};
use std::{io, sync::Arc};

/// A frame waiting to be put on the link.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub dst: LinkAddr,
    pub frame: Bytes,

    /// Notified once the link has taken the frame.
    pub done: oneshot::Sender<io::Result<()>>,
}

/// The background worker behind a node.
///
/// The link has a single sender and a single receiver per node, so all
/// connections share it through the driver. It takes frames from the
/// connections one at a time, and files every received datagram into the
/// queue of its destination port.
///
/// It stops working once every handle to the node has been dropped, or when
/// the link fails.
#[derive(Debug)]
pub(crate) struct Driver {
    /// The address of this node.
    addr: LinkAddr,

    /// The actual link.
    link: Box<dyn Link>,

    /// Frames handed in by connections.
    outbound: mpsc::UnboundedReceiver<Outbound>,

    /// The frame currently being sent.
    ///
    /// Only one frame is on its way at a time, which keeps transmissions of
    /// different connections from interleaving.
    in_flight: Option<Outbound>,

    /// The port queues to deliver to.
    ports: Arc<PortTable>,

    /// A receive buffer for frames.
    ///
    /// One byte larger than the MTU, so oversized frames are noticed instead
    /// of silently truncated.
    recv_buf: Vec<u8>,
}

/// The outcome of a single send or receive attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Step {
    Progress,
    Idle,
    Shutdown,
}

impl Driver {
    pub fn new(
        link: Box<dyn Link>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        ports: Arc<PortTable>,
    ) -> Self {
        Self {
            addr: link.local_addr(),
            link,
            outbound,
            in_flight: None,
            ports,
            recv_buf: vec![0; LINK_MTU + 1],
        }
    }

    /// Advances the transmission of outbound frames.
    fn poll_send(&mut self) -> Step {
        if self.in_flight.is_none() {
            match self.outbound.poll() {
                Ok(Async::Ready(Some(out))) => self.in_flight = Some(out),
                Ok(Async::Ready(None)) | Err(_) => return Step::Shutdown,
                Ok(Async::NotReady) => return Step::Idle,
            }
        }

        let res = {
            let out = self.in_flight.as_ref().expect("no frame in flight");
            self.link.poll_send_to(&out.frame, out.dst)
        };
        let out = match res {
            Ok(Async::NotReady) => return Step::Idle,
            _ => self.in_flight.take().expect("no frame in flight"),
        };

        match res {
            Ok(_) => trace!("sent {} bytes to {}", out.frame.len(), out.dst),
            Err(ref e) => warn!("failed to send frame to {}: {}", out.dst, e),
        }

        // The sender may have given up on the frame already
        let _ = out.done.send(res.map(|_| ()));
        Step::Progress
    }

    /// Receives a single frame and files it into its port queue.
    fn poll_recv(&mut self) -> Step {
        let (nread, src) = match self.link.poll_recv_from(&mut self.recv_buf) {
            Ok(Async::Ready(data)) => data,
            Ok(Async::NotReady) => return Step::Idle,
            Err(e) => {
                error!("link of node {} failed: {}", self.addr, e);
                return Step::Shutdown;
            }
        };

        let frame = Bytes::from(&self.recv_buf[..nread]);
        match datagram::decode(&frame) {
            Ok((header, payload)) => {
                let dgram = Datagram {
                    dst: self.addr,
                    src,
                    header,
                    payload,
                };

                trace!("received {}", dgram);
                self.ports.deliver(dgram);
            }
            Err(e) => trace!("discarding malformed frame from {}: {}", src, e),
        }

        Step::Progress
    }
}

// To make the driver work in the background on an executor, we represent
// it as future that only ever resolves in case of a link failure, or when
// the node and all its connections have been dropped.

impl Future for Driver {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        loop {
            let sent = self.poll_send();
            let received = if sent == Step::Shutdown {
                Step::Shutdown
            } else {
                self.poll_recv()
            };

            match (sent, received) {
                (Step::Shutdown, _) | (_, Step::Shutdown) => {
                    debug!("shutting down driver of node {}", self.addr);

                    // Wakes up every connection still waiting for datagrams
                    self.ports.shut_down();
                    return Ok(Async::Ready(()));
                }
                (Step::Idle, Step::Idle) => return Ok(Async::NotReady),
                _ => {}
            }
        }
    }
}
