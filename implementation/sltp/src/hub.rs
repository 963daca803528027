//! An in-memory link segment.
//!
//! The hub connects any number of nodes within one process. It is mostly
//! useful for tests, where it replaces real sockets and can drop a fraction
//! of all frames to exercise retransmission.

use crate::link::{check_reliability, survives, Link, LinkAddr};
use bytes::Bytes;
use futures::{prelude::*, sync::mpsc};
use log::trace;
use std::{
    collections::HashMap,
    io::{self, Error, ErrorKind},
    sync::{Arc, Mutex, MutexGuard},
};

/// A shared broadcast segment that nodes can attach to.
#[derive(Clone, Debug)]
pub struct Hub {
    inner: Arc<Mutex<Inner>>,
}

/// The attachment of a single node to a [`Hub`].
#[derive(Debug)]
pub struct HubLink {
    addr: LinkAddr,
    hub: Hub,
    recv: mpsc::UnboundedReceiver<(LinkAddr, Bytes)>,
}

#[derive(Debug)]
struct Inner {
    nodes: HashMap<LinkAddr, mpsc::UnboundedSender<(LinkAddr, Bytes)>>,
    reliability: f64,
}

impl Hub {
    /// Creates a hub that delivers every frame.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                nodes: HashMap::new(),
                reliability: 1.0,
            })),
        }
    }

    /// Creates a hub that delivers frames with the given probability.
    pub fn with_reliability(reliability: f64) -> io::Result<Self> {
        let hub = Self::new();
        hub.set_reliability(reliability)?;
        Ok(hub)
    }

    /// Changes the probability that a frame is delivered.
    pub fn set_reliability(&self, reliability: f64) -> io::Result<()> {
        check_reliability(reliability)?;
        self.lock().reliability = reliability;
        Ok(())
    }

    /// Attaches a new node with the given address.
    pub fn attach(&self, addr: LinkAddr) -> io::Result<HubLink> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(&addr) {
            return Err(Error::new(
                ErrorKind::AddrInUse,
                format!("link address {} is already attached", addr),
            ));
        }

        let (tx, rx) = mpsc::unbounded();
        inner.nodes.insert(addr, tx);

        Ok(HubLink {
            addr,
            hub: self.clone(),
            recv: rx,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("hub lock poisoned")
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for HubLink {
    fn local_addr(&self) -> LinkAddr {
        self.addr
    }

    fn poll_send_to(&mut self, frame: &[u8], dst: LinkAddr) -> Poll<(), Error> {
        let inner = self.hub.lock();

        if !survives(inner.reliability) {
            trace!("dropping frame {} -> {} on the floor", self.addr, dst);
            return Ok(Async::Ready(()));
        }

        // Frames to absent nodes vanish, just like on a real segment
        if let Some(tx) = inner.nodes.get(&dst) {
            let _ = tx.unbounded_send((self.addr, Bytes::from(frame)));
        }

        Ok(Async::Ready(()))
    }

    fn poll_recv_from(&mut self, buf: &mut [u8]) -> Poll<(usize, LinkAddr), Error> {
        match self.recv.poll() {
            Ok(Async::Ready(Some((src, frame)))) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);

                Ok(Async::Ready((len, src)))
            }
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Ok(Async::Ready(None)) | Err(_) => {
                Err(Error::new(ErrorKind::BrokenPipe, "hub has gone away"))
            }
        }
    }
}

impl Drop for HubLink {
    fn drop(&mut self) {
        self.hub.lock().nodes.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;

    #[test]
    fn delivers_between_nodes() {
        let hub = Hub::new();
        let mut a = hub.attach(LinkAddr(1)).unwrap();
        let mut b = hub.attach(LinkAddr(2)).unwrap();

        let res = future::lazy(move || {
            assert!(a.poll_send_to(b"ping", LinkAddr(2)).unwrap().is_ready());

            let mut buf = [0; 16];
            match b.poll_recv_from(&mut buf) {
                Ok(Async::Ready((len, src))) => {
                    assert_eq!(src, LinkAddr(1));
                    assert_eq!(&buf[..len], b"ping");
                }
                other => panic!("unexpected poll result: {:?}", other),
            }

            assert!(b.poll_recv_from(&mut buf).unwrap().is_not_ready());
            Ok::<_, ()>(())
        })
        .wait();

        assert!(res.is_ok());
    }

    #[test]
    fn double_attach() {
        let hub = Hub::new();
        let _a = hub.attach(LinkAddr(1)).unwrap();

        assert_eq!(
            hub.attach(LinkAddr(1)).unwrap_err().kind(),
            ErrorKind::AddrInUse,
        );
    }

    #[test]
    fn detach_on_drop() {
        let hub = Hub::new();
        drop(hub.attach(LinkAddr(1)).unwrap());

        assert!(hub.attach(LinkAddr(1)).is_ok());
    }
}
