//! Glue between the protocol automaton and the node.
//!
//! The state of a connection lives behind a mutex shared by the user-facing
//! handle (a future or a stream) and a background task that is spawned onto
//! the runtime. The handle feeds application events into the automaton, the
//! task feeds inbound datagrams and timer expirations into it and carries out
//! the resulting transmissions.

use crate::{
    datagram::Datagram,
    error::Error,
    node::{Node, Transmit, DRIVER_AWAY},
    ports::BoundPort,
    state::{Control, Effect, Event},
    timer::RetransmitTimer,
};
use futures::{
    prelude::*,
    task::{self, Task},
    try_ready,
};
use log::{debug, trace};
use std::{
    collections::VecDeque,
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    io::{self, ErrorKind},
    sync::{Arc, Mutex, MutexGuard},
};

/// A handle to the shared state of a connection.
#[derive(Clone, Debug)]
pub(crate) struct Connection {
    shared: Arc<Mutex<Shared>>,
}

/// A failure below the protocol, reported to every handle of the connection.
///
/// The original error stays reachable through `source`.
#[derive(Debug)]
struct SharedFailure(Arc<io::Error>);

/// Pending changes to the retransmission deadline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TimerCmd {
    Start,
    Stop,
}

#[derive(Debug)]
pub(crate) struct Shared {
    /// The protocol automaton.
    pub control: Control,

    /// Set once the background task has stopped and released the port.
    pub finished: bool,

    /// A failure below the protocol, e.g. of the link.
    failure: Option<Arc<io::Error>>,

    /// Datagrams produced by the automaton that still need to be sent.
    outbox: VecDeque<Datagram>,

    /// The latest timer effect the task hasn't applied yet.
    timer: Option<TimerCmd>,

    /// The background task.
    task: Option<Task>,

    /// Tasks of the user-facing handles waiting for a change.
    waiters: Vec<Task>,
}

/// The background task of a single connection.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct ConnectionTask {
    conn: Connection,
    node: Node,

    /// The connection's port. Dropped, and thus released, on termination.
    port: Option<BoundPort>,

    /// The transmission currently in progress.
    sending: Option<Transmit>,

    timer: RetransmitTimer,
}

impl Connection {
    pub fn new(control: Control) -> Self {
        let shared = Shared {
            control,
            finished: false,
            failure: None,
            outbox: VecDeque::new(),
            timer: None,
            task: None,
            waiters: Vec::new(),
        };

        Self {
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("connection lock poisoned")
    }

    /// Starts the background task working on the given port.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn(&self, port: BoundPort) {
        let node = port.node().clone();
        let task = ConnectionTask {
            conn: self.clone(),
            timer: RetransmitTimer::new(node.config().retransmit_interval),
            node,
            port: Some(port),
            sending: None,
        };

        tokio::spawn(task);
    }
}

impl Shared {
    /// Feeds an event into the automaton and schedules its effects.
    pub fn handle(&mut self, event: Event) {
        for effect in self.control.transition(event) {
            match effect {
                Effect::Transmit(dgram) => self.outbox.push_back(dgram),
                Effect::StartTimer => self.timer = Some(TimerCmd::Start),
                Effect::StopTimer => self.timer = Some(TimerCmd::Stop),
            }
        }

        self.notify_all();
    }

    /// Returns the failure that ended the connection, if any.
    ///
    /// Protocol errors are reported as themselves, anything else is wrapped
    /// into a [`SharedFailure`].
    pub fn check(&self) -> io::Result<()> {
        let failure = match self.failure {
            Some(ref failure) => failure,
            None => return Ok(()),
        };

        match failure.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            Some(e) => Err(e.clone().into()),
            None => Err(io::Error::new(
                failure.kind(),
                SharedFailure(failure.clone()),
            )),
        }
    }

    /// Registers the current task to be woken on the next change.
    pub fn park(&mut self) {
        if !self.waiters.iter().any(Task::will_notify_current) {
            self.waiters.push(task::current());
        }
    }

    fn notify_all(&mut self) {
        if let Some(ref task) = self.task {
            task.notify();
        }
        for waiter in self.waiters.drain(..) {
            waiter.notify();
        }
    }
}

impl Display for SharedFailure {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        Display::fmt(&*self.0, fmt)
    }
}

impl StdError for SharedFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.0)
    }
}

impl ConnectionTask {
    /// Takes the next inbound datagram and feeds it into the automaton.
    fn poll_inbound(&mut self) -> Poll<(), io::Error> {
        let port = self.port.as_mut().expect("polled after termination");

        match port.poll() {
            Ok(Async::Ready(Some(dgram))) => {
                trace!("connection on port {} got {}", port.port(), dgram);
                self.conn.lock().handle(Event::Inbound(&dgram));

                Ok(Async::Ready(()))
            }
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Ok(Async::Ready(None)) | Err(_) => {
                Err(io::Error::new(ErrorKind::Other, DRIVER_AWAY))
            }
        }
    }

    /// Feeds an elapsed retransmission deadline into the automaton.
    fn poll_timer(&mut self) -> Poll<(), io::Error> {
        try_ready!(self.timer.poll_expired());
        self.conn.lock().handle(Event::Timer);

        Ok(Async::Ready(()))
    }

    fn poll_events(&mut self) -> io::Result<(Async<()>, Async<()>)> {
        let inbound = self.poll_inbound()?;
        let fired = self.poll_timer()?;

        Ok((inbound, fired))
    }

    /// Applies the latest timer effect. Returns whether there was one.
    fn apply_timer(&mut self) -> bool {
        let cmd = self.conn.lock().timer.take();

        match cmd {
            Some(TimerCmd::Start) => {
                if self.timer.is_armed() {
                    trace!("rearming retransmission timer");
                }
                self.timer.start();
                true
            }
            Some(TimerCmd::Stop) => {
                self.timer.stop();
                true
            }
            None => false,
        }
    }

    /// Sends the scheduled datagrams, one at a time.
    fn poll_outbox(&mut self) -> Poll<(), io::Error> {
        loop {
            if let Some(ref mut sending) = self.sending {
                try_ready!(sending.poll());
            }

            let next = self.conn.lock().outbox.pop_front();
            match next {
                Some(dgram) => self.sending = Some(self.node.send(&dgram)),
                None => {
                    self.sending = None;
                    return Ok(Async::Ready(()));
                }
            }
        }
    }

    /// Releases the port and wakes up everyone still interested.
    fn finish(&mut self, failure: Option<io::Error>) {
        if let Some(port) = self.port.take() {
            debug!("connection on port {} terminated", port.port());
        }

        let mut shared = self.conn.lock();
        if failure.is_some() {
            shared.failure = failure.map(Arc::new);
        }
        shared.finished = true;
        shared.task = None;
        shared.notify_all();
    }
}

impl Future for ConnectionTask {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        // Every change made by the user-facing handle from here on wakes us up
        self.conn.lock().task = Some(task::current());

        loop {
            let (inbound, fired) = match self.poll_events() {
                Ok(polled) => polled,
                Err(e) => {
                    self.finish(Some(e));
                    return Ok(Async::Ready(()));
                }
            };

            let rearmed = self.apply_timer();

            let flushed = match self.poll_outbox() {
                Ok(flushed) => flushed,
                Err(e) => {
                    self.finish(Some(e));
                    return Ok(Async::Ready(()));
                }
            };

            if flushed.is_ready() && self.conn.lock().control.is_terminated() {
                self.finish(None);
                return Ok(Async::Ready(()));
            }

            if inbound.is_not_ready() && fired.is_not_ready() && !rearmed {
                return Ok(Async::NotReady);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, datagram::FramingError, link::LinkAddr};

    fn failed(failure: io::Error) -> Connection {
        let conn = Connection::new(Control::listening((LinkAddr(1), 80), &Config::default()));
        conn.lock().failure = Some(Arc::new(failure));
        conn
    }

    #[test]
    fn no_failure() {
        let conn = Connection::new(Control::listening((LinkAddr(1), 80), &Config::default()));
        assert!(conn.lock().check().is_ok());
    }

    #[test]
    fn protocol_errors_survive() {
        let conn = failed(Error::Framing(FramingError::PayloadTooLarge(99)).into());

        let err = conn.lock().check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(
            err.get_ref().and_then(|e| e.downcast_ref::<Error>()),
            Some(&Error::Framing(FramingError::PayloadTooLarge(99))),
        );
    }

    #[test]
    fn link_errors_keep_their_source() {
        let conn = failed(io::Error::new(ErrorKind::PermissionDenied, "link is down"));

        // Every handle sees the same failure
        for _ in 0..2 {
            let err = conn.lock().check().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PermissionDenied);
            assert_eq!(err.to_string(), "link is down");

            let source = err
                .get_ref()
                .and_then(|e| e.source())
                .and_then(|e| e.downcast_ref::<io::Error>())
                .expect("missing source");
            assert_eq!(source.kind(), ErrorKind::PermissionDenied);
        }
    }
}
