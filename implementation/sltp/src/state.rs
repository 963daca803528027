//! The protocol automaton of a single connection.
//!
//! The automaton is pure: it never touches the network or a clock itself.
//! Every event fed into [`Control::transition`] mutates the control block and
//! yields the effects (datagrams to transmit, timer changes) the caller has to
//! carry out.

use crate::{
    config::Config,
    datagram::{Datagram, Flags, Kind, Port},
    error::{Error, Violation},
    link::LinkAddr,
};
use bytes::Bytes;
use log::{debug, trace, warn};
use std::collections::VecDeque;

/// The sequence number of the connecting side's SYN.
pub(crate) const INITIAL_SEQ: u32 = 0;

/// States of the protocol automaton.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum State {
    /// No connection exists.
    ///
    /// This is the start state for both sides, and the final state once a
    /// connection has been torn down.
    Closed,

    /// The SYN has been sent and we're waiting for the SYN+ACK.
    SynSent,

    /// A SYN has been received and waits for the application to accept it.
    SynRcvd,

    /// The connection is open and data can flow in both directions.
    Established,

    /// We asked the peer to stop sending and wait for our own outstanding
    /// data to be acknowledged before sending the FIN.
    StpSent,

    /// The peer asked us to stop sending. Its remaining data can still be read.
    StpRcvd,

    /// A FIN has been sent and we're waiting for the FIN+ACK.
    Closing,

    /// Both sides opened the connection at the same time.
    ///
    /// There is no way out of this state.
    Deadlock,
}

/// Everything that can happen to a connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Event<'a> {
    /// The application actively opens the connection.
    Connect,

    /// The application accepts a received SYN.
    Accept,

    /// The application closes the connection or abandons opening it.
    Close,

    /// The retransmission deadline has elapsed.
    Timer,

    /// The application hands over the next segment's payload.
    Send(Bytes),

    /// A datagram arrived at the connection's port.
    Inbound(&'a Datagram),
}

/// The side effects of a transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Effect {
    /// Put the datagram on the link.
    Transmit(Datagram),

    /// (Re)arm the retransmission deadline.
    StartTimer,

    /// Disarm the retransmission deadline.
    StopTimer,
}

/// The control block of a single connection.
#[derive(Clone, Debug)]
pub(crate) struct Control {
    /// The protocol state.
    state: State,

    /// Whether the connection has run its course.
    ///
    /// `Closed` alone is ambiguous: it is also the state of a connection that
    /// hasn't been opened yet.
    done: bool,

    /// Why the connection failed, if it did.
    error: Option<Error>,

    /// The local link address and port.
    local: (LinkAddr, Port),

    /// The peer, once known.
    remote: Option<(LinkAddr, Port)>,

    /// The sequence number of the SYN that opened the connection.
    syn_seq: u32,

    /// The sequence number of the next (or currently unacknowledged) data
    /// segment we send.
    send_seq: u32,

    /// The sequence number of the next data segment we expect.
    recv_seq: u32,

    /// The data segment in flight, if any.
    unacked: Option<Datagram>,

    /// The segment resent when the retransmission deadline elapses.
    retransmit: Option<Datagram>,

    /// Our last handshake datagram, resent when the peer repeats its own.
    handshake_reply: Option<Datagram>,

    /// Received payloads the application hasn't read yet.
    recv_buf: VecDeque<Bytes>,

    /// The amount of segments `recv_buf` may hold.
    recv_window: usize,

    /// The configured amount of FIN retransmissions.
    fin_retries: u32,

    /// The FIN retransmissions left before giving up.
    fin_budget: u32,
}

impl State {
    /// Whether the handshake has completed at some point.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Established | State::StpSent | State::StpRcvd | State::Closing => true,
            _ => false,
        }
    }
}

impl Control {
    /// Creates the control block of a connection that will be opened actively.
    pub fn connecting(
        local: (LinkAddr, Port),
        remote: (LinkAddr, Port),
        config: &Config,
    ) -> Self {
        let mut ctl = Self::listening(local, config);
        ctl.remote = Some(remote);
        ctl
    }

    /// Creates the control block of a connection waiting for a peer's SYN.
    pub fn listening(local: (LinkAddr, Port), config: &Config) -> Self {
        Self {
            state: State::Closed,
            done: false,
            error: None,
            local,
            remote: None,
            syn_seq: INITIAL_SEQ,
            send_seq: 0,
            recv_seq: 0,
            unacked: None,
            retransmit: None,
            handshake_reply: None,
            recv_buf: VecDeque::new(),
            recv_window: config.recv_window,
            fin_retries: config.fin_retries,
            fin_budget: config.fin_retries,
        }
    }

    /// The current protocol state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The error that terminated the connection, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The local link address and port.
    pub fn local(&self) -> (LinkAddr, Port) {
        self.local
    }

    /// The peer's link address and port, once known.
    pub fn remote(&self) -> Option<(LinkAddr, Port)> {
        self.remote
    }

    /// The sequence number of the next data segment to be sent.
    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    /// The sequence number of the next data segment expected from the peer.
    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }

    /// The amount of bytes received but not yet read.
    pub fn buffered(&self) -> usize {
        self.recv_buf.iter().map(Bytes::len).sum()
    }

    /// Whether the connection is over and nothing will change anymore.
    pub fn is_terminated(&self) -> bool {
        self.done || self.state == State::Deadlock
    }

    /// Whether the application may hand over the next segment.
    ///
    /// Returns `Ok(false)` while a segment is still unacknowledged.
    pub fn writable(&self) -> Result<bool, Error> {
        match self.state {
            State::Established => Ok(self.unacked.is_none()),
            State::SynSent | State::SynRcvd => Err(Error::NotConnected),
            State::Deadlock => Err(self.failure()),
            State::Closed if !self.done => Err(Error::NotConnected),
            _ => Err(Error::Closed),
        }
    }

    /// Whether all data handed over so far has been acknowledged.
    pub fn flushed(&self) -> Result<bool, Error> {
        match self.state {
            State::Deadlock => Err(self.failure()),
            _ => Ok(self.unacked.is_none()),
        }
    }

    /// Moves buffered data into `buf`.
    ///
    /// Returns `Ok(None)` when no data is buffered but more may arrive and
    /// `Ok(Some(0))` once the connection is closed and drained.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        if buf.is_empty() {
            return Ok(Some(0));
        }

        let mut nread = 0;
        while nread < buf.len() {
            let segment = match self.recv_buf.front_mut() {
                Some(segment) => segment,
                None => break,
            };

            let len = segment.len().min(buf.len() - nread);
            buf[nread..nread + len].copy_from_slice(&segment[..len]);
            *segment = segment.slice_from(len);
            nread += len;

            if segment.is_empty() {
                self.recv_buf.pop_front();
            }
        }

        if nread > 0 {
            return Ok(Some(nread));
        }

        match self.state {
            State::Deadlock => Err(self.failure()),
            State::Closed if self.done => Ok(Some(0)),
            _ => Ok(None),
        }
    }

    /// Feeds an event into the automaton.
    pub fn transition(&mut self, event: Event) -> Vec<Effect> {
        let mut fx = Vec::new();

        match (self.state, event) {
            (State::Closed, Event::Connect) if !self.done => match self.remote {
                Some(_) => {
                    self.syn_seq = INITIAL_SEQ;
                    let syn = self.segment(Flags::SYN, self.syn_seq);
                    self.track(syn, &mut fx);
                    self.state = State::SynSent;
                }
                None => warn!("cannot connect without a remote endpoint"),
            },

            (State::SynRcvd, Event::Accept) => {
                let reply = self.segment(Flags::SYN | Flags::ACK, self.syn_seq.wrapping_add(1));
                fx.push(Effect::Transmit(reply.clone()));
                self.handshake_reply = Some(reply);
                self.state = State::Established;
            }

            (State::Closed, Event::Close) => self.done = true,
            (State::SynSent, Event::Close) | (State::SynRcvd, Event::Close) => {
                self.untrack(&mut fx);
                self.finish();
            }
            (State::Established, Event::Close) => {
                if self.unacked.is_some() {
                    // The outstanding segment keeps being retransmitted
                    let stp = self.segment(Flags::STP, self.send_seq.wrapping_add(1));
                    fx.push(Effect::Transmit(stp));
                    self.state = State::StpSent;
                } else {
                    self.begin_fin(&mut fx);
                }
            }
            (State::StpRcvd, Event::Close) => self.begin_fin(&mut fx),

            (_, Event::Timer) => self.on_timer(&mut fx),

            (State::Established, Event::Send(payload)) => {
                if self.unacked.is_some() {
                    warn!("refusing write while segment {} is in flight", self.send_seq);
                } else {
                    let data = self.segment_with(Flags::empty(), self.send_seq, payload);
                    self.unacked = Some(data.clone());
                    self.track(data, &mut fx);
                }
            }

            (_, Event::Inbound(dgram)) => self.on_datagram(dgram, &mut fx),

            (state, event) => debug!("ignoring {:?} in state {:?}", event, state),
        }

        fx
    }

    fn on_timer(&mut self, fx: &mut Vec<Effect>) {
        let segment = match self.retransmit {
            Some(ref segment) => segment.clone(),
            None => return,
        };

        if self.state == State::Closing {
            if self.fin_budget == 0 {
                debug!("peer never acknowledged our FIN, giving up");
                self.untrack(fx);
                self.finish();
                return;
            }

            self.fin_budget -= 1;
        }

        trace!("retransmitting {}", segment);
        fx.push(Effect::Transmit(segment));
        fx.push(Effect::StartTimer);
    }

    fn on_datagram(&mut self, dgram: &Datagram, fx: &mut Vec<Effect>) {
        if let Some(remote) = self.remote {
            if dgram.source() != remote {
                trace!("ignoring {} from foreign peer", dgram);
                return;
            }
        }

        match (self.state, dgram.kind()) {
            (State::Closed, Kind::Syn) if self.remote.is_none() && !self.done => {
                self.remote = Some(dgram.source());
                self.syn_seq = dgram.seq();
                self.state = State::SynRcvd;
            }
            (State::Closed, Kind::Fin) => {
                let reply = Datagram::control(
                    dgram.source(),
                    self.local,
                    Flags::FIN | Flags::ACK,
                    dgram.seq(),
                );
                fx.push(Effect::Transmit(reply));
            }

            (State::SynSent, Kind::SynAck) if dgram.seq() == self.syn_seq.wrapping_add(1) => {
                let ack = self.segment(Flags::ACK, dgram.seq().wrapping_add(1));
                fx.push(Effect::Transmit(ack.clone()));
                self.handshake_reply = Some(ack);
                self.untrack(fx);
                self.state = State::Established;
            }
            (State::SynSent, Kind::Syn) => {
                warn!("simultaneous open on port {}", self.local.1);
                self.untrack(fx);
                self.error = Some(Error::ProtocolViolation(Violation::SimultaneousOpen));
                self.state = State::Deadlock;
            }

            // The peer lost our handshake reply and repeats its own segment
            (state, kind @ Kind::Syn) | (state, kind @ Kind::SynAck)
                if state.is_synchronized() =>
            {
                let expected = if kind == Kind::Syn { Kind::SynAck } else { Kind::Ack };
                if let Some(ref reply) = self.handshake_reply {
                    if reply.kind() == expected {
                        fx.push(Effect::Transmit(reply.clone()));
                    }
                }
            }

            (State::Established, Kind::Data)
            | (State::StpSent, Kind::Data)
            | (State::StpRcvd, Kind::Data) => self.on_data(dgram, fx),

            (State::Established, Kind::Ack) | (State::StpSent, Kind::Ack) => {
                self.on_ack(dgram, fx)
            }

            (State::Established, Kind::Stp) => {
                // The peer won't listen anymore, there's no point in retransmitting
                self.unacked = None;
                self.untrack(fx);
                self.state = State::StpRcvd;
            }
            (State::StpSent, Kind::Stp) => {
                self.unacked = None;
                self.begin_fin(fx);
            }

            (State::Established, Kind::Fin)
            | (State::StpSent, Kind::Fin)
            | (State::StpRcvd, Kind::Fin)
            | (State::Closing, Kind::Fin) => {
                let reply = self.segment(Flags::FIN | Flags::ACK, dgram.seq());
                fx.push(Effect::Transmit(reply));
                self.unacked = None;
                self.untrack(fx);
                self.finish();
            }

            (State::Closing, Kind::FinAck) => {
                self.untrack(fx);
                self.finish();
            }
            (State::Closing, Kind::Data) | (State::Closing, Kind::Stp) => {
                if let Some(ref fin) = self.retransmit {
                    fx.push(Effect::Transmit(fin.clone()));
                }
            }

            (state, kind) => trace!("ignoring {:?} in state {:?}", kind, state),
        }
    }

    fn on_data(&mut self, dgram: &Datagram, fx: &mut Vec<Effect>) {
        let seq = dgram.seq();

        if seq == self.recv_seq {
            if self.recv_buf.len() >= self.recv_window {
                trace!("receive window full, dropping segment {}", seq);
                return;
            }

            if !dgram.payload.is_empty() {
                self.recv_buf.push_back(dgram.payload.clone());
            }
            self.recv_seq = self.recv_seq.wrapping_add(1);
        } else if seq.wrapping_add(1) != self.recv_seq {
            trace!("dropping out-of-order segment {}, expected {}", seq, self.recv_seq);
            return;
        }

        // Duplicates are acknowledged again since our first ACK may have been lost
        let ack = self.segment(Flags::ACK, seq);
        fx.push(Effect::Transmit(ack));
    }

    fn on_ack(&mut self, dgram: &Datagram, fx: &mut Vec<Effect>) {
        let acked = match self.unacked {
            Some(ref data) => data.seq() == dgram.seq(),
            None => false,
        };
        if !acked {
            trace!("ignoring stale ACK {}", dgram.seq());
            return;
        }

        self.unacked = None;
        self.send_seq = self.send_seq.wrapping_add(1);
        self.untrack(fx);

        if self.state == State::StpSent {
            self.begin_fin(fx);
        }
    }

    fn begin_fin(&mut self, fx: &mut Vec<Effect>) {
        let fin = self.segment(Flags::FIN, self.send_seq);
        self.fin_budget = self.fin_retries;
        self.track(fin, fx);
        self.state = State::Closing;
    }

    fn finish(&mut self) {
        self.state = State::Closed;
        self.done = true;
    }

    /// Transmits a segment and keeps retransmitting it until untracked.
    fn track(&mut self, segment: Datagram, fx: &mut Vec<Effect>) {
        fx.push(Effect::Transmit(segment.clone()));
        fx.push(Effect::StartTimer);
        self.retransmit = Some(segment);
    }

    fn untrack(&mut self, fx: &mut Vec<Effect>) {
        if self.retransmit.take().is_some() {
            fx.push(Effect::StopTimer);
        }
    }

    fn failure(&self) -> Error {
        self.error
            .clone()
            .unwrap_or(Error::ProtocolViolation(Violation::SimultaneousOpen))
    }

    fn segment(&self, flags: Flags, seq: u32) -> Datagram {
        self.segment_with(flags, seq, Bytes::new())
    }

    fn segment_with(&self, flags: Flags, seq: u32, payload: Bytes) -> Datagram {
        // Every path producing segments runs after the remote is known
        let remote = self.remote.expect("no remote endpoint");
        Datagram::with_payload(remote, self.local, flags, seq, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: (LinkAddr, Port) = (LinkAddr(1), 50);
    const B: (LinkAddr, Port) = (LinkAddr(2), 80);

    fn transmitted(fx: &[Effect]) -> Vec<Datagram> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Transmit(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    fn single(fx: &[Effect]) -> Datagram {
        let mut sent = transmitted(fx);
        assert_eq!(sent.len(), 1, "expected exactly one datagram in {:?}", fx);
        sent.remove(0)
    }

    fn pair() -> (Control, Control) {
        let config = Config::default();
        (
            Control::connecting(A, B, &config),
            Control::listening(B, &config),
        )
    }

    fn established() -> (Control, Control) {
        let (mut a, mut b) = pair();

        let syn = single(&a.transition(Event::Connect));
        b.transition(Event::Inbound(&syn));
        let synack = single(&b.transition(Event::Accept));
        let ack = single(&a.transition(Event::Inbound(&synack)));
        assert!(b.transition(Event::Inbound(&ack)).is_empty());

        (a, b)
    }

    #[test]
    fn handshake() {
        let (mut a, mut b) = pair();

        let fx = a.transition(Event::Connect);
        assert!(fx.contains(&Effect::StartTimer));
        let syn = single(&fx);
        assert_eq!(syn.header, crate::datagram::Header::new(80, 50, Flags::SYN, 0));
        assert_eq!(a.state(), State::SynSent);

        assert!(b.transition(Event::Inbound(&syn)).is_empty());
        assert_eq!(b.state(), State::SynRcvd);
        assert_eq!(b.remote(), Some(A));

        let synack = single(&b.transition(Event::Accept));
        assert_eq!(
            synack.header,
            crate::datagram::Header::new(50, 80, Flags::SYN | Flags::ACK, 1),
        );
        assert_eq!(b.state(), State::Established);

        let fx = a.transition(Event::Inbound(&synack));
        assert!(fx.contains(&Effect::StopTimer));
        let ack = single(&fx);
        assert_eq!(ack.header, crate::datagram::Header::new(80, 50, Flags::ACK, 2));
        assert_eq!(a.state(), State::Established);

        assert_eq!(a.send_seq(), b.recv_seq());
        assert_eq!(b.send_seq(), a.recv_seq());
    }

    #[test]
    fn syn_retransmission() {
        let (mut a, _) = pair();
        let syn = single(&a.transition(Event::Connect));

        for _ in 0..5 {
            let fx = a.transition(Event::Timer);
            assert_eq!(single(&fx), syn);
            assert!(fx.contains(&Effect::StartTimer));
        }
        assert_eq!(a.state(), State::SynSent);
    }

    #[test]
    fn lost_synack_is_repeated() {
        let (mut a, mut b) = pair();

        let syn = single(&a.transition(Event::Connect));
        b.transition(Event::Inbound(&syn));
        let synack = single(&b.transition(Event::Accept));

        // The SYN+ACK got lost, so A's timer fires and B sees the SYN again
        let again = single(&a.transition(Event::Timer));
        assert_eq!(single(&b.transition(Event::Inbound(&again))), synack);

        // Now B's ACK got lost
        let ack = single(&a.transition(Event::Inbound(&synack)));
        assert_eq!(single(&a.transition(Event::Inbound(&synack))), ack);
    }

    #[test]
    fn simultaneous_open() {
        let config = Config::default();
        let mut a = Control::connecting(A, B, &config);
        let mut b = Control::connecting(B, A, &config);

        let syn_a = single(&a.transition(Event::Connect));
        let _syn_b = single(&b.transition(Event::Connect));

        let fx = b.transition(Event::Inbound(&syn_a));
        assert!(transmitted(&fx).is_empty());
        assert_eq!(b.state(), State::Deadlock);
        assert!(b.is_terminated());
        assert_eq!(
            b.error(),
            Some(&Error::ProtocolViolation(Violation::SimultaneousOpen)),
        );

        // Nothing gets us out again
        assert!(b.transition(Event::Timer).is_empty());
        assert_eq!(b.state(), State::Deadlock);
        assert!(b.writable().is_err());
    }

    #[test]
    fn unexpected_ack_in_syn_sent() {
        let (mut a, _) = pair();
        a.transition(Event::Connect);

        let ack = Datagram::control(A, B, Flags::ACK, 1);
        assert!(a.transition(Event::Inbound(&ack)).is_empty());
        assert_eq!(a.state(), State::SynSent);
    }

    #[test]
    fn data_transfer() {
        let (mut a, mut b) = established();
        assert_eq!(a.writable(), Ok(true));

        let data = single(&a.transition(Event::Send(Bytes::from(&b"hello"[..]))));
        assert_eq!(data.header.flags, Flags::empty());
        assert_eq!(data.seq(), 0);
        assert_eq!(a.writable(), Ok(false));
        assert_eq!(a.flushed(), Ok(false));

        let ack = single(&b.transition(Event::Inbound(&data)));
        assert_eq!(ack.header.flags, Flags::ACK);
        assert_eq!(ack.seq(), 0);
        assert_eq!(b.recv_seq(), 1);

        // A duplicate is acknowledged, but not delivered twice
        assert_eq!(single(&b.transition(Event::Inbound(&data))), ack);
        assert_eq!(b.buffered(), 5);

        let fx = a.transition(Event::Inbound(&ack));
        assert_eq!(fx, vec![Effect::StopTimer]);
        assert_eq!(a.send_seq(), 1);
        assert_eq!(a.writable(), Ok(true));

        let mut buf = [0; 3];
        assert_eq!(b.read(&mut buf), Ok(Some(3)));
        assert_eq!(&buf, b"hel");
        assert_eq!(b.read(&mut buf), Ok(Some(2)));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(b.read(&mut buf), Ok(None));
    }

    #[test]
    fn stale_ack_is_ignored() {
        let (mut a, _) = established();
        a.transition(Event::Send(Bytes::from(&b"x"[..])));

        let stale = Datagram::control(A, B, Flags::ACK, 7);
        assert!(a.transition(Event::Inbound(&stale)).is_empty());
        assert_eq!(a.writable(), Ok(false));
    }

    #[test]
    fn write_waits_for_ack() {
        let (mut a, _) = established();
        let first = single(&a.transition(Event::Send(Bytes::from(&b"first"[..]))));

        assert_eq!(a.writable(), Ok(false));
        assert!(a.transition(Event::Send(Bytes::from(&b"second"[..]))).is_empty());
        assert_eq!(a.send_seq(), 0);

        // The retransmission still carries the first payload
        assert_eq!(single(&a.transition(Event::Timer)), first);
    }

    #[test]
    fn data_retransmission() {
        let (mut a, _) = established();
        let data = single(&a.transition(Event::Send(Bytes::from(&b"x"[..]))));

        assert_eq!(single(&a.transition(Event::Timer)), data);
        assert_eq!(single(&a.transition(Event::Timer)), data);
    }

    #[test]
    fn foreign_peer_is_ignored() {
        let (mut a, _) = established();

        let intruder = Datagram::control(A, (LinkAddr(3), 80), Flags::FIN, 0);
        assert!(a.transition(Event::Inbound(&intruder)).is_empty());
        assert_eq!(a.state(), State::Established);
    }

    #[test]
    fn receive_window() {
        let config = Config {
            recv_window: 1,
            ..Config::default()
        };
        let mut b = Control::listening(B, &config);
        b.transition(Event::Inbound(&Datagram::control(B, A, Flags::SYN, 0)));
        b.transition(Event::Accept);

        let first = Datagram::with_payload(B, A, Flags::empty(), 0, Bytes::from(&b"a"[..]));
        let second = Datagram::with_payload(B, A, Flags::empty(), 1, Bytes::from(&b"b"[..]));

        single(&b.transition(Event::Inbound(&first)));
        assert!(b.transition(Event::Inbound(&second)).is_empty());
        assert_eq!(b.recv_seq(), 1);

        let mut buf = [0; 8];
        assert_eq!(b.read(&mut buf), Ok(Some(1)));
        assert_eq!(single(&b.transition(Event::Inbound(&second))).seq(), 1);
    }

    #[test]
    fn close_without_pending_data() {
        let (mut a, mut b) = established();

        let fin = single(&a.transition(Event::Close));
        assert_eq!(fin.header.flags, Flags::FIN);
        assert_eq!(a.state(), State::Closing);
        assert_eq!(a.writable(), Err(Error::Closed));

        let finack = single(&b.transition(Event::Inbound(&fin)));
        assert_eq!(finack.header.flags, Flags::FIN | Flags::ACK);
        assert_eq!(b.state(), State::Closed);
        assert!(b.is_terminated());

        a.transition(Event::Inbound(&finack));
        assert_eq!(a.state(), State::Closed);
        assert!(a.is_terminated());
    }

    #[test]
    fn close_with_pending_data() {
        let (mut a, mut b) = established();

        let data = single(&a.transition(Event::Send(Bytes::from(&b"tail"[..]))));
        let stp = single(&a.transition(Event::Close));
        assert_eq!(stp.header.flags, Flags::STP);
        assert_eq!(a.state(), State::StpSent);

        // The segment in flight is still retransmitted
        assert_eq!(single(&a.transition(Event::Timer)), data);

        b.transition(Event::Inbound(&stp));
        assert_eq!(b.state(), State::StpRcvd);
        assert_eq!(b.writable(), Err(Error::Closed));

        let ack = single(&b.transition(Event::Inbound(&data)));
        let fin = single(&a.transition(Event::Inbound(&ack)));
        assert_eq!(fin.header.flags, Flags::FIN);
        assert_eq!(a.state(), State::Closing);

        let finack = single(&b.transition(Event::Inbound(&fin)));
        a.transition(Event::Inbound(&finack));
        assert!(a.is_terminated());

        let mut buf = [0; 8];
        assert_eq!(b.read(&mut buf), Ok(Some(4)));
        assert_eq!(b.read(&mut buf), Ok(Some(0)));
    }

    #[test]
    fn stp_clears_send_window() {
        let (mut a, _) = established();
        a.transition(Event::Send(Bytes::from(&b"lost"[..])));

        let stp = Datagram::control(A, B, Flags::STP, 0);
        let fx = a.transition(Event::Inbound(&stp));
        assert_eq!(fx, vec![Effect::StopTimer]);
        assert_eq!(a.state(), State::StpRcvd);
        assert_eq!(a.flushed(), Ok(true));
        assert!(a.transition(Event::Timer).is_empty());

        assert_eq!(single(&a.transition(Event::Close)).header.flags, Flags::FIN);
    }

    #[test]
    fn crossing_stps() {
        let (mut a, mut b) = established();
        a.transition(Event::Send(Bytes::from(&b"a"[..])));
        b.transition(Event::Send(Bytes::from(&b"b"[..])));

        let stp_a = single(&a.transition(Event::Close));
        single(&b.transition(Event::Close));

        let fin = single(&b.transition(Event::Inbound(&stp_a)));
        assert_eq!(fin.header.flags, Flags::FIN);
        assert_eq!(b.state(), State::Closing);

        // Data and STP arriving while closing are answered with the FIN
        assert_eq!(single(&b.transition(Event::Inbound(&stp_a))), fin);
    }

    #[test]
    fn fin_retries_are_bounded() {
        let config = Config {
            fin_retries: 2,
            ..Config::default()
        };
        let mut a = Control::connecting(A, B, &config);
        a.transition(Event::Connect);
        a.transition(Event::Inbound(&Datagram::control(A, B, Flags::SYN | Flags::ACK, 1)));

        let fin = single(&a.transition(Event::Close));
        assert_eq!(single(&a.transition(Event::Timer)), fin);
        assert_eq!(single(&a.transition(Event::Timer)), fin);

        assert_eq!(a.transition(Event::Timer), vec![Effect::StopTimer]);
        assert_eq!(a.state(), State::Closed);
        assert!(a.is_terminated());
    }

    #[test]
    fn fin_in_closed_is_answered() {
        let (_, mut b) = pair();

        let fin = Datagram::control(B, A, Flags::FIN, 4);
        let reply = single(&b.transition(Event::Inbound(&fin)));
        assert_eq!(reply.header, crate::datagram::Header::new(50, 80, Flags::FIN | Flags::ACK, 4));
        assert_eq!((reply.dst, reply.src), (A.0, B.0));
        assert_eq!(b.state(), State::Closed);
    }

    #[test]
    fn peer_fin_ends_connection() {
        let (mut a, mut b) = established();

        let data = single(&a.transition(Event::Send(Bytes::from(&b"bye"[..]))));
        single(&b.transition(Event::Inbound(&data)));

        let fin = Datagram::control(B, A, Flags::FIN, 0);
        single(&b.transition(Event::Inbound(&fin)));
        assert!(b.is_terminated());

        let mut buf = [0; 8];
        assert_eq!(b.read(&mut buf), Ok(Some(3)));
        assert_eq!(b.read(&mut buf), Ok(Some(0)));
    }

    #[test]
    fn abandon_handshake() {
        let (mut a, mut b) = pair();

        let syn = single(&a.transition(Event::Connect));
        assert_eq!(a.transition(Event::Close), vec![Effect::StopTimer]);
        assert!(a.is_terminated());

        b.transition(Event::Inbound(&syn));
        assert!(b.transition(Event::Close).is_empty());
        assert!(b.is_terminated());

        let listener = &mut Control::listening(B, &Config::default());
        listener.transition(Event::Close);
        assert!(listener.is_terminated());
        assert!(listener.transition(Event::Inbound(&syn)).is_empty());
    }
}
