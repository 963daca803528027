mod common;

use crate::common::{fast_config, node_pair, run_timed};
use futures::{future::{self, Either}, prelude::*};
use sltp::{Config, Datagram, Flags, Header, Hub, LinkAddr, State};
use std::{
    io::{Error, ErrorKind},
    time::{Duration, Instant},
};
use tokio::timer::{Delay, Timeout};

#[test]
fn handshake_on_the_wire() {
    let hub = Hub::new();
    let config = Config {
        retransmit_interval: Duration::from_secs(2),
        ..Config::default()
    };
    let (a, b) = node_pair(&hub, config);

    // Occupy the lower ports so the connection starts from port 50
    let _held = (0..50).map(|_| a.allocate_port().unwrap()).collect::<Vec<_>>();
    let raw = b.bind_port(80).unwrap();

    let peer = b.clone();
    let handshake = raw
        .into_future()
        .map_err(|_| Error::new(ErrorKind::Other, "port closed"))
        .and_then(move |(syn, raw)| {
            let syn = syn.expect("missing SYN");
            assert_eq!(syn.header, Header::new(80, 50, Flags::SYN, 0));
            assert_eq!(syn.source(), (LinkAddr(1), 50));

            let synack = Datagram::control(
                syn.source(),
                (LinkAddr(2), 80),
                Flags::SYN | Flags::ACK,
                1,
            );
            peer.send(&synack).map(move |_| raw)
        })
        .and_then(|raw| {
            raw.into_future()
                .map_err(|_| Error::new(ErrorKind::Other, "port closed"))
        });

    let (stream, (ack, _raw)) =
        run_timed(Duration::from_secs(5), a.connect(LinkAddr(2), 80).join(handshake))
            .unwrap();

    assert_eq!(ack.unwrap().header, Header::new(80, 50, Flags::ACK, 2));
    assert_eq!(stream.state(), State::Established);
    assert_eq!(stream.local_addr(), (LinkAddr(1), 50));
    assert_eq!(stream.peer_addr(), (LinkAddr(2), 80));
    assert_eq!(stream.send_seq(), 0);
    assert_eq!(stream.recv_seq(), 0);
}

#[test]
fn unanswered_syn_is_retransmitted() {
    let hub = Hub::new();
    let (a, b) = node_pair(&hub, fast_config());
    let raw = b.bind_port(80).unwrap();

    let syns = raw
        .take(3)
        .collect()
        .map_err(|()| Error::new(ErrorKind::Other, "port closed"));
    let attempt = syns.select2(a.connect(LinkAddr(2), 80)).then(|res| match res {
        Ok(Either::A((syns, _connect))) => Ok(syns),
        Ok(Either::B(_)) => Err("connected without SYN+ACK".to_owned()),
        Err(Either::A((e, _))) | Err(Either::B((e, _))) => Err(e.to_string()),
    });

    let syns = run_timed(Duration::from_secs(5), attempt).unwrap();

    assert_eq!(syns.len(), 3);
    for syn in syns {
        assert_eq!(syn.header, Header::new(80, 0, Flags::SYN, 0));
    }
}

#[test]
fn simultaneous_open_deadlocks() {
    let hub = Hub::new();
    let (a, b) = node_pair(&hub, fast_config());

    // Both sides take port 0 and connect to the other's port 0
    let attempts = future::lazy(move || {
        let ab = a.connect(LinkAddr(2), 0).then(Ok::<_, ()>);
        let ba = b.connect(LinkAddr(1), 0).then(Ok::<_, ()>);

        ab.join(ba)
    });

    let (ab, ba) = run_timed(Duration::from_secs(5), attempts).unwrap();

    assert_eq!(ab.unwrap_err().kind(), ErrorKind::ConnectionAborted);
    assert_eq!(ba.unwrap_err().kind(), ErrorKind::ConnectionAborted);
}

#[test]
fn connect_to_invalid_port() {
    let hub = Hub::new();
    let (a, _b) = node_pair(&hub, Config::default());

    let res = run_timed(Duration::from_secs(5), a.connect(LinkAddr(2), 200));
    assert_eq!(res.unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn abandoned_connect_is_never_accepted() {
    let hub = Hub::new();
    let (a, b) = node_pair(&hub, fast_config());
    let (a2, b2) = (a.clone(), b.clone());

    // The SYNs arrive while nobody accepts on port 80
    let abandoned = Timeout::new(a.connect(LinkAddr(2), 80), Duration::from_millis(50))
        .then(|res| match res {
            Err(ref e) if e.is_elapsed() => Ok(()),
            _ => Err(Error::new(ErrorKind::Other, "connect did not time out")),
        })
        .and_then(|_| {
            Delay::new(Instant::now() + Duration::from_millis(50))
                .map_err(|e| Error::new(ErrorKind::Other, e))
        });

    let late_accept = abandoned.and_then(move |_| {
        Timeout::new(b.accept(80), Duration::from_millis(200)).then(|res| match res {
            Err(ref e) if e.is_elapsed() => Ok(()),
            Ok(stream) => Err(Error::new(
                ErrorKind::Other,
                format!("accepted a connection from {}", stream.peer_addr().0),
            )),
            Err(e) => Err(Error::new(ErrorKind::Other, e.to_string())),
        })
    });

    // A fresh attempt on the same ports still works
    let fresh = late_accept.and_then(move |_| b2.accept(80).join(a2.connect(LinkAddr(2), 80)));

    let (server, client) = run_timed(Duration::from_secs(5), fresh).unwrap();

    assert_eq!(server.state(), State::Established);
    assert_eq!(client.state(), State::Established);
    assert_eq!(server.peer_addr(), client.local_addr());
}
