use futures::{future::{self, Loop}, prelude::*};
use log::{info, warn};
use sltp::{LinkAddr, Node, Port, UdpLink};
use tokio::{
    self,
    io::{copy, shutdown, AsyncRead},
};

/// What the server listens on.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    pub base_port: u16,
    pub node: LinkAddr,
    pub port: Port,
    pub reliability: f64,
}

pub fn serve(opts: Options) {
    let link = UdpLink::bind_with(opts.node, opts.base_port, opts.reliability)
        .expect("failed to bind UDP socket");
    let node = Node::new(link).expect("failed to create node");

    // A port serves a single connection at a time, so the next connection is
    // only accepted once the previous one has been torn down.
    let server_future = future::loop_fn(node, move |node| {
        node.accept(opts.port)
            .and_then(|stream| {
                let (addr, port) = stream.peer_addr();
                info!("⚡️  Accepted connection from {}:{}.", addr, port);

                let (read, write) = stream.split();
                copy(read, write)
                    .and_then(|(_, _, write)| shutdown(write))
                    .then(move |res| {
                        match res {
                            Ok(_) => info!("🏁  Connection to {}:{} closed.", addr, port),
                            Err(e) => warn!(
                                "💥  Error while echoing to {}:{}: {:?}",
                                addr, port, e,
                            ),
                        }

                        Ok(())
                    })
            })
            .map(move |_| Loop::Continue(node))
    })
    .map(|()| ())
    .map_err(|e: std::io::Error| panic!("Accept error: {:?}", e));

    info!(
        "⛓  Starting echo server on node {}, port {}.",
        opts.node, opts.port,
    );
    tokio::run(server_future);
}
