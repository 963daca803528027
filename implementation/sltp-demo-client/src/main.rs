//! Sends a message to an SLTP echo server and prints what comes back.

use clap::{
    app_from_crate, crate_authors, crate_description, crate_name, crate_version,
    Arg,
};
use env_logger;
use futures::Future;
use log::{info, LevelFilter};
use sltp::{LinkAddr, Node, UdpLink, DEFAULT_BASE_PORT};
use tokio::{
    self,
    io::{read_exact, shutdown, write_all},
};

const BASE_PORT_ARG: &str = "BASE_PORT";
const MESSAGE_ARG: &str = "MESSAGE";
const NODE_ARG: &str = "NODE";
const PORT_ARG: &str = "PORT";
const RELIABILITY_ARG: &str = "RELIABILITY";
const SERVER_ARG: &str = "SERVER";

fn is_u8(val: String) -> Result<(), String> {
    val.parse::<u8>()
        .map(|_| ())
        .map_err(|_| format!("'{}' cannot be parsed as number below 256.", val))
}

fn main() {
    env_logger::Builder::new()
        .filter(Some("sltp_demo_client"), LevelFilter::Info)
        .filter(Some("sltp"), LevelFilter::Warn)
        .init();

    let default_base_port = DEFAULT_BASE_PORT.to_string();
    let matches = app_from_crate!()
        .arg(Arg::with_name(NODE_ARG)
            .short("n")
            .long("node")
            .default_value("2")
            .validator(is_u8)
            .help("The link address of this node."))
        .arg(Arg::with_name(SERVER_ARG)
            .short("s")
            .long("server")
            .default_value("1")
            .validator(is_u8)
            .help("The link address of the echo server."))
        .arg(Arg::with_name(PORT_ARG)
            .short("p")
            .long("port")
            .default_value("80")
            .validator(is_u8)
            .help("The SLTP port the echo server listens on."))
        .arg(Arg::with_name(BASE_PORT_ARG)
            .short("b")
            .long("base-port")
            .default_value(&default_base_port)
            .validator(|val| val.parse::<u16>().map(|_| ()).map_err(|e| e.to_string()))
            .help("The UDP port of link address 0."))
        .arg(Arg::with_name(RELIABILITY_ARG)
            .short("r")
            .long("reliability")
            .default_value("1.0")
            .validator(|val| match val.parse::<f64>() {
                Ok(r) if r > 0.0 && r <= 1.0 => Ok(()),
                _ => Err(format!("'{}' is not a probability in (0, 1].", val)),
            })
            .help("The probability that a sent frame is delivered."))
        .arg(Arg::with_name(MESSAGE_ARG)
            .default_value("Hello World!")
            .help("The message to send."))
        .get_matches();

    // The validators ensure these parse
    let node = LinkAddr(matches.value_of(NODE_ARG).unwrap().parse().unwrap());
    let server = LinkAddr(matches.value_of(SERVER_ARG).unwrap().parse().unwrap());
    let port = matches.value_of(PORT_ARG).unwrap().parse().unwrap();
    let base_port = matches.value_of(BASE_PORT_ARG).unwrap().parse().unwrap();
    let reliability = matches.value_of(RELIABILITY_ARG).unwrap().parse().unwrap();
    let message = matches.value_of(MESSAGE_ARG).unwrap().as_bytes().to_vec();

    let link = UdpLink::bind_with(node, base_port, reliability)
        .expect("failed to bind UDP socket");
    let node = Node::new(link).expect("failed to create node");

    let reply = vec![0; message.len()];
    let fut = node
        .connect(server, port)
        .and_then(|stream| write_all(stream, message))
        .and_then(|(stream, _)| read_exact(stream, reply))
        .and_then(|(stream, reply)| {
            info!("echo: {}", String::from_utf8_lossy(&reply));
            shutdown(stream)
        })
        .map_err(|e| panic!("err: {:?}", e))
        // The runtime only exits once the node's driver has stopped
        .map(move |_| drop(node));

    tokio::run(fut);
}
