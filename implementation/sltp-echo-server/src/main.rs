//! A server that accepts SLTP connections on a given port, one at a time, and
//! echoes everything it receives back to the sender.

mod server;

use clap::{
    app_from_crate, crate_authors, crate_description, crate_name, crate_version,
    AppSettings, Arg,
};
use env_logger;
use log::LevelFilter;
use sltp::{LinkAddr, DEFAULT_BASE_PORT, MAX_PORTS};

const BASE_PORT_ARG: &str = "BASE_PORT";
const NODE_ARG: &str = "NODE";
const PORT_ARG: &str = "PORT";
const RELIABILITY_ARG: &str = "RELIABILITY";

fn main() {
    env_logger::Builder::new()
        .filter(Some("sltp_echo_server"), LevelFilter::Info)
        .filter(Some("sltp"), LevelFilter::Warn)
        .init();

    let default_base_port = DEFAULT_BASE_PORT.to_string();
    let matches = app_from_crate!()
        .setting(AppSettings::GlobalVersion)
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name(NODE_ARG)
                .short("n")
                .long("node")
                .default_value("1")
                .takes_value(true)
                .validator(|val| {
                    val.parse::<u8>().map(|_| ()).map_err(|_| {
                        format!("'{}' is not a valid link address.", val)
                    })
                })
                .help("The link address of this node."),
        )
        .arg(
            Arg::with_name(PORT_ARG)
                .short("p")
                .long("port")
                .default_value("80")
                .takes_value(true)
                .validator(|val| match val.parse::<u8>() {
                    Ok(port) if (port as usize) < MAX_PORTS => Ok(()),
                    _ => Err(format!("'{}' is not a port below {}.", val, MAX_PORTS)),
                })
                .help("The SLTP port to accept connections on."),
        )
        .arg(
            Arg::with_name(BASE_PORT_ARG)
                .short("b")
                .long("base-port")
                .default_value(&default_base_port)
                .takes_value(true)
                .validator(|val| {
                    val.parse::<u16>().map(|_| ()).map_err(|_| {
                        format!("'{}' cannot be parsed as number.", val)
                    })
                })
                .help("The UDP port of link address 0."),
        )
        .arg(
            Arg::with_name(RELIABILITY_ARG)
                .short("r")
                .long("reliability")
                .default_value("1.0")
                .takes_value(true)
                .validator(|val| match val.parse::<f64>() {
                    Ok(r) if r > 0.0 && r <= 1.0 => Ok(()),
                    _ => Err(format!("'{}' is not a probability in (0, 1].", val)),
                })
                .help("The probability that a sent frame is delivered."),
        )
        .get_matches();

    // The validators ensure these parse
    server::serve(server::Options {
        base_port: matches.value_of(BASE_PORT_ARG).unwrap().parse().unwrap(),
        node: LinkAddr(matches.value_of(NODE_ARG).unwrap().parse().unwrap()),
        port: matches.value_of(PORT_ARG).unwrap().parse().unwrap(),
        reliability: matches.value_of(RELIABILITY_ARG).unwrap().parse().unwrap(),
    });
}
