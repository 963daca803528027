#![allow(dead_code)]

use env_logger;
use futures::Future;
use sltp::{Config, Hub, LinkAddr, Node};
use std::{fmt::Debug, time::Duration};
use tokio::{runtime::Runtime, timer::Timeout};

/// Runs the future to completion on a fresh runtime.
///
/// Panics if it takes longer than the given duration.
pub fn run_timed<F>(duration: Duration, fut: F) -> Result<F::Item, F::Error>
where
    F: Future + Send + 'static,
    F::Item: Send + 'static,
    F::Error: Debug + Send + 'static,
{
    let _ = env_logger::try_init();

    let mut rt = Runtime::new().expect("failed to start runtime");
    rt.block_on(Timeout::new(fut, duration)).map_err(|e| {
        if e.is_elapsed() {
            panic!("timed out");
        }

        e.into_inner().expect("timer failure")
    })
}

/// A configuration with short timeouts to keep lossy tests fast.
pub fn fast_config() -> Config {
    Config::default()
        .retransmit_interval(Duration::from_millis(10))
        .fin_retries(30)
}

/// Attaches two nodes with addresses 1 and 2 to the hub.
pub fn node_pair(hub: &Hub, config: Config) -> (Node, Node) {
    let a = Node::with_config(hub.attach(LinkAddr(1)).unwrap(), config.clone()).unwrap();
    let b = Node::with_config(hub.attach(LinkAddr(2)).unwrap(), config).unwrap();

    (a, b)
}
