use crate::error::Error;
use std::time::Duration;

/// Tunables of a node and its connections.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Config {
    /// The time after which an unacknowledged segment is sent again.
    ///
    /// Configure this to a small multiple of the round trip time of the link.
    pub retransmit_interval: Duration,

    /// The amount of received segments buffered until the application reads
    /// them.
    ///
    /// Data arriving while the buffer is full is dropped without being
    /// acknowledged, the peer retransmits it later.
    pub recv_window: usize,

    /// How often a FIN is resent before the connection is considered closed
    /// without the peer's confirmation.
    pub fin_retries: u32,

    /// The amount of datagrams queued per port before further ones are dropped.
    pub port_queue_size: usize,
}

impl Config {
    /// Sets the retransmission interval.
    pub fn retransmit_interval(mut self, interval: Duration) -> Self {
        self.retransmit_interval = interval;
        self
    }

    /// Sets the amount of segments buffered for the reader.
    pub fn recv_window(mut self, segments: usize) -> Self {
        self.recv_window = segments;
        self
    }

    /// Sets how often a FIN is resent.
    pub fn fin_retries(mut self, retries: u32) -> Self {
        self.fin_retries = retries;
        self
    }

    /// Sets the queue size of every port.
    pub fn port_queue_size(mut self, datagrams: usize) -> Self {
        self.port_queue_size = datagrams;
        self
    }

    /// Checks the configuration for values that would stall the protocol.
    pub fn validate(&self) -> Result<(), Error> {
        if self.retransmit_interval == Duration::from_secs(0) {
            return Err(Error::InvalidConfig("retransmit interval must not be zero"));
        }
        if self.recv_window == 0 {
            return Err(Error::InvalidConfig("receive window must not be zero"));
        }
        if self.port_queue_size == 0 {
            return Err(Error::InvalidConfig("port queue size must not be zero"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retransmit_interval: Duration::from_millis(100),
            recv_window: 16,
            fin_retries: 8,
            port_queue_size: 16,
        }
    }
}
