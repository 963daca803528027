use futures::{prelude::*, try_ready};
use std::{
    io::{self, ErrorKind},
    time::Duration,
};
use tokio::{clock, timer::Delay};

/// The retransmission deadline of a connection.
///
/// At most one deadline is armed at a time. Starting the timer again replaces
/// the previous deadline.
#[derive(Debug)]
pub(crate) struct RetransmitTimer {
    delay: Option<Delay>,
    interval: Duration,
}

impl RetransmitTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            delay: None,
            interval,
        }
    }

    /// Arms the timer to fire one interval from now.
    pub fn start(&mut self) {
        self.delay = Some(Delay::new(clock::now() + self.interval));
    }

    /// Disarms the timer.
    pub fn stop(&mut self) {
        self.delay = None;
    }

    pub fn is_armed(&self) -> bool {
        self.delay.is_some()
    }

    /// Resolves once the armed deadline has passed.
    ///
    /// The timer disarms itself when it fires. A disarmed timer never
    /// resolves.
    pub fn poll_expired(&mut self) -> Poll<(), io::Error> {
        match self.delay {
            Some(ref mut delay) => {
                try_ready!(delay.poll().map_err(|e| io::Error::new(ErrorKind::Other, e)))
            }
            None => return Ok(Async::NotReady),
        }

        self.delay = None;
        Ok(Async::Ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use std::time::Instant;
    use tokio::runtime::Runtime;

    #[test]
    fn fires_once() {
        let mut rt = Runtime::new().unwrap();
        let mut timer = RetransmitTimer::new(Duration::from_millis(20));

        let started = Instant::now();
        timer.start();
        assert!(timer.is_armed());

        let armed = rt
            .block_on(future::poll_fn(move || {
                try_ready!(timer.poll_expired());
                Ok::<_, io::Error>(Async::Ready(timer.is_armed()))
            }))
            .unwrap();

        assert!(!armed);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn stopped_timer_never_fires() {
        let mut rt = Runtime::new().unwrap();
        let mut timer = RetransmitTimer::new(Duration::from_millis(1));

        timer.start();
        timer.stop();

        let pending = rt
            .block_on(future::lazy(move || {
                Ok::<_, io::Error>(timer.poll_expired()?.is_not_ready())
            }))
            .unwrap();
        assert!(pending);
    }
}
