//! Dispatch loop: hands queued states to the consumer.
//!
//! After the link settles it asks the controller to start streaming, then
//! delivers states in arrival order by calling the update callback on its
//! own thread. A slow callback delays every later state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::Level;

use super::link::Link;
use super::queue::StateQueue;
use super::sink::LogSink;
use super::stats::LinkStats;
use super::{Command, CommandByte, RobotState};

/// Consumer callback invoked once per received state
pub type UpdateCallback = Box<dyn FnMut(RobotState) + Send + 'static>;

pub struct Dispatcher {
    link: Arc<Link>,
    queue: Arc<StateQueue>,
    sink: Arc<dyn LogSink>,
    stats: Arc<LinkStats>,
    stop: Arc<AtomicBool>,
    callback: UpdateCallback,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: Arc<Link>,
        queue: Arc<StateQueue>,
        sink: Arc<dyn LogSink>,
        stats: Arc<LinkStats>,
        stop: Arc<AtomicBool>,
        callback: UpdateCallback,
        poll_interval: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            link,
            queue,
            sink,
            stats,
            stop,
            callback,
            poll_interval,
            settle_delay,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("robolink-dispatch".to_string())
            .spawn(move || self.run())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn run(mut self) {
        if !self.settle() {
            return;
        }
        self.enable_streaming();

        while !self.stopped() {
            if !self.dispatch_one() {
                thread::sleep(self.poll_interval);
            }
        }
        tracing::debug!(port = %self.link.port_name(), "dispatch loop stopped");
    }

    /// Wait out the settle delay in poll-sized slices; false if stopped early
    fn settle(&self) -> bool {
        let deadline = Instant::now() + self.settle_delay;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn enable_streaming(&self) {
        match self
            .link
            .write_command(CommandByte::from(Command::EnableStreaming))
        {
            Ok(()) => tracing::debug!(port = %self.link.port_name(), "state streaming enabled"),
            Err(e) => self
                .sink
                .log(Level::WARN, &format!("Failed to enable state streaming: {}", e)),
        }
    }

    /// Deliver the oldest queued state; false if the queue was empty
    pub fn dispatch_one(&mut self) -> bool {
        match self.queue.pop() {
            Some(state) => {
                (self.callback)(state);
                self.stats.state_dispatched();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sink::MemorySink;
    use crate::protocol::stream::MemoryChannel;
    use crate::protocol::ConnectionConfig;
    use std::sync::Mutex;

    fn make(
        settle: Duration,
    ) -> (
        Dispatcher,
        crate::protocol::stream::MemoryPeer,
        Arc<StateQueue>,
        Arc<Mutex<Vec<RobotState>>>,
    ) {
        let chan = MemoryChannel::new();
        let peer = chan.peer();
        let stats = Arc::new(LinkStats::new());
        let link = Arc::new(
            Link::open("mem", &ConnectionConfig::default(), &chan, Arc::clone(&stats)).unwrap(),
        );
        let queue = Arc::new(StateQueue::new(16));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let dispatcher = Dispatcher::new(
            link,
            Arc::clone(&queue),
            Arc::new(MemorySink::new()),
            stats,
            Arc::new(AtomicBool::new(false)),
            Box::new(move |state| sink_seen.lock().unwrap().push(state)),
            Duration::from_millis(1),
            settle,
        );
        (dispatcher, peer, queue, seen)
    }

    #[test]
    fn test_dispatches_in_order() {
        let (mut d, _peer, queue, seen) = make(Duration::ZERO);
        queue.push(RobotState::new(vec![1]));
        queue.push(RobotState::new(vec![2]));

        assert!(d.dispatch_one());
        assert!(d.dispatch_one());
        assert!(!d.dispatch_one());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RobotState::new(vec![1]), RobotState::new(vec![2])]
        );
    }

    #[test]
    fn test_sends_enable_after_settle() {
        let (d, peer, _queue, _seen) = make(Duration::from_millis(30));
        let stop = Arc::clone(&d.stop);
        let started = Instant::now();
        let handle = d.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while peer.written().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(peer.written(), b"Y\r\n".to_vec());

        stop.store(true, Ordering::Release);
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_during_settle_skips_enable() {
        let (d, peer, _queue, _seen) = make(Duration::from_secs(30));
        let stop = Arc::clone(&d.stop);
        let handle = d.spawn().unwrap();
        thread::sleep(Duration::from_millis(5));

        let started = Instant::now();
        stop.store(true, Ordering::Release);
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(peer.written().is_empty());
    }
}
