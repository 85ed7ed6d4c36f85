//! Receive loop: pulls lines off the link and routes them.
//!
//! State frames go onto the [`StateQueue`] for the dispatch loop. Log lines
//! and malformed frames go straight to the [`LogSink`] so device output is
//! never held up behind state delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::Level;

use super::error::ProtocolError;
use super::frame::{parse_frame, FrameResult};
use super::link::Link;
use super::queue::StateQueue;
use super::sink::LogSink;
use super::stats::LinkStats;

pub struct Receiver {
    link: Arc<Link>,
    queue: Arc<StateQueue>,
    sink: Arc<dyn LogSink>,
    stats: Arc<LinkStats>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    /// Length of the current run of failed reads
    error_streak: u64,
}

impl Receiver {
    pub fn new(
        link: Arc<Link>,
        queue: Arc<StateQueue>,
        sink: Arc<dyn LogSink>,
        stats: Arc<LinkStats>,
        stop: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            link,
            queue,
            sink,
            stats,
            stop,
            poll_interval,
            error_streak: 0,
        }
    }

    /// Run on a dedicated thread until the stop flag is raised
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("robolink-rx".to_string())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        tracing::debug!(port = %self.link.port_name(), "receive loop started");
        while !self.stop.load(Ordering::Acquire) {
            self.poll_once();
            thread::sleep(self.poll_interval);
        }
        tracing::debug!(port = %self.link.port_name(), "receive loop stopped");
    }

    /// Drain every complete line currently available
    pub fn poll_once(&mut self) {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            match self.link.read_line() {
                Ok(Some(line)) => {
                    self.recovered();
                    self.route(&line);
                }
                Ok(None) => {
                    self.recovered();
                    return;
                }
                Err(e) => {
                    self.stats.read_error();
                    self.error_streak += 1;
                    if self.error_streak == 1 {
                        self.sink.log(Level::WARN, &format!("Read failed: {}", e));
                    } else {
                        tracing::debug!(streak = self.error_streak, "read failed: {}", e);
                    }
                    return;
                }
            }
        }
    }

    fn recovered(&mut self) {
        if self.error_streak > 0 {
            tracing::info!(
                failures = self.error_streak,
                "reads recovered after consecutive failures"
            );
            self.error_streak = 0;
        }
    }

    /// Classify one line and hand it to the queue or the sink
    pub fn route(&self, line: &str) {
        // Bare terminators carry nothing
        if line.is_empty() {
            return;
        }

        match parse_frame(line) {
            FrameResult::State(state) => {
                tracing::trace!(%state, "state frame");
                self.stats.state_queued();
                if let Some(evicted) = self.queue.push(state) {
                    self.stats.state_dropped();
                    tracing::debug!(%evicted, "state queue full, dropped oldest");
                }
            }
            FrameResult::Log(text) => {
                self.stats.log_line();
                self.sink.log(Level::INFO, &text);
            }
            FrameResult::Malformed { raw, reason } => {
                self.stats.malformed_frame();
                let err = ProtocolError::MalformedFrame { line: raw, reason };
                self.sink.log(Level::WARN, &err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sink::MemorySink;
    use crate::protocol::stream::{MemoryChannel, MemoryPeer};
    use crate::protocol::{ConnectionConfig, RobotState};

    struct Fixture {
        receiver: Receiver,
        peer: MemoryPeer,
        queue: Arc<StateQueue>,
        sink: MemorySink,
        stats: Arc<LinkStats>,
    }

    fn fixture(capacity: usize) -> Fixture {
        let chan = MemoryChannel::new();
        let peer = chan.peer();
        let stats = Arc::new(LinkStats::new());
        let link = Arc::new(
            Link::open("mem", &ConnectionConfig::default(), &chan, Arc::clone(&stats)).unwrap(),
        );
        let queue = Arc::new(StateQueue::new(capacity));
        let sink = MemorySink::new();
        let receiver = Receiver::new(
            link,
            Arc::clone(&queue),
            Arc::new(sink.clone()),
            Arc::clone(&stats),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(1),
        );
        Fixture {
            receiver,
            peer,
            queue,
            sink,
            stats,
        }
    }

    #[test]
    fn test_routes_states_and_logs() {
        let mut f = fixture(8);
        f.peer.inject(b"<(^_^)>\n[1,0,0,1,0,42]\n[(7,2,1,0,0,90)]\n");
        f.receiver.poll_once();

        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![1, 0, 0, 1, 0, 42])));
        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![7, 2, 1, 0, 0, 90])));
        assert_eq!(f.queue.pop(), None);
        assert_eq!(f.sink.messages_at(Level::INFO), vec!["<(^_^)>"]);
    }

    #[test]
    fn test_malformed_frame_is_reported_and_skipped() {
        let mut f = fixture(8);
        f.peer.inject(b"[1,foo,3]\n[4,5,6]\n");
        f.receiver.poll_once();

        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![4, 5, 6])));
        assert!(f.queue.is_empty());
        let warnings = f.sink.messages_at(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Malformed state frame '[1,foo,3]'"));
        assert_eq!(f.stats.snapshot().malformed_frames, 1);
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut f = fixture(8);
        f.peer.inject(b"\n\r\nLast middle\n\n");
        f.receiver.poll_once();
        assert_eq!(f.sink.entries().len(), 1);
        assert_eq!(f.stats.snapshot().log_lines, 1);
    }

    #[test]
    fn test_whitespace_lines_are_logged_verbatim() {
        let mut f = fixture(8);
        f.peer.inject(b"   \nhello\n\t\r\n");
        f.receiver.poll_once();
        assert_eq!(
            f.sink.entries(),
            vec![
                (Level::INFO, "   ".to_string()),
                (Level::INFO, "hello".to_string()),
                (Level::INFO, "\t".to_string()),
            ]
        );
        assert_eq!(f.stats.snapshot().log_lines, 3);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut f = fixture(2);
        f.peer.inject(b"[1]\n[2]\n[3]\n");
        f.receiver.poll_once();
        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![2])));
        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![3])));
        assert_eq!(f.stats.snapshot().dropped_states, 1);
    }

    #[test]
    fn test_read_errors_are_swallowed_and_reported_once() {
        let mut f = fixture(8);
        f.peer.set_fail_reads(true);
        for _ in 0..5 {
            f.receiver.poll_once();
        }
        assert_eq!(f.sink.messages_at(Level::WARN).len(), 1);
        assert_eq!(f.stats.snapshot().read_errors, 5);

        f.peer.set_fail_reads(false);
        f.peer.inject(b"[9]\n");
        f.receiver.poll_once();
        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![9])));

        // A new failure after recovery is reported again
        f.peer.set_fail_reads(true);
        f.receiver.poll_once();
        assert_eq!(f.sink.messages_at(Level::WARN).len(), 2);
    }

    #[test]
    fn test_thread_stops_on_flag() {
        let f = fixture(8);
        let stop = Arc::clone(&f.receiver.stop);
        let handle = f.receiver.spawn().unwrap();
        f.peer.inject(b"[1,2,3]\n");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while f.queue.is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(f.queue.pop(), Some(RobotState::new(vec![1, 2, 3])));

        stop.store(true, Ordering::Release);
        handle.join().unwrap();
    }
}
