//! Demo Mode - Simulated robot controller for testing
//!
//! Behaves like the controller firmware on the other end of the serial line
//! so the connection stack and any UI on top of it can run without hardware.
//! The robot greets on power-up, streams state frames at about 12 Hz while
//! streaming is enabled, and reacts to the single-letter commands the way
//! the firmware does, including its refusals.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::protocol::frame::{action, drive, sensor};
use crate::protocol::{
    ChannelOpener, Command, CommunicationChannel, ConnectionConfig, ProtocolError,
};

/// Period between streamed state frames (12 Hz)
const FRAME_PERIOD: Duration = Duration::from_millis(83);

/// Time the firmware waits after 'R' before rebooting
const RESET_DELAY: Duration = Duration::from_secs(5);

/// Time a return-home trip takes
const RETURN_HOME_DURATION: Duration = Duration::from_secs(3);

/// Battery percent lost per second of driving
const DRAIN_PER_SEC: f64 = 0.05;

struct Robot {
    action: i64,
    at_home: bool,
    streaming: bool,
    sensors: i64,
    drive: i64,
    battery: f64,
    /// When the current action started
    action_since: Instant,
    last_frame: Instant,
    last_tick: Instant,
    outbound: VecDeque<u8>,
    rng: StdRng,
}

impl Robot {
    fn new(rng: StdRng) -> Self {
        let now = Instant::now();
        let mut robot = Self {
            action: action::WAIT,
            at_home: true,
            streaming: false,
            sensors: sensor::ALL,
            drive: drive::NONE,
            battery: 100.0,
            action_since: now,
            last_frame: now,
            last_tick: now,
            outbound: VecDeque::new(),
            rng,
        };
        robot.boot();
        robot
    }

    fn boot(&mut self) {
        self.action = action::WAIT;
        self.at_home = true;
        self.streaming = false;
        self.sensors = sensor::ALL;
        self.drive = drive::NONE;
        self.action_since = Instant::now();
        self.println("<(^_^)>");
    }

    fn println(&mut self, text: &str) {
        self.outbound.extend(text.bytes());
        self.outbound.push_back(b'\n');
    }

    fn frame(&self) -> String {
        format!(
            "[({},{},{},{},{},{})]",
            self.sensors,
            self.drive,
            self.action,
            self.at_home as i64,
            (self.action == action::MANUAL) as i64,
            self.battery.round() as i64
        )
    }

    fn push_frame(&mut self) {
        let frame = self.frame();
        self.println(&frame);
        self.last_frame = Instant::now();
    }

    fn set_action(&mut self, next: i64) {
        if next != self.action {
            self.action = next;
            self.action_since = Instant::now();
            if next != action::ROUNDS && next != action::MANUAL {
                self.drive = drive::NONE;
            }
        }
    }

    fn handle(&mut self, byte: u8) {
        if self.action == action::FROZEN || self.action == action::RESET {
            return;
        }
        match byte {
            b'S' => {
                if !self.at_home {
                    self.println("Can't start when not on the starting field!");
                    return;
                }
                self.set_action(action::ROUNDS);
                self.at_home = false;
            }
            b'X' => self.set_action(action::FROZEN),
            b'P' => match self.action {
                action::PAUSE => self.set_action(action::ROUNDS),
                action::ROUNDS => self.set_action(action::PAUSE),
                _ => self.println("Not driving on track, can't be paused!"),
            },
            b'C' => {
                if self.action != action::ROUNDS {
                    self.println("Not driving on track, can't be called home!");
                    return;
                }
                self.set_action(action::RETURN_HOME);
            }
            b'M' => {
                if self.action != action::WAIT {
                    self.set_action(action::WAIT);
                } else {
                    self.set_action(action::MANUAL);
                }
            }
            b'Y' => self.streaming = true,
            b'Q' => self.streaming = false,
            b'N' => self.push_frame(),
            b'R' => {
                self.set_action(action::RESET);
                self.println("Will reset in 5 seconds...");
            }
            b'?' => self.println("Send S, P, C, X, R, M or ? (W/A/D/B in manual mode)"),
            _ if Command::from_byte(byte).is_some_and(|c| c.requires_manual_mode()) => {
                // Drive letters are silently ignored outside manual mode
                if self.action != action::MANUAL {
                    return;
                }
                self.drive = match byte {
                    b'W' => drive::STRAIGHT,
                    b'A' => drive::LEFT,
                    b'D' => drive::RIGHT,
                    _ => drive::NONE,
                };
                self.at_home = false;
            }
            _ => {}
        }
    }

    /// Advance the simulation to `now`
    fn tick(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        let in_action = now.duration_since(self.action_since);

        match self.action {
            action::ROUNDS => {
                // Follow the line: mostly centred, drifting to either side
                let roll = self.rng.gen_range(0..10);
                self.sensors = match roll {
                    0 | 1 => sensor::LEFT,
                    2 | 3 => sensor::RIGHT,
                    4 => sensor::LEFT | sensor::CENTER,
                    5 => sensor::CENTER | sensor::RIGHT,
                    _ => sensor::CENTER,
                };
                self.drive = if self.sensors & sensor::CENTER != 0 {
                    drive::STRAIGHT
                } else if self.sensors & sensor::LEFT != 0 {
                    drive::LEFT
                } else {
                    drive::RIGHT
                };
                self.battery = (self.battery - DRAIN_PER_SEC * dt).max(0.0);
            }
            action::MANUAL if self.drive != drive::NONE => {
                self.battery = (self.battery - DRAIN_PER_SEC * dt).max(0.0);
            }
            action::RETURN_HOME if in_action >= RETURN_HOME_DURATION => {
                self.at_home = true;
                self.sensors = sensor::ALL;
                self.set_action(action::WAIT);
            }
            action::RESET if in_action >= RESET_DELAY => {
                self.boot();
            }
            _ => {}
        }

        if self.streaming && now.duration_since(self.last_frame) >= FRAME_PERIOD {
            self.push_frame();
        }
    }
}

/// Simulated controller, usable wherever a [`CommunicationChannel`] is.
///
/// Clones share the same simulated robot.
#[derive(Clone)]
pub struct DemoRobot {
    robot: Arc<Mutex<Robot>>,
}

impl Default for DemoRobot {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoRobot {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic sensor jitter
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            robot: Arc::new(Mutex::new(Robot::new(rng))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Robot> {
        self.robot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the robot is currently publishing state frames
    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// Current action code (see [`action`])
    pub fn action(&self) -> i64 {
        self.lock().action
    }
}

impl Read for DemoRobot {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut robot = self.lock();
        robot.tick(Instant::now());
        let n = buf.len().min(robot.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(robot.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for DemoRobot {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut robot = self.lock();
        for &byte in buf {
            if byte != b'\r' && byte != b'\n' {
                robot.handle(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for DemoRobot {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(self.clone()))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let mut robot = self.lock();
        robot.tick(Instant::now());
        Ok(robot.outbound.len() as u32)
    }
}

/// Opens a freshly booted [`DemoRobot`] for any port name
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoOpener {
    seed: Option<u64>,
}

impl DemoOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl ChannelOpener for DemoOpener {
    fn open(
        &self,
        port: &str,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        tracing::info!(port, "opening simulated robot");
        let robot = match self.seed {
            Some(seed) => DemoRobot::with_seed(seed),
            None => DemoRobot::new(),
        };
        Ok(Box::new(robot))
    }
}
