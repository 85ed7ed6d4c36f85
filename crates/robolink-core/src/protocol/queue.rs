//! Bounded state queue between the receive and dispatch loops.
//!
//! When the consumer falls behind, the oldest undelivered state is dropped:
//! a stale position report is worth less than the newest one, and the
//! receive loop must never block because it also carries log output.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::RobotState;

pub struct StateQueue {
    inner: Mutex<VecDeque<RobotState>>,
    capacity: usize,
}

impl StateQueue {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RobotState>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a state, returning the one evicted to make room, if any
    pub fn push(&self, state: RobotState) -> Option<RobotState> {
        let mut queue = self.lock();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(state);
        evicted
    }

    /// Remove the oldest state
    pub fn pop(&self) -> Option<RobotState> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
