//! Optional rejection of repeated request ids.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::BrokerError;

pub const DEFAULT_REPLAY_CAPACITY: usize = 4096;

/// Remembers request ids seen within `window`.
///
/// At most `capacity` ids are kept; the oldest is forgotten first.
pub struct ReplayGuard {
    window: Duration,
    capacity: usize,
    seen: Mutex<SeenIds>,
}

#[derive(Default)]
struct SeenIds {
    order: VecDeque<(Instant, String)>,
    ids: HashSet<String>,
}

impl SeenIds {
    fn evict(&mut self, now: Instant, window: Duration, capacity: usize) {
        while let Some((seen_at, _)) = self.order.front() {
            let expired = now.duration_since(*seen_at) >= window;
            if !expired && self.order.len() < capacity {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                self.ids.remove(&id);
            }
        }
    }
}

impl ReplayGuard {
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_REPLAY_CAPACITY)
    }

    pub fn with_capacity(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            seen: Mutex::new(SeenIds::default()),
        }
    }

    /// Record `request_id`, failing when it was already seen inside the window.
    pub fn check(&self, request_id: &str) -> Result<(), BrokerError> {
        self.check_at(request_id, Instant::now())
    }

    fn check_at(&self, request_id: &str, now: Instant) -> Result<(), BrokerError> {
        let mut seen = self.seen.lock();
        seen.evict(now, self.window, self.capacity);
        if seen.ids.contains(request_id) {
            return Err(BrokerError::Validation("Duplicate request ID".to_string()));
        }
        seen.ids.insert(request_id.to_string());
        seen.order.push_back((now, request_id.to_string()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
