//! Send rate limiter - Controls accepted MAIL commands per sender

use chatrelay_common::Clock;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Sliding one-minute window of accepted sends per sender address.
///
/// The outer map lock is held only to look up a sender's window; each
/// window has its own lock, so senders do not contend with each other.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(60)
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn window(&self, sender: &str) -> Window {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.entry(sender.to_string()).or_default().clone()
    }

    /// Record a send for `sender` if its last minute holds at most
    /// `max_per_minute` sends. Denied attempts are not recorded.
    pub fn allowed(&self, sender: &str, max_per_minute: u32) -> bool {
        let now = self.clock.now();
        let window = self.window(sender);
        let mut sends = window.lock().unwrap_or_else(PoisonError::into_inner);

        let start = window_start(now);
        while sends.front().is_some_and(|ts| *ts < start) {
            sends.pop_front();
        }

        if sends.len() <= max_per_minute as usize {
            sends.push_back(now);
            true
        } else {
            debug!(sender = %sender, count = sends.len(), "Send rate limit hit");
            false
        }
    }

    /// Forget senders without sends in the last minute
    pub fn retain_recent(&self) {
        let start = window_start(self.clock.now());
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|_, window| {
            // a caller between window() and its push still holds a clone
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let sends = window.lock().unwrap_or_else(PoisonError::into_inner);
            sends.back().is_some_and(|ts| *ts >= start)
        });
    }

    /// Number of senders currently tracked
    pub fn tracked_senders(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
