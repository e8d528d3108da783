use std::time::{Duration, Instant};

/// Accepts at most one request per `interval` of wall-clock time. Rejected
/// requests are dropped, not queued.
#[derive(Clone, Debug)]
pub struct DebounceGuard {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl DebounceGuard {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    pub fn try_accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}
