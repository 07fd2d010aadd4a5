use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock source anchored to tokio's monotonic clock.
///
/// `now()` advances together with `tokio::time`, so reminder deadlines and the
/// instants stored in the cooldown map never drift apart, and a paused test
/// runtime moves both at once.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor_instant: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }

    /// Monotonic deadline matching a wall-clock instant; past instants map to "now".
    pub fn deadline_for(&self, at: DateTime<Utc>) -> Instant {
        let now = Instant::now();
        match (at - self.now()).to_std() {
            Ok(wait) => now + wait,
            Err(_) => now,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
