//! Per-origin rate limiting state.

use std::time::Duration;

use tokio::time::Instant;

/// State for a single origin.
#[derive(Debug, Clone)]
pub struct OriginState {
    /// Minimum spacing between granted slots.
    pub min_interval: Duration,
    /// When the most recent slot was (or will be) granted.
    pub last_grant: Option<Instant>,
    /// Total slots granted.
    pub total_grants: u64,
    /// Accumulated time callers were asked to wait.
    pub total_waited: Duration,
}

impl OriginState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_grant: None,
            total_grants: 0,
            total_waited: Duration::ZERO,
        }
    }

    /// Time from `now` until this origin may be requested again.
    ///
    /// `last_grant` may lie in the future when earlier callers are still
    /// sleeping towards their reserved slot.
    pub fn time_until_ready(&self, now: Instant) -> Duration {
        match self.last_grant {
            Some(last) => {
                let ready_at = last + self.min_interval;
                ready_at.saturating_duration_since(now)
            }
            None => Duration::ZERO,
        }
    }

    /// Record a slot granted at `at` after a wait of `waited`.
    pub fn grant(&mut self, at: Instant, waited: Duration) {
        self.last_grant = Some(at);
        self.total_grants += 1;
        self.total_waited += waited;
    }
}
