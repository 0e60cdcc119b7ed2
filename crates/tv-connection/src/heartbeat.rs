//! Inbound-traffic liveness timer.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Countdown rearmed by every qualifying inbound frame.
///
/// Expiry means the TV went silent for a full interval and the
/// transport must be dropped.
pub(crate) struct Heartbeat {
    interval: Duration,
    deadline: Instant,
    sleep: Pin<Box<Sleep>>,
}

impl Heartbeat {
    /// Arms a new countdown starting now.
    pub(crate) fn arm(interval: Duration) -> Self {
        let deadline = deadline_after(interval);
        Self {
            interval,
            deadline,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }

    /// Pushes the deadline to `now + interval`.
    pub(crate) fn reset(&mut self) {
        self.deadline = deadline_after(self.interval);
        self.sleep.as_mut().reset(self.deadline);
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Completes once the deadline passes.
    pub(crate) async fn expired(&mut self) {
        self.sleep.as_mut().await;
    }
}

/// `now + interval`, saturating at roughly thirty years out.
fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}
