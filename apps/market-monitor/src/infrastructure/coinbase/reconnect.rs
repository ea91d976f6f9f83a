//! Reconnection Backoff
//!
//! Optional automatic reconnection after a remote close or transport error.
//! Disabled by default: a dropped feed is logged and left `Disconnected`
//! until an operator restarts it.

use std::time::Duration;

use rand::Rng;

/// Reconnection settings.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.1 = ±10%).
    pub jitter: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Enabled policy with default timings.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Fresh backoff sequence for one outage.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            next: self.initial_delay,
            attempts: 0,
        }
    }
}

/// Delay sequence for one outage.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    /// Delay before the next attempt, or `None` when attempts are exhausted
    /// or reconnection is disabled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if self.policy.max_attempts != 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;

        let current = self.next;
        self.next = current
            .mul_f64(self.policy.multiplier.max(1.0))
            .min(self.policy.max_delay);

        Some(jittered(current, self.policy.jitter))
    }

    /// Attempts handed out so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = rand::rng().random_range(-jitter..=jitter);
    delay.mul_f64((1.0 + spread).max(0.0)).max(Duration::from_millis(1))
}
