//! Reconnect backoff for the transaction listener.

use std::time::Duration;

/// Exponential backoff with jitter for stream resubscription.
///
/// Unlike a bounded retry policy, there is no attempt cap: the listener never
/// gives up on the transaction feed, it only waits longer between attempts,
/// up to `max_delay`.
///
/// # Default Values
///
/// - `initial_delay`: 500ms
/// - `max_delay`: 60 seconds
/// - `multiplier`: 2.0 (delay doubles each attempt)
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl ReconnectPolicy {
    /// Create a policy with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    /// Set the delay before the first reconnect attempt.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap on exponential growth.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Deterministic delay for a given attempt number (0-indexed), capped at
    /// `max_delay`.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        // Cast is safe: attempts saturate far below i32::MAX in practice.
        #[allow(clippy::cast_possible_wrap)]
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay for a given attempt number.
    ///
    /// Multiplies the base delay by a random factor in `[0.5, 1.0]` so a
    /// fleet of clients recovering from the same outage does not reconnect in
    /// lockstep.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.base_delay_for_attempt(attempt);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(base.as_secs_f64() * jitter)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_grows_exponentially() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.base_delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn base_delay_is_capped() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_multiplier(10.0)
            .with_max_delay(Duration::from_secs(2));

        assert_eq!(policy.base_delay_for_attempt(6), Duration::from_secs(2));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));

        for attempt in 0..8 {
            let base = policy.base_delay_for_attempt(attempt);
            for _ in 0..100 {
                let jittered = policy.delay_for_attempt(attempt);
                assert!(jittered <= base);
                assert!(jittered.as_secs_f64() >= base.as_secs_f64() * 0.5 - f64::EPSILON);
            }
        }
    }
}
