//! Exponential backoff with jitter for pull retries.

use std::time::Duration;

use rand::Rng;

/// Retry schedule for registry pulls.
///
/// Delays grow as `base * factor^attempt`, capped, with a symmetric
/// random jitter applied so a fleet of nodes does not hammer a registry
/// in lock-step.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth factor between retries.
    pub factor: f64,
    /// Jitter fraction applied to each delay.
    pub jitter: f64,
    /// Upper bound for any delay.
    pub cap: Duration,
    /// Total number of attempts (including the first).
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            factor: 1.6,
            jitter: 0.2,
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Returns the jittered delay before retry number `attempt`
    /// (0 = the delay after the first failure).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exact = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = exact.min(self.cap.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_by_factor() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_secs_f64(2.0));
        assert_eq!(policy.delay(1), Duration::from_secs_f64(3.2));
        let third = policy.delay(2).as_secs_f64();
        assert!((third - 5.12).abs() < 1e-9);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(30), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = BackoffPolicy::default();
        for _ in 0..64 {
            let delay = policy.delay(0).as_secs_f64();
            assert!((1.6..=2.4).contains(&delay), "delay {delay} out of band");
        }
    }
}
