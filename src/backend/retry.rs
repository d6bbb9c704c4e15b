use std::time::Duration;

/// Retry schedule for the primary backend.
///
/// `attempts` counts every try, the first included. The wait before
/// attempt `n + 1` is `base_delay * 2^(n - 1)`, optionally jittered into
/// `[0.75, 1.25]` of that value, then capped at `max_delay`.
///
/// Jitter is deterministic: the golden-ratio fraction of the attempt number
/// spreads successive waits without a random source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once and never waits.
    pub fn no_retry() -> Self {
        RetryPolicy {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Attempts actually made; zero is treated as one.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Wait after failed attempt `attempt` (1-based).
    ///
    /// Returns `None` once no attempts remain.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts() {
            return None;
        }

        let exp = (attempt - 1).min(31) as i32;
        let mut ms = self.base_delay.as_millis() as f64 * 2f64.powi(exp);

        if self.jitter {
            let factor = 0.75 + 0.5 * ((attempt as f64 * 0.618_033_988) % 1.0);
            ms *= factor;
        }

        let capped = ms.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}
