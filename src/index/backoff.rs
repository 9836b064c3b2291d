use std::time::Duration;

/// Delay between polls. Sits at the base interval while things work, doubles on
/// failure and widens by a larger factor when the upstream rate-limits us.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    rate_limit_factor: u32,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, rate_limit_factor: u32) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            rate_limit_factor: rate_limit_factor.max(2),
            current: base,
            failures: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) -> Duration {
        self.current = self.base;
        self.failures = 0;
        self.current
    }

    pub fn on_failure(&mut self) -> Duration {
        self.failures += 1;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }

    /// A server-provided `Retry-After` wins if it asks for longer, the cap still applies.
    pub fn on_rate_limited(&mut self, retry_after: Option<Duration>) -> Duration {
        self.failures += 1;
        let widened = self.current.saturating_mul(self.rate_limit_factor);
        let wanted = retry_after.map_or(widened, |r| widened.max(r));
        self.current = wanted.min(self.max);
        self.current
    }
}
