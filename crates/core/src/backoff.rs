use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a ceiling and additive jitter.
///
/// The first delay is `base`; each following one doubles until `ceiling`.
/// Jitter is only ever added, so a delay is never shorter than the schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    jitter_ratio: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            jitter_ratio: 0.1,
            attempt: 0,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let scheduled = self.scheduled(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        jittered(scheduled, self.jitter_ratio)
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn scheduled(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.ceiling)
    }
}

/// `delay` plus a random extra of at most `ratio * delay`.
pub fn jittered(delay: Duration, ratio: f64) -> Duration {
    let max_extra_ms = (delay.as_millis() as f64 * ratio) as u64;
    if max_extra_ms == 0 {
        return delay;
    }
    let extra = rand::rng().random_range(0..=max_extra_ms);
    delay + Duration::from_millis(extra)
}
