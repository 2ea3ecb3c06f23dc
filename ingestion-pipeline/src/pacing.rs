use std::time::Duration;

/// Adaptive inter-request pacing: back off multiplicatively on 429s, relax
/// toward the baseline once windows succeed again.
#[derive(Debug, Clone)]
pub struct AdaptivePacer {
    baseline: Duration,
    current: Duration,
    consecutive_429: u32,
}

impl AdaptivePacer {
    pub fn new(baseline: Duration) -> Self {
        Self {
            baseline,
            current: baseline,
            consecutive_429: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.current
    }

    /// `delay ← delay · (1.5 + 0.5 · consecutive_429)`
    pub fn on_rate_limited(&mut self) {
        self.consecutive_429 += 1;
        let factor = 1.5 + 0.5 * f64::from(self.consecutive_429);
        self.current = Duration::from_secs_f64(self.current.as_secs_f64() * factor);
    }

    /// Successful window: shrink 25% toward the baseline.
    pub fn on_window_success(&mut self) {
        self.consecutive_429 = 0;
        if self.current > self.baseline {
            let reduced = self.current.as_secs_f64() * 0.75;
            self.current = Duration::from_secs_f64(reduced).max(self.baseline);
        }
    }
}
