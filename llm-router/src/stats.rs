use std::time::Instant;

use serde::Serialize;

/// Consecutive failures before a provider is considered unhealthy.
const UNHEALTHY_CONSECUTIVE_FAILURES: u32 = 3;
/// Window in which a poor success rate keeps a provider unhealthy.
const RECENT_ERROR_WINDOW_SECS: u64 = 180;
/// Quiet period after which consecutive failures are forgiven.
const SELF_HEAL_SECS: u64 = 300;

/// Mutable call statistics for one provider. Shared behind a mutex; the
/// router reads snapshots for weighting and metrics.
#[derive(Debug, Default)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub total_latency_ms: f64,
    pub last_error_at: Option<Instant>,
}

/// Immutable copy used for weight computation and `/metrics`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub average_latency_ms: f64,
    pub success_rate: f64,
}

impl ProviderStats {
    pub fn record_success(&mut self, duration_ms: f64) {
        self.total_requests += 1;
        self.successes += 1;
        self.total_latency_ms += duration_ms;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, duration_ms: f64) {
        self.total_requests += 1;
        self.failures += 1;
        self.total_latency_ms += duration_ms;
        self.consecutive_failures += 1;
        self.last_error_at = Some(Instant::now());
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let total = self.total_requests as f64;
        self.total_latency_ms / total
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successes as f64 / self.total_requests as f64;
        rate
    }

    /// Health check with self-healing: a provider quiet for five minutes has
    /// its consecutive-failure count reset before evaluation.
    pub fn is_healthy(&mut self) -> bool {
        if let Some(last_error) = self.last_error_at {
            if last_error.elapsed().as_secs() >= SELF_HEAL_SECS {
                self.consecutive_failures = 0;
            }
        }

        if self.consecutive_failures >= UNHEALTHY_CONSECUTIVE_FAILURES {
            return false;
        }

        // A recent error plus a poor overall rate marks the provider bad
        if self.total_requests >= 3 && self.success_rate() < 0.5 {
            if let Some(last_error) = self.last_error_at {
                if last_error.elapsed().as_secs() < RECENT_ERROR_WINDOW_SECS {
                    return false;
                }
            }
        }

        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests,
            successes: self.successes,
            failures: self.failures,
            consecutive_failures: self.consecutive_failures,
            average_latency_ms: self.average_latency_ms(),
            success_rate: self.success_rate(),
        }
    }
}
