use crate::stats::StatsSnapshot;

/// Providers with this many consecutive failures never appear in a fallback
/// chain, even under the chain's more lenient criteria.
const FALLBACK_HARD_EXCLUSION: u32 = 10;

/// Static weighting profile of one provider; the dynamic part comes from its
/// live stats.
#[derive(Debug, Clone, Copy)]
pub struct ProviderWeights {
    pub base_weight: f64,
    pub performance_multiplier: f64,
    pub latency_threshold_ms: f64,
    pub max_consecutive_failures: u32,
}

impl Default for ProviderWeights {
    fn default() -> Self {
        Self {
            base_weight: 1.0,
            performance_multiplier: 1.0,
            latency_threshold_ms: 5_000.0,
            max_consecutive_failures: 5,
        }
    }
}

impl ProviderWeights {
    /// `base · success_rate · latency_factor · failure_penalty · multiplier`,
    /// clamped into `[0, 1]`.
    pub fn dynamic_weight(&self, stats: &StatsSnapshot) -> f64 {
        if stats.total_requests == 0 {
            return self.base_weight.clamp(0.0, 1.0);
        }

        // `min(1, threshold / avg_latency)`; only the failure penalty below
        // carries a floor
        let latency_factor = if stats.average_latency_ms <= self.latency_threshold_ms {
            1.0
        } else {
            self.latency_threshold_ms / stats.average_latency_ms
        };

        let failure_penalty = if stats.consecutive_failures == 0 {
            1.0
        } else {
            (1.0 - f64::from(stats.consecutive_failures)
                / f64::from(self.max_consecutive_failures))
            .max(0.1)
        };

        (self.base_weight
            * stats.success_rate
            * latency_factor
            * failure_penalty
            * self.performance_multiplier)
            .clamp(0.0, 1.0)
    }

    /// Hard exclusion from primary selection.
    pub fn should_exclude(&self, stats: &StatsSnapshot) -> bool {
        if stats.consecutive_failures >= self.max_consecutive_failures {
            return true;
        }
        if stats.total_requests >= 3 && stats.success_rate < 0.5 {
            return true;
        }
        if stats.total_requests >= 2
            && stats.average_latency_ms > self.latency_threshold_ms * 2.0
        {
            return true;
        }
        false
    }
}

/// A provider as seen by the selector: name, health, live stats, profile.
pub struct Candidate<'a> {
    pub name: &'a str,
    pub healthy: bool,
    pub stats: StatsSnapshot,
    pub weights: ProviderWeights,
}

/// Picks the maximum-weight healthy, non-excluded provider. Ties resolve to
/// the earliest-registered provider, keeping selection deterministic.
pub fn select_best(candidates: &[Candidate<'_>]) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        if !candidate.healthy || candidate.weights.should_exclude(&candidate.stats) {
            continue;
        }
        let weight = candidate.weights.dynamic_weight(&candidate.stats);
        match best {
            Some((_, best_weight)) if weight <= best_weight => {}
            _ => best = Some((candidate.name, weight)),
        }
    }
    best.map(|(name, _)| name.to_string())
}

/// Ordered fallback list by the same score, more lenient than primary
/// selection: unhealthy providers stay in unless completely dead.
pub fn fallback_order(candidates: &[Candidate<'_>], exclude: Option<&str>) -> Vec<String> {
    let mut scored: Vec<(String, f64)> = candidates
        .iter()
        .filter(|c| exclude != Some(c.name))
        .filter(|c| c.stats.consecutive_failures < FALLBACK_HARD_EXCLUSION)
        .map(|c| (c.name.to_string(), c.weights.dynamic_weight(&c.stats)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(name, _)| name).collect()
}
