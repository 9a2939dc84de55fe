//! Timing-anomaly detection.
//!
//! Keeps a rolling mean/variance baseline per operation name (Welford's
//! online update) and flags calls whose latency deviates beyond a
//! configured number of standard deviations. Baselines for idle
//! operations are pruned so the arena stays bounded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Samples required before an operation's baseline can flag anything.
const MIN_BASELINE_SAMPLES: u64 = 10;

/// Baselines idle longer than this are dropped.
const BASELINE_TTL: Duration = Duration::from_secs(3600);

struct OpStats {
    count: u64,
    mean: f64,
    m2: f64,
    last_seen: Instant,
}

impl OpStats {
    fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            last_seen: Instant::now(),
        }
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.last_seen = Instant::now();
    }
}

pub struct TimingBaselines {
    sigma_threshold: f64,
    ops: Mutex<HashMap<String, OpStats>>,
}

/// A latency flagged against its baseline.
#[derive(Clone, Debug)]
pub struct TimingDeviation {
    pub operation: String,
    pub latency_ms: f64,
    pub mean_ms: f64,
    pub sigma: f64,
}

impl TimingBaselines {
    pub fn new(sigma_threshold: f64) -> Self {
        Self {
            sigma_threshold,
            ops: Mutex::new(HashMap::new()),
        }
    }

    /// Record one observed latency. Returns the deviation when the value
    /// falls outside the configured sigma band of a warmed-up baseline.
    pub fn record(&self, operation: &str, latency: Duration) -> Option<TimingDeviation> {
        let ms = latency.as_secs_f64() * 1000.0;

        let mut ops = self.ops.lock().unwrap();
        ops.retain(|_, stats| stats.last_seen.elapsed() < BASELINE_TTL);

        let stats = ops
            .entry(operation.to_string())
            .or_insert_with(OpStats::new);

        let mut deviation = None;
        if stats.count >= MIN_BASELINE_SAMPLES {
            let std_dev = stats.std_dev();
            if std_dev > 0.0 {
                let sigma = (ms - stats.mean).abs() / std_dev;
                if sigma > self.sigma_threshold {
                    deviation = Some(TimingDeviation {
                        operation: operation.to_string(),
                        latency_ms: ms,
                        mean_ms: stats.mean,
                        sigma,
                    });
                }
            }
        }

        stats.update(ms);
        deviation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_never_flags() {
        let baselines = TimingBaselines::new(3.0);
        for _ in 0..5 {
            assert!(baselines
                .record("op", Duration::from_millis(100))
                .is_none());
        }
        // Even a wild value cannot flag before the minimum sample count.
        assert!(baselines.record("op", Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_outlier_flags_after_baseline() {
        let baselines = TimingBaselines::new(3.0);
        // Stable-ish baseline with a little jitter so std_dev > 0.
        for i in 0..20 {
            let jitter = (i % 3) as u64;
            baselines.record("op", Duration::from_millis(100 + jitter));
        }
        let deviation = baselines
            .record("op", Duration::from_millis(500))
            .expect("500ms against a ~100ms baseline should flag");
        assert_eq!(deviation.operation, "op");
        assert!(deviation.sigma > 3.0);
    }

    #[test]
    fn test_baselines_are_per_operation() {
        let baselines = TimingBaselines::new(3.0);
        for i in 0..20 {
            let jitter = (i % 3) as u64;
            baselines.record("fast", Duration::from_millis(10 + jitter));
        }
        // A slow op with no baseline of its own never flags.
        assert!(baselines
            .record("slow", Duration::from_millis(2000))
            .is_none());
    }
}
