//! In-memory histogram of upstream fetch latency.
//! Every row-source read made for a statistic unit is recorded.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Values stored in microseconds. `None` only if the histogram bounds were rejected.
pub struct LatencyStats {
    inner: Mutex<Option<hdrhistogram::Histogram<u64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl LatencyStats {
    /// Tracks 1us to 10 minutes, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000_000, 3).ok();
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, u128::from(u64::MAX)) as u64;
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                h.saturating_record(us);
            }
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(guard) = self.inner.lock() else {
            return LatencySnapshot::default();
        };
        let Some(h) = guard.as_ref() else {
            return LatencySnapshot::default();
        };
        if h.len() == 0 {
            return LatencySnapshot::default();
        }
        let ms = |us: u64| us as f64 / 1000.0;
        LatencySnapshot {
            samples: h.len(),
            p50_ms: Some(ms(h.value_at_quantile(0.5))),
            p95_ms: Some(ms(h.value_at_quantile(0.95))),
            p99_ms: Some(ms(h.value_at_quantile(0.99))),
            max_ms: Some(ms(h.max())),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let snap = LatencyStats::new().snapshot();
        assert_eq!(snap, LatencySnapshot::default());
    }

    #[test]
    fn percentiles_track_recorded_values() {
        let latency = LatencyStats::new();
        for ms in 1..=100u64 {
            latency.record(Duration::from_millis(ms));
        }
        let snap = latency.snapshot();
        assert_eq!(snap.samples, 100);
        let p50 = snap.p50_ms.unwrap();
        assert!((49.0..=51.0).contains(&p50), "p50={p50}");
        assert!(snap.p99_ms.unwrap() >= snap.p95_ms.unwrap());
        assert!(snap.max_ms.unwrap() >= 99.0);
    }
}
