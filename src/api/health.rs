//! Shared health state for the /health endpoint.
//! Updated by the stats service after every statistic unit runs.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

/// Last result of one statistic unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub ok: bool,
    /// Millisecond UTC epoch of the run.
    pub at_ms: i64,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct HealthState {
    /// Dashboards fully assembled since start.
    pub dashboards_served: AtomicU64,
    /// Millisecond timestamp of last dashboard load (0 = none).
    pub last_dashboard_at_ms: AtomicI64,
    /// Total unit runs that fell back to an empty result.
    pub degraded_units: AtomicU64,
    units: DashMap<&'static str, UnitOutcome>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unit_ok(&self, unit: &'static str) {
        self.units.insert(
            unit,
            UnitOutcome { ok: true, at_ms: Utc::now().timestamp_millis(), error: None },
        );
    }

    pub fn record_unit_failure(&self, unit: &'static str, error: &str) {
        self.degraded_units.fetch_add(1, Ordering::Relaxed);
        self.units.insert(
            unit,
            UnitOutcome {
                ok: false,
                at_ms: Utc::now().timestamp_millis(),
                error: Some(error.to_string()),
            },
        );
    }

    pub fn record_dashboard(&self) {
        self.dashboards_served.fetch_add(1, Ordering::Relaxed);
        self.last_dashboard_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn dashboards_served(&self) -> u64 {
        self.dashboards_served.load(Ordering::Relaxed)
    }

    pub fn last_dashboard_at_ms(&self) -> i64 {
        self.last_dashboard_at_ms.load(Ordering::Relaxed)
    }

    pub fn degraded_units(&self) -> u64 {
        self.degraded_units.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn unit(&self, unit: &str) -> Option<UnitOutcome> {
        self.units.get(unit).map(|o| o.clone())
    }

    /// Units whose most recent run failed, sorted by name.
    pub fn failing_units(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self
            .units
            .iter()
            .filter(|e| !e.value().ok)
            .map(|e| *e.key())
            .collect();
        out.sort_unstable();
        out
    }

    pub fn units(&self) -> Vec<(&'static str, UnitOutcome)> {
        let mut out: Vec<_> = self
            .units
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_then_recovery() {
        let health = HealthState::new();
        health.record_unit_failure("price_ranges", "503");
        health.record_unit_ok("conditions");

        assert_eq!(health.failing_units(), vec!["price_ranges"]);
        assert_eq!(health.degraded_units(), 1);
        assert_eq!(health.unit("price_ranges").unwrap().error.as_deref(), Some("503"));

        health.record_unit_ok("price_ranges");
        assert!(health.failing_units().is_empty());
        assert_eq!(health.degraded_units(), 1, "degraded counter is cumulative");
        assert_eq!(health.units().len(), 2);
    }

    #[test]
    fn dashboard_counter() {
        let health = HealthState::new();
        assert_eq!(health.last_dashboard_at_ms(), 0);
        health.record_dashboard();
        health.record_dashboard();
        assert_eq!(health.dashboards_served(), 2);
        assert!(health.last_dashboard_at_ms() > 0);
    }
}
