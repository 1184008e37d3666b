use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{PriceMode, Series, Transaction};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// One completed sale: when it completed, when its listing was created, and
/// the listing's price mode (absent = fixed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaleSample {
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub price_mode: Option<String>,
}

impl SaleSample {
    /// Completion is the transaction's last update; creation and price mode
    /// come from the embedded listing.
    pub fn from_transaction(tx: &Transaction) -> Self {
        let item = tx.item.as_ref();
        Self {
            completed_at: tx.updated_at,
            created_at: item.and_then(|i| i.created_at),
            price_mode: item.and_then(|i| i.item_price_type.clone()),
        }
    }

    /// Whole days from creation to completion, floored. `None` when a
    /// timestamp is missing or the sale predates the listing.
    pub fn elapsed_days(&self) -> Option<i64> {
        let (done, created) = (self.completed_at?, self.created_at?);
        let days = (done - created).num_milliseconds().div_euclid(DAY_MS);
        (days >= 0).then_some(days)
    }
}

/// One value per known price mode; all three are always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ModeMap<T> {
    pub fixed: T,
    pub negotiable: T,
    pub free: T,
}

impl<T: Copy> ModeMap<T> {
    pub fn get(&self, mode: PriceMode) -> T {
        match mode {
            PriceMode::Fixed => self.fixed,
            PriceMode::Negotiable => self.negotiable,
            PriceMode::Free => self.free,
        }
    }

    pub fn get_mut(&mut self, mode: PriceMode) -> &mut T {
        match mode {
            PriceMode::Fixed => &mut self.fixed,
            PriceMode::Negotiable => &mut self.negotiable,
            PriceMode::Free => &mut self.free,
        }
    }
}

/// Average whole days to sell, per price mode, with the sample count behind
/// each average. Zero-sample modes report an average of 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeToSell {
    pub avg_days: ModeMap<f64>,
    pub counts: ModeMap<u64>,
}

impl TimeToSell {
    pub fn to_series(&self) -> Series {
        Series::from_pairs(PriceMode::ALL.iter().map(|m| (m.as_str(), self.avg_days.get(*m))))
    }
}

fn round_one_decimal(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Group sale samples by price mode and average their elapsed days.
///
/// Samples missing a timestamp, with negative elapsed time, or with a price
/// mode outside the known three are skipped.
pub fn estimate_time_to_sell(samples: &[SaleSample]) -> TimeToSell {
    let mut sums: ModeMap<i64> = ModeMap::default();
    let mut out = TimeToSell::default();

    for sample in samples {
        let Some(days) = sample.elapsed_days() else {
            continue;
        };
        let Some(mode) = PriceMode::parse(sample.price_mode.as_deref().unwrap_or("fixed")) else {
            continue;
        };
        *sums.get_mut(mode) += days;
        *out.counts.get_mut(mode) += 1;
    }

    for mode in PriceMode::ALL {
        let n = out.counts.get(mode);
        if n > 0 {
            *out.avg_days.get_mut(mode) = round_one_decimal(sums.get(mode) as f64 / n as f64);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn sample(created: i64, completed: i64, mode: Option<&str>) -> SaleSample {
        SaleSample {
            completed_at: Some(day(completed)),
            created_at: Some(day(created)),
            price_mode: mode.map(str::to_string),
        }
    }

    #[test]
    fn five_day_fixed_sale() {
        let out = estimate_time_to_sell(&[sample(0, 5, Some("fixed"))]);
        assert_eq!(out.avg_days.fixed, 5.0);
        assert_eq!(out.counts.fixed, 1);
        assert_eq!(out.counts.negotiable, 0);
        assert_eq!(out.avg_days.negotiable, 0.0);
    }

    #[test]
    fn negative_samples_do_not_corrupt_other_groups() {
        let out = estimate_time_to_sell(&[
            sample(10, 2, Some("fixed")),
            sample(0, 4, Some("negotiable")),
            sample(0, 6, Some("negotiable")),
        ]);
        assert_eq!(out.counts.fixed, 0);
        assert_eq!(out.avg_days.fixed, 0.0);
        assert_eq!(out.counts.negotiable, 2);
        assert_eq!(out.avg_days.negotiable, 5.0);
    }

    #[test]
    fn absent_mode_counts_as_fixed_and_unknown_mode_is_skipped() {
        let out = estimate_time_to_sell(&[sample(0, 3, None), sample(0, 9, Some("barter"))]);
        assert_eq!(out.counts.fixed, 1);
        assert_eq!(out.avg_days.fixed, 3.0);
        assert_eq!(out.counts.negotiable + out.counts.free, 0);
    }

    #[test]
    fn missing_timestamps_are_skipped() {
        let mut no_created = sample(0, 3, Some("free"));
        no_created.created_at = None;
        let mut no_completed = sample(0, 3, Some("free"));
        no_completed.completed_at = None;
        let out = estimate_time_to_sell(&[no_created, no_completed]);
        assert_eq!(out, TimeToSell::default());
    }

    #[test]
    fn partial_days_floor_and_average_rounds() {
        let partial = SaleSample {
            created_at: Some(day(0)),
            completed_at: Some(day(1) + Duration::hours(23)),
            price_mode: Some("free".into()),
        };
        assert_eq!(partial.elapsed_days(), Some(1));

        // (1 + 1 + 2) / 3 = 1.333.. -> 1.3
        let out = estimate_time_to_sell(&[partial.clone(), partial, sample(0, 2, Some("free"))]);
        assert_eq!(out.avg_days.free, 1.3);
        assert_eq!(out.counts.free, 3);
    }

    #[test]
    fn repeated_runs_agree() {
        let samples = [
            sample(0, 4, Some("fixed")),
            sample(0, 7, None),
            sample(2, 3, Some("negotiable")),
            sample(5, 1, Some("free")),
        ];
        let first = estimate_time_to_sell(&samples);
        let second = estimate_time_to_sell(&samples);
        assert_eq!(first, second);
        assert_eq!(first.counts.fixed, 2);
        assert_eq!(first.avg_days.fixed, 5.5);
    }

    #[test]
    fn from_transaction_reads_embedded_listing() {
        let tx: Transaction = serde_json::from_str(
            r#"{"updated_at":"2024-01-06T00:00:00Z","item":{"item_price_type":"negotiable","created_at":"2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        let s = SaleSample::from_transaction(&tx);
        assert_eq!(s.elapsed_days(), Some(5));
        assert_eq!(s.price_mode.as_deref(), Some("negotiable"));

        let bare = SaleSample::from_transaction(&Transaction::default());
        assert_eq!(bare.elapsed_days(), None);
    }

    #[test]
    fn zero_shape_serializes_all_modes() {
        let json = serde_json::to_value(TimeToSell::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "avg_days": {"fixed": 0.0, "negotiable": 0.0, "free": 0.0},
                "counts": {"fixed": 0, "negotiable": 0, "free": 0}
            })
        );
        let series = TimeToSell::default().to_series();
        assert_eq!(series.labels, vec!["fixed", "negotiable", "free"]);
    }
}
