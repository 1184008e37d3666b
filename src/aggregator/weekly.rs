use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Listing, Series};

const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Rows carrying a creation time.
pub trait Dated {
    fn created_at(&self) -> Option<DateTime<Utc>>;
}

impl Dated for Listing {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Dated for DateTime<Utc> {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(*self)
    }
}

/// Per-week counts, oldest week first. `labels[i]` is `"Week {i + 1}"`; the
/// last entry is the week ending at the reference time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyCounts {
    pub labels: Vec<String>,
    pub counts: Vec<u64>,
}

impl WeeklyCounts {
    pub fn empty(window_weeks: u32) -> Self {
        Self {
            labels: (1..=window_weeks).map(|w| format!("Week {w}")).collect(),
            counts: vec![0; window_weeks as usize],
        }
    }

    /// Count for 1-based week number, zero when out of range.
    #[cfg(test)]
    pub fn week(&self, week: u32) -> u64 {
        week.checked_sub(1)
            .and_then(|i| self.counts.get(i as usize))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn to_series(&self) -> Series {
        Series::from_pairs(
            self.labels
                .iter()
                .cloned()
                .zip(self.counts.iter().map(|n| *n as f64)),
        )
    }
}

/// Whole weeks between `created_at` and `reference`, floored. Future rows
/// produce negative values.
pub fn weeks_before(reference: DateTime<Utc>, created_at: DateTime<Utc>) -> i64 {
    (reference - created_at).num_milliseconds().div_euclid(WEEK_MS)
}

/// Count rows into the `window_weeks` weeks preceding `reference`.
///
/// A row `d` whole weeks old lands in week `window_weeks - d`. Undated rows,
/// future-dated rows and rows `window_weeks` or more weeks old are dropped.
pub fn bucket_by_week<R: Dated>(rows: &[R], reference: DateTime<Utc>, window_weeks: u32) -> WeeklyCounts {
    let mut out = WeeklyCounts::empty(window_weeks);
    let window = i64::from(window_weeks);

    for created in rows.iter().filter_map(Dated::created_at) {
        let weeks = weeks_before(reference, created);
        if (0..window).contains(&weeks) {
            let idx = (window - weeks - 1) as usize;
            out.counts[idx] += 1;
        }
    }

    out
}
