//! Pure, single-pass reducers that turn raw rows into chart-ready buckets.
//!
//! Nothing here performs I/O or keeps state between calls: the same input
//! always yields the same output, and every function is total over its input.

pub mod buckets;
pub mod price_range;
pub mod time_to_sell;
pub mod weekly;

pub use buckets::{bucket_by_field, BucketCounts, UNKNOWN};
pub use price_range::{bucket_by_price_range, PriceRangeCounts};
pub use time_to_sell::{estimate_time_to_sell, SaleSample, TimeToSell};
pub use weekly::{bucket_by_week, WeeklyCounts};
