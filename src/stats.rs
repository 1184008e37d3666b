//! Dashboard statistics: one fetch plus one aggregation per unit.
//!
//! Units are independent. A unit whose fetch fails is logged, recorded in
//! [`HealthState`], and answered with the aggregation of zero rows, so its
//! zero-filled shape still reaches the caller.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregator::{
    bucket_by_field, bucket_by_price_range, bucket_by_week, estimate_time_to_sell, BucketCounts,
    PriceRangeCounts, SaleSample, TimeToSell, WeeklyCounts,
};
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::known_keys::{
    LISTING_CATEGORIES, LISTING_CONDITIONS, LISTING_STATUSES, PRICE_MODES, TRANSACTION_STATUSES,
    VIOLATION_TYPES,
};
use crate::config::tables;
use crate::error::Result;
use crate::fetcher::{fetch_as, Direction, RowQuery, RowSource};
use crate::types::{Listing, Person, Report, Series, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatUnit {
    UsersBySchool,
    AvailableByType,
    SoldByType,
    TransactionsByStatus,
    ItemsByStatus,
    ReportsByViolation,
    PriceRanges,
    Conditions,
    PriceModes,
    ListingTrend,
    TimeToSell,
}

impl StatUnit {
    pub const ALL: [StatUnit; 11] = [
        StatUnit::UsersBySchool,
        StatUnit::AvailableByType,
        StatUnit::SoldByType,
        StatUnit::TransactionsByStatus,
        StatUnit::ItemsByStatus,
        StatUnit::ReportsByViolation,
        StatUnit::PriceRanges,
        StatUnit::Conditions,
        StatUnit::PriceModes,
        StatUnit::ListingTrend,
        StatUnit::TimeToSell,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatUnit::UsersBySchool => "users_by_school",
            StatUnit::AvailableByType => "available_by_type",
            StatUnit::SoldByType => "sold_by_type",
            StatUnit::TransactionsByStatus => "transactions_by_status",
            StatUnit::ItemsByStatus => "items_by_status",
            StatUnit::ReportsByViolation => "reports_by_violation",
            StatUnit::PriceRanges => "price_ranges",
            StatUnit::Conditions => "conditions",
            StatUnit::PriceModes => "price_modes",
            StatUnit::ListingTrend => "listing_trend",
            StatUnit::TimeToSell => "time_to_sell",
        }
    }

    /// The single read this unit makes.
    pub fn query(&self) -> RowQuery {
        match self {
            StatUnit::UsersBySchool => RowQuery::new(tables::PEOPLE).select("stud_school"),
            StatUnit::AvailableByType => RowQuery::new(tables::LISTINGS)
                .select("item_type")
                .neq("item_status", "sold"),
            StatUnit::SoldByType => RowQuery::new(tables::LISTINGS)
                .select("item_type")
                .eq("item_status", "sold"),
            StatUnit::TransactionsByStatus => RowQuery::new(tables::TRANSACTIONS).select("status"),
            StatUnit::ItemsByStatus => RowQuery::new(tables::LISTINGS).select("item_status"),
            StatUnit::ReportsByViolation => RowQuery::new(tables::REPORTS).select("violation_type"),
            StatUnit::PriceRanges => RowQuery::new(tables::LISTINGS)
                .select("item_price, item_price_type, item_price_min, item_price_max"),
            StatUnit::Conditions => RowQuery::new(tables::LISTINGS).select("item_condition"),
            StatUnit::PriceModes => RowQuery::new(tables::LISTINGS).select("item_price_type"),
            StatUnit::ListingTrend => RowQuery::new(tables::LISTINGS)
                .select("created_at")
                .order("created_at", Direction::Ascending),
            StatUnit::TimeToSell => RowQuery::new(tables::TRANSACTIONS)
                .select("updated_at, item:item_uuid(item_price_type, created_at)")
                .eq("status", "completed"),
        }
    }
}

impl std::fmt::Display for StatUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A unit's output, flagged when its fetch failed and the zero shape was used.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub data: T,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub users_by_school: Outcome<BucketCounts>,
    pub available_by_type: Outcome<BucketCounts>,
    pub sold_by_type: Outcome<BucketCounts>,
    pub transactions_by_status: Outcome<BucketCounts>,
    pub items_by_status: Outcome<BucketCounts>,
    pub reports_by_violation: Outcome<BucketCounts>,
    pub price_ranges: Outcome<PriceRangeCounts>,
    pub conditions: Outcome<BucketCounts>,
    pub price_modes: Outcome<BucketCounts>,
    pub listing_trend: Outcome<WeeklyCounts>,
    pub time_to_sell: Outcome<TimeToSell>,
}

/// One chart's worth of data for the presenter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub unit: StatUnit,
    pub degraded: bool,
    /// Sum of `values`.
    pub total: f64,
    #[serde(flatten)]
    pub series: Series,
}

impl Dashboard {
    /// Every unit as a `{labels, values}` series, in catalogue order.
    pub fn charts(&self) -> Vec<Chart> {
        fn chart<T>(unit: StatUnit, o: &Outcome<T>, series: impl Fn(&T) -> Series) -> Chart {
            let series = series(&o.data);
            Chart { unit, degraded: o.degraded, total: series.total(), series }
        }
        StatUnit::ALL
            .iter()
            .map(|&unit| match unit {
                StatUnit::UsersBySchool => chart(unit, &self.users_by_school, BucketCounts::to_series),
                StatUnit::AvailableByType => chart(unit, &self.available_by_type, BucketCounts::to_series),
                StatUnit::SoldByType => chart(unit, &self.sold_by_type, BucketCounts::to_series),
                StatUnit::TransactionsByStatus => {
                    chart(unit, &self.transactions_by_status, BucketCounts::to_series)
                }
                StatUnit::ItemsByStatus => chart(unit, &self.items_by_status, BucketCounts::to_series),
                StatUnit::ReportsByViolation => {
                    chart(unit, &self.reports_by_violation, BucketCounts::to_series)
                }
                StatUnit::PriceRanges => chart(unit, &self.price_ranges, PriceRangeCounts::to_series),
                StatUnit::Conditions => chart(unit, &self.conditions, BucketCounts::to_series),
                StatUnit::PriceModes => chart(unit, &self.price_modes, BucketCounts::to_series),
                StatUnit::ListingTrend => chart(unit, &self.listing_trend, WeeklyCounts::to_series),
                StatUnit::TimeToSell => chart(unit, &self.time_to_sell, TimeToSell::to_series),
            })
            .collect()
    }

    /// Units that fell back to their zero shape.
    pub fn degraded_units(&self) -> Vec<StatUnit> {
        self.charts()
            .into_iter()
            .filter(|c| c.degraded)
            .map(|c| c.unit)
            .collect()
    }
}

pub struct StatsService {
    rows: Arc<dyn RowSource>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    window_weeks: u32,
}

impl StatsService {
    pub fn new(
        rows: Arc<dyn RowSource>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        window_weeks: u32,
    ) -> Self {
        Self { rows, health, latency, window_weeks }
    }

    async fn load<R: DeserializeOwned>(&self, unit: StatUnit) -> Result<Vec<R>> {
        let started = Instant::now();
        let result = fetch_as::<R>(self.rows.as_ref(), &unit.query()).await;
        let elapsed = started.elapsed();
        self.latency.record(elapsed);
        if let Ok(rows) = &result {
            debug!(stat = unit.name(), rows = rows.len(), elapsed_ms = elapsed.as_millis() as u64, "Stat rows loaded");
        }
        result
    }

    async fn run<R, T>(&self, unit: StatUnit, aggregate: impl FnOnce(&[R]) -> T) -> Outcome<T>
    where
        R: DeserializeOwned,
    {
        match self.load::<R>(unit).await {
            Ok(rows) => {
                self.health.record_unit_ok(unit.name());
                Outcome { data: aggregate(&rows), degraded: false }
            }
            Err(e) => {
                warn!(stat = unit.name(), "Fetch failed, reporting empty result: {e}");
                self.health.record_unit_failure(unit.name(), &e.to_string());
                let empty: Vec<R> = Vec::new();
                Outcome { data: aggregate(empty.as_slice()), degraded: true }
            }
        }
    }

    pub async fn users_by_school(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::UsersBySchool, |rows: &[Person]| {
            bucket_by_field(rows, |p| p.stud_school.as_deref(), &[])
        })
        .await
    }

    pub async fn available_by_type(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::AvailableByType, |rows: &[Listing]| {
            bucket_by_field(rows, |l| l.item_type.as_deref(), LISTING_CATEGORIES)
        })
        .await
    }

    pub async fn sold_by_type(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::SoldByType, |rows: &[Listing]| {
            bucket_by_field(rows, |l| l.item_type.as_deref(), LISTING_CATEGORIES)
        })
        .await
    }

    pub async fn transactions_by_status(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::TransactionsByStatus, |rows: &[Transaction]| {
            bucket_by_field(rows, |t| t.status.as_deref(), TRANSACTION_STATUSES)
        })
        .await
    }

    pub async fn items_by_status(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::ItemsByStatus, |rows: &[Listing]| {
            bucket_by_field(rows, |l| l.item_status.as_deref(), LISTING_STATUSES)
        })
        .await
    }

    pub async fn reports_by_violation(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::ReportsByViolation, |rows: &[Report]| {
            bucket_by_field(rows, |r| r.violation_type.as_deref(), VIOLATION_TYPES)
        })
        .await
    }

    pub async fn price_ranges(&self) -> Outcome<PriceRangeCounts> {
        self.run(StatUnit::PriceRanges, |rows: &[Listing]| bucket_by_price_range(rows))
            .await
    }

    pub async fn conditions(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::Conditions, |rows: &[Listing]| {
            bucket_by_field(rows, |l| l.item_condition.as_deref(), LISTING_CONDITIONS)
        })
        .await
    }

    /// Listings with no price mode count as fixed.
    pub async fn price_modes(&self) -> Outcome<BucketCounts> {
        self.run(StatUnit::PriceModes, |rows: &[Listing]| {
            bucket_by_field(
                rows,
                |l| Some(l.item_price_type.as_deref().unwrap_or("fixed")),
                PRICE_MODES,
            )
        })
        .await
    }

    pub async fn listing_trend(&self, reference: DateTime<Utc>) -> Outcome<WeeklyCounts> {
        let window = self.window_weeks;
        self.run(StatUnit::ListingTrend, |rows: &[Listing]| {
            bucket_by_week(rows, reference, window)
        })
        .await
    }

    pub async fn time_to_sell(&self) -> Outcome<TimeToSell> {
        self.run(StatUnit::TimeToSell, |rows: &[Transaction]| {
            let samples: Vec<SaleSample> = rows.iter().map(SaleSample::from_transaction).collect();
            estimate_time_to_sell(&samples)
        })
        .await
    }

    /// Run every unit concurrently and wait for all of them.
    pub async fn load_dashboard(&self) -> Dashboard {
        let started = Instant::now();
        let generated_at = Utc::now();

        let (
            users_by_school,
            available_by_type,
            sold_by_type,
            transactions_by_status,
            items_by_status,
            reports_by_violation,
            price_ranges,
            conditions,
            price_modes,
            listing_trend,
            time_to_sell,
        ) = tokio::join!(
            self.users_by_school(),
            self.available_by_type(),
            self.sold_by_type(),
            self.transactions_by_status(),
            self.items_by_status(),
            self.reports_by_violation(),
            self.price_ranges(),
            self.conditions(),
            self.price_modes(),
            self.listing_trend(generated_at),
            self.time_to_sell(),
        );

        let dashboard = Dashboard {
            generated_at,
            users_by_school,
            available_by_type,
            sold_by_type,
            transactions_by_status,
            items_by_status,
            reports_by_violation,
            price_ranges,
            conditions,
            price_modes,
            listing_trend,
            time_to_sell,
        };

        self.health.record_dashboard();
        let degraded = dashboard.degraded_units();
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            degraded = degraded.len(),
            users = dashboard.users_by_school.data.total(),
            listings = dashboard.items_by_status.data.total(),
            transactions = dashboard.transactions_by_status.data.total(),
            reports = dashboard.reports_by_violation.data.total(),
            recent_listings = dashboard.listing_trend.data.total(),
            "Dashboard loaded"
        );
        dashboard
    }
}
