use std::time::Duration;

use crate::error::{AppError, Result};

/// Default HTTP port for the admin API.
pub const DEFAULT_PORT: u16 = 5001;

/// Number of weeks covered by the listing trend chart.
pub const TREND_WINDOW_WEEKS: u32 = 12;

/// Network timeout for every request against the remote store (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Listings per page in the item moderation view.
pub const ITEMS_PER_PAGE: usize = 15;

/// Path prefixes of the hosted backend.
pub const REST_PATH: &str = "/rest/v1";
pub const AUTH_PATH: &str = "/auth/v1";

/// Tables that back the dashboard.
pub mod tables {
    pub const LISTINGS: &str = "item";
    pub const TRANSACTIONS: &str = "transactions";
    pub const REPORTS: &str = "report";
    pub const PEOPLE: &str = "student";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Predefined bucket keys. Every key listed here is present in aggregator
/// output even when no row matches it.
pub mod known_keys {
    pub const LISTING_CATEGORIES: &[&str] = &[
        "clothes & accessories",
        "books & school supplies",
        "gadgets & electronics",
        "instruments & recreations",
        "crafted & collectibles",
        "sports & fitness",
    ];

    pub const LISTING_STATUSES: &[&str] = &["available", "sold", "pending", "cancelled", "reserved"];

    pub const LISTING_CONDITIONS: &[&str] = &["Brand New", "Like New", "Good", "Fair", "Poor"];

    pub const PRICE_MODES: &[&str] = &["fixed", "negotiable", "free"];

    pub const TRANSACTION_STATUSES: &[&str] = &["pending", "completed", "cancelled", "reserved"];

    pub const VIOLATION_TYPES: &[&str] = &[
        "fake listings",
        "price manipulation",
        "identity theft",
        "misinformation",
        "Non-compliance with Transaction Protocol",
        "chargeback abuse",
        "other",
    ];
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted backend (SUPABASE_URL).
    pub supabase_url: String,
    /// Public anon key (SUPABASE_KEY).
    pub supabase_key: String,
    /// Service-role key used for admin data routes (SUPABASE_SERVICE_ROLE_KEY).
    /// Falls back to the anon key when unset.
    pub service_role_key: Option<String>,
    pub log_level: String,
    pub port: u16,
    /// Weeks shown on the listing trend (TREND_WINDOW_WEEKS)
    pub trend_window_weeks: u32,
    /// Request timeout against the remote store (FETCH_TIMEOUT_SECS)
    pub fetch_timeout: Duration,
    /// Allowed CORS origins (CORS_ORIGINS, comma-separated). Empty = any.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` is this over the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Config(format!("{key} must be set")))
        };

        let supabase_url = required("SUPABASE_URL")?.trim_end_matches('/').to_string();
        let supabase_key = required("SUPABASE_KEY")?;

        Ok(Self {
            supabase_url,
            supabase_key,
            service_role_key: lookup("SUPABASE_SERVICE_ROLE_KEY").filter(|k| !k.trim().is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            port: lookup("PORT")
                .unwrap_or_else(|| DEFAULT_PORT.to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("PORT must be a valid port number".to_string()))?,
            trend_window_weeks: lookup("TREND_WINDOW_WEEKS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|w| *w > 0)
                .unwrap_or(TREND_WINDOW_WEEKS),
            fetch_timeout: Duration::from_secs(
                lookup("FETCH_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(FETCH_TIMEOUT_SECS),
            ),
            cors_origins: lookup("CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn rest_url(&self) -> String {
        format!("{}{REST_PATH}", self.supabase_url)
    }

    pub fn auth_url(&self) -> String {
        format!("{}{AUTH_PATH}", self.supabase_url)
    }

    /// Key used for admin data access.
    pub fn data_key(&self) -> &str {
        self.service_role_key.as_deref().unwrap_or(&self.supabase_key)
    }
}
