mod aggregator;
mod api;
mod auth;
mod config;
mod error;
mod fetcher;
mod moderation;
mod notify;
mod stats;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::auth::SupabaseIdentity;
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::SupabaseRows;
use crate::moderation::Moderator;
use crate::notify::TableNotifier;
use crate::stats::StatsService;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    if cfg.service_role_key.is_none() {
        warn!("SUPABASE_SERVICE_ROLE_KEY not set; admin data reads use the anon key and are subject to row-level security");
    }

    // --- Remote store collaborators ---
    let store = Arc::new(SupabaseRows::new(&cfg, cfg.data_key())?);
    let identity = Arc::new(SupabaseIdentity::new(&cfg, store.clone())?);
    let notifier = Arc::new(TableNotifier::new(store.clone()));
    info!("Remote store at {}", cfg.rest_url());

    // --- Observability ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Services ---
    let stats = Arc::new(StatsService::new(
        store.clone(),
        Arc::clone(&health),
        Arc::clone(&latency),
        cfg.trend_window_weeks,
    ));
    let moderator = Arc::new(Moderator::new(store.clone(), store.clone(), notifier));

    // --- HTTP API server ---
    let api_state = ApiState {
        rows: store,
        identity,
        stats,
        moderator,
        health,
        latency,
    };
    let app = router(api_state)
        .layer(cors_layer(&cfg.cors_origins))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        "HTTP API listening on {bind_addr} (trend window: {} weeks, fetch timeout: {}s)",
        cfg.trend_window_weeks,
        cfg.fetch_timeout.as_secs(),
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Any origin when none are configured; unparsable origins are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
