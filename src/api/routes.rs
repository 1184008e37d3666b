use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::api::health::{HealthState, UnitOutcome};
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::auth::{authenticate, require_admin, IdentityProvider};
use crate::config::tables;
use crate::error::AppError;
use crate::fetcher::{RowQuery, RowSource};
use crate::moderation::{
    Action, ActionOutcome, ItemFilter, ItemPage, Moderator, UserFilter, UserListing,
};
use crate::stats::{Chart, Dashboard, StatsService};
use crate::types::{Listing, Report, Transaction};

#[derive(Clone)]
pub struct ApiState {
    pub rows: Arc<dyn RowSource>,
    pub identity: Arc<dyn IdentityProvider>,
    pub stats: Arc<StatsService>,
    pub moderator: Arc<Moderator>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/api/verify-admin", post(verify_admin))
        .route("/api/admin/stats", get(get_admin_stats))
        .route("/api/admin/transactions", get(get_admin_transactions))
        .route("/api/admin/users", get(get_admin_users))
        .route("/api/admin/users/:stud_id/:action", post(post_user_action))
        .route("/api/admin/items", get(get_admin_items))
        .route("/api/admin/items/:item_id", delete(delete_admin_item))
        .route("/api/admin/reports", get(get_admin_reports))
        .route("/api/admin/debug/tables", get(get_debug_tables))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub q: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub dashboards_served: u64,
    pub last_dashboard_at_ms: Option<i64>,
    pub degraded_units: u64,
    pub failing_units: Vec<&'static str>,
    pub units: Vec<UnitHealth>,
}

#[derive(Serialize)]
pub struct UnitHealth {
    pub unit: &'static str,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAdminResponse {
    pub success: bool,
    pub is_admin: bool,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub dashboard: Dashboard,
    pub charts: Vec<Chart>,
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub success: bool,
    pub data: Vec<Transaction>,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub result: ActionOutcome,
}

#[derive(Serialize)]
pub struct UsersResponse {
    pub success: bool,
    #[serde(flatten)]
    pub listing: UserListing,
}

#[derive(Serialize)]
pub struct ItemsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub page: ItemPage,
}

#[derive(Serialize)]
pub struct ItemRemovedResponse {
    pub success: bool,
    pub item: Listing,
}

#[derive(Serialize)]
pub struct ReportsResponse {
    pub success: bool,
    pub data: Vec<Report>,
}

#[derive(Serialize)]
pub struct TableInfo {
    pub count: Option<u64>,
    pub sample: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTablesResponse {
    pub success: bool,
    pub table_info: BTreeMap<&'static str, TableInfo>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let failing = state.health.failing_units();
    let last = state.health.last_dashboard_at_ms();
    Json(HealthResponse {
        status: if failing.is_empty() { "ok" } else { "degraded" },
        dashboards_served: state.health.dashboards_served(),
        last_dashboard_at_ms: (last > 0).then_some(last),
        degraded_units: state.health.degraded_units(),
        failing_units: failing,
        units: state
            .health
            .units()
            .into_iter()
            .map(|(unit, outcome)| UnitHealth { unit, outcome })
            .collect(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

async fn verify_admin(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<VerifyAdminResponse>, AppError> {
    let session = authenticate(state.identity.as_ref(), &headers).await?;
    Ok(Json(VerifyAdminResponse { success: true, is_admin: session.is_admin }))
}

async fn get_admin_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let dashboard = state.stats.load_dashboard().await;
    let charts = dashboard.charts();
    Ok(Json(StatsResponse { success: true, dashboard, charts }))
}

async fn get_admin_transactions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let data = state
        .moderator
        .search_transactions(params.q.as_deref().unwrap_or(""))
        .await?;
    Ok(Json(TransactionsResponse { success: true, data }))
}

async fn get_admin_users(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(filter): Query<UserFilter>,
) -> Result<Json<UsersResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let listing = state.moderator.list_users(&filter).await?;
    Ok(Json(UsersResponse { success: true, listing }))
}

async fn post_user_action(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((stud_id, action)): Path<(String, String)>,
) -> Result<Json<ActionResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let action = Action::parse(&action)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown action: {action}")))?;
    let result = state.moderator.apply(&stud_id, action).await?;
    Ok(Json(ActionResponse { success: true, result }))
}

async fn get_admin_items(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(filter): Query<ItemFilter>,
) -> Result<Json<ItemsResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let page = state.moderator.list_items(&filter).await?;
    Ok(Json(ItemsResponse { success: true, page }))
}

async fn delete_admin_item(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Result<Json<ItemRemovedResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let item = state.moderator.remove_item(&item_id).await?;
    Ok(Json(ItemRemovedResponse { success: true, item }))
}

async fn get_admin_reports(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ReportsResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let data = state.moderator.list_reports().await?;
    Ok(Json(ReportsResponse { success: true, data }))
}

/// Tables shown by the debug route and the columns sampled from each.
const DEBUG_TABLES: [(&str, &str); 3] = [
    (tables::TRANSACTIONS, "transac_id, status, created_at, updated_at"),
    (tables::LISTINGS, "item_id, item_name, item_type, item_status, created_at"),
    (tables::PEOPLE, "stud_id, stud_fname, stud_lname, is_role"),
];

async fn table_info(
    rows: &dyn RowSource,
    table: &'static str,
    columns: &'static str,
) -> (&'static str, TableInfo) {
    let count = match rows.count(&RowQuery::new(table)).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(table, "Count failed: {e}");
            None
        }
    };
    let sample = rows
        .fetch(&RowQuery::new(table).select(columns).limit(3))
        .await
        .unwrap_or_default();
    (table, TableInfo { count, sample })
}

async fn get_debug_tables(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<DebugTablesResponse>, AppError> {
    require_admin(state.identity.as_ref(), &headers).await?;
    let table_info = join_all(
        DEBUG_TABLES
            .into_iter()
            .map(|(table, columns)| table_info(state.rows.as_ref(), table, columns)),
    )
        .await
        .into_iter()
        .collect();
    Ok(Json(DebugTablesResponse { success: true, table_info }))
}
