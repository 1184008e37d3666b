use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Query description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    Neq(String, String),
    In(String, Vec<String>),
}

impl Filter {
    /// PostgREST `(column, operator.value)` pair.
    fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq(col, v) => (col.clone(), format!("eq.{v}")),
            Filter::Neq(col, v) => (col.clone(), format!("neq.{v}")),
            Filter::In(col, vs) => {
                let quoted: Vec<String> = vs.iter().map(|v| quote_in_value(v)).collect();
                (col.clone(), format!("in.({})", quoted.join(",")))
            }
        }
    }
}

/// Values containing list delimiters must be double-quoted inside `in.(...)`.
fn quote_in_value(v: &str) -> String {
    if v.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        v.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A read against one table of the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub table: String,
    /// Column list, may embed relations: `updated_at,item(created_at)`.
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RowQuery {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
            offset: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.split_whitespace().collect::<Vec<_>>().join("");
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.to_string()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push(Filter::Neq(column.to_string(), value.to_string()));
        self
    }

    pub fn is_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Rows to skip before the first one returned.
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    fn filter_params(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.filters.iter().map(Filter::to_param)
    }

    /// Query-string parameters in PostgREST syntax.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filter_params());
        if let Some((col, dir)) = &self.order {
            let dir = match dir {
                Direction::Ascending => "asc",
                Direction::Descending => "desc",
            };
            params.push(("order".to_string(), format!("{col}.{dir}")));
        }
        if let Some(n) = self.limit {
            params.push(("limit".to_string(), n.to_string()));
        }
        if let Some(n) = self.offset {
            params.push(("offset".to_string(), n.to_string()));
        }
        params
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Read access to the remote store.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch(&self, query: &RowQuery) -> Result<Vec<Value>>;

    /// Exact number of rows matching the query's filters. Columns, order and
    /// paging are ignored.
    async fn count(&self, query: &RowQuery) -> Result<u64>;
}

/// Write access, used by moderation and notifications only.
#[async_trait]
pub trait RowWriter: Send + Sync {
    /// Apply `patch` to every row matching `filters`; returns the updated rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;

    async fn insert(&self, table: &str, row: Value) -> Result<()>;

    /// Remove every row matching `filters`; returns the removed rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>>;
}

/// Decode raw rows into `T`, skipping (and logging) rows that are not objects
/// of the expected shape.
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(table, "Skipping undecodable row: {e}");
                None
            }
        })
        .collect()
}

/// Fetch and decode in one step.
pub async fn fetch_as<T: DeserializeOwned>(source: &dyn RowSource, query: &RowQuery) -> Result<Vec<T>> {
    let rows = source.fetch(query).await?;
    Ok(decode_rows(&query.table, rows))
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// PostgREST client for the hosted backend, authenticated with one API key.
pub struct SupabaseRows {
    client: reqwest::Client,
    rest_url: String,
    key: String,
}

impl SupabaseRows {
    pub fn new(cfg: &Config, key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout)
            .build()?;
        Ok(Self {
            client,
            rest_url: cfg.rest_url(),
            key: key.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }
}

/// Turn a non-2xx response into `AppError::Upstream`.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AppError::Upstream { status: status.as_u16(), body })
}

#[async_trait]
impl RowSource for SupabaseRows {
    async fn fetch(&self, query: &RowQuery) -> Result<Vec<Value>> {
        let started = Instant::now();
        let resp = self
            .request(reqwest::Method::GET, &query.table)
            .query(&query.to_params())
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: Value = resp.json().await?;

        let rows = match body {
            Value::Array(rows) => rows,
            other => {
                return Err(AppError::Upstream {
                    status: 200,
                    body: format!("expected array from /{}, got {other}", query.table),
                })
            }
        };

        debug!(
            table = %query.table,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched rows",
        );
        Ok(rows)
    }

    async fn count(&self, query: &RowQuery) -> Result<u64> {
        let table = &query.table;
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query.filter_params());
        let resp = self
            .request(reqwest::Method::HEAD, table)
            .query(&params)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = check_status(resp).await?;

        resp.headers()
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| AppError::Upstream {
                status: resp.status().as_u16(),
                body: format!("missing or malformed Content-Range for /{table}"),
            })
    }
}

#[async_trait]
impl RowWriter for SupabaseRows {
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        if filters.is_empty() {
            return Err(AppError::BadRequest(format!("refusing unfiltered update of /{table}")));
        }
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_param).collect();
        let resp = self
            .request(reqwest::Method::PATCH, table)
            .query(&params)
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let rows: Vec<Value> = resp.json().await?;
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(&Value::Array(vec![row]))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        if filters.is_empty() {
            return Err(AppError::BadRequest(format!("refusing unfiltered delete of /{table}")));
        }
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_param).collect();
        let resp = self
            .request(reqwest::Method::DELETE, table)
            .query(&params)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let rows: Vec<Value> = resp.json().await?;
        debug!(table, removed = rows.len(), "Deleted rows");
        Ok(rows)
    }
}

/// Total from a `Content-Range` header: `0-24/3573` → 3573, `*/0` → 0.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Listing;

    #[test]
    fn renders_postgrest_params() {
        let q = RowQuery::new("item")
            .select("item_type, item_status")
            .neq("item_status", "sold")
            .order("created_at", Direction::Ascending)
            .limit(3);
        assert_eq!(
            q.to_params(),
            vec![
                ("select".to_string(), "item_type,item_status".to_string()),
                ("item_status".to_string(), "neq.sold".to_string()),
                ("order".to_string(), "created_at.asc".to_string()),
                ("limit".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn embedded_select_is_compacted() {
        let q = RowQuery::new("transactions").select(
            "updated_at,
             item(item_price_type, created_at)",
        );
        assert_eq!(q.columns, "updated_at,item(item_price_type,created_at)");
    }

    #[test]
    fn in_filter_quotes_values_with_delimiters() {
        let q = RowQuery::new("item").is_in("item_type", ["books & school supplies", "misc"]);
        let params = q.to_params();
        assert_eq!(params[1].1, r#"in.("books & school supplies",misc)"#);

        let q = RowQuery::new("student").eq("user_id", "u-1").is_in("stud_id", [1, 2]);
        let params = q.to_params();
        assert_eq!(params[1], ("user_id".to_string(), "eq.u-1".to_string()));
        assert_eq!(params[2], ("stud_id".to_string(), "in.(1,2)".to_string()));
    }

    #[test]
    fn page_renders_limit_then_offset() {
        let q = RowQuery::new("item")
            .is_in("item_status", ["available", "reserved"])
            .order("created_at", Direction::Descending)
            .offset(30)
            .limit(15);
        let params = q.to_params();
        assert_eq!(params[1], ("item_status".to_string(), "in.(available,reserved)".to_string()));
        assert_eq!(params[3], ("limit".to_string(), "15".to_string()));
        assert_eq!(params[4], ("offset".to_string(), "30".to_string()));

        let counted: Vec<_> = q.filter_params().collect();
        assert_eq!(counted.len(), 1, "count ignores order and paging");
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
    }

    #[test]
    fn decode_skips_non_objects() {
        let rows = vec![
            serde_json::json!({"item_type": "sports & fitness"}),
            serde_json::json!("not a row"),
            serde_json::json!({}),
        ];
        let listings: Vec<Listing> = decode_rows("item", rows);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].item_type.as_deref(), Some("sports & fitness"));
    }
}
