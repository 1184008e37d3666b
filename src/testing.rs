//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;

use crate::auth::{IdentityProvider, Session};
use crate::error::{AppError, Result};
use crate::fetcher::{Direction, Filter, RowQuery, RowSource, RowWriter};
use crate::notify::{Notification, NotificationSink};

/// Column value as the remote store would compare it.
fn cell(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(col, v) => cell(row, col).as_deref() == Some(v.as_str()),
        Filter::Neq(col, v) => cell(row, col).map_or(false, |c| c != *v),
        Filter::In(col, vs) => cell(row, col).map_or(false, |c| vs.contains(&c)),
    }
}

/// Keep only the selected top-level columns. Selects with embedded relations
/// are returned whole.
fn project(row: Value, columns: &str) -> Value {
    if columns == "*" || columns.contains('(') {
        return row;
    }
    match row {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| columns.split(',').any(|c| c == k))
                .collect(),
        ),
        other => other,
    }
}

/// Table-backed fake store. Tables listed in `failing` error on every read.
#[derive(Default)]
pub struct MemoryRows {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    failing: HashSet<String>,
    pub inserts: Mutex<Vec<(String, Value)>>,
}

impl MemoryRows {
    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    pub fn failing(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().unwrap().get(table).cloned().unwrap_or_default()
    }

    fn check(&self, table: &str) -> Result<()> {
        if self.failing.contains(table) {
            return Err(AppError::Upstream { status: 503, body: format!("{table} unavailable") });
        }
        Ok(())
    }
}

#[async_trait]
impl RowSource for MemoryRows {
    async fn fetch(&self, query: &RowQuery) -> Result<Vec<Value>> {
        self.check(&query.table)?;
        let mut rows: Vec<Value> = self
            .rows(&query.table)
            .into_iter()
            .filter(|r| query.filters.iter().all(|f| matches(r, f)))
            .collect();
        if let Some((col, dir)) = &query.order {
            rows.sort_by(|a, b| {
                let ord = cell(a, col).cmp(&cell(b, col));
                match dir {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        let rows = rows.into_iter().skip(query.offset.unwrap_or(0));
        let rows: Vec<Value> = match query.limit {
            Some(n) => rows.take(n).collect(),
            None => rows.collect(),
        };
        Ok(rows.into_iter().map(|r| project(r, &query.columns)).collect())
    }

    async fn count(&self, query: &RowQuery) -> Result<u64> {
        self.check(&query.table)?;
        let n = self
            .rows(&query.table)
            .iter()
            .filter(|r| query.filters.iter().all(|f| matches(r, f)))
            .count();
        Ok(n as u64)
    }
}

#[async_trait]
impl RowWriter for MemoryRows {
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|r| filters.iter().all(|f| matches(r, f))) {
            if let (Value::Object(target), Value::Object(changes)) = (&mut *row, &patch) {
                for (k, v) in changes {
                    target.insert(k.clone(), v.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<()> {
        self.check(table)?;
        self.inserts.lock().unwrap().push((table.to_string(), row));
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let (removed, kept): (Vec<Value>, Vec<Value>) = rows
            .drain(..)
            .partition(|r| filters.iter().all(|f| matches(r, f)));
        *rows = kept;
        Ok(removed)
    }
}

/// Token → session table.
#[derive(Default)]
pub struct StaticIdentity {
    sessions: HashMap<String, Session>,
}

impl StaticIdentity {
    pub fn with(mut self, token: &str, user_id: &str, is_admin: bool) -> Self {
        self.sessions.insert(
            token.to_string(),
            Session { user_id: user_id.to_string(), is_admin },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn resolve(&self, token: &str) -> Result<Session> {
        self.sessions
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))
    }
}

/// Records every notification it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

pub fn headers(auth: Option<&str>) -> HeaderMap {
    let mut h = HeaderMap::new();
    if let Some(v) = auth {
        h.insert(AUTHORIZATION, HeaderValue::from_str(v).unwrap());
    }
    h
}

#[tokio::test]
async fn memory_rows_filter_and_order() {
    let rows = MemoryRows::default().with_rows(
        "t",
        vec![
            serde_json::json!({"a": "x", "n": 2}),
            serde_json::json!({"a": "y", "n": 1}),
            serde_json::json!({"a": "z", "n": 3}),
            serde_json::json!({"a": null, "n": 4}),
        ],
    );
    let q = RowQuery::new("t").neq("a", "y").order("n", Direction::Descending);
    let out = rows.fetch(&q).await.unwrap();
    let names: Vec<&str> = out.iter().filter_map(|r| r["a"].as_str()).collect();
    assert_eq!(names, vec!["z", "x"]);
}

#[tokio::test]
async fn memory_rows_page_project_and_delete() {
    let rows = MemoryRows::default().with_rows(
        "t",
        (1..=5).map(|n| serde_json::json!({"n": n, "secret": "x"})).collect(),
    );
    let q = RowQuery::new("t").select("n").order("n", Direction::Ascending).offset(1).limit(2);
    let out = rows.fetch(&q).await.unwrap();
    assert_eq!(out, vec![serde_json::json!({"n": 2}), serde_json::json!({"n": 3})]);
    assert_eq!(rows.count(&RowQuery::new("t").is_in("n", [1, 4])).await.unwrap(), 2);

    let filters = [Filter::Eq("n".to_string(), "4".to_string())];
    let removed = rows.delete("t", &filters).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(rows.rows("t").len(), 4);
}
