//! Bearer credential → session resolution and the admin gate.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{tables, Config};
use crate::error::{AppError, Result};
use crate::fetcher::{fetch_as, RowQuery, RowSource};
use crate::types::{Person, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub is_admin: bool,
}

/// Resolves an opaque bearer credential into a session.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Err(AppError::Unauthorized)` when the credential is not valid.
    async fn resolve(&self, token: &str) -> Result<Session>;
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Authorization header missing".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized("Token missing".to_string()))?;
    value
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AppError::Unauthorized("Token missing".to_string()))
}

/// Resolve the request's session, requiring a valid credential.
pub async fn authenticate(identity: &dyn IdentityProvider, headers: &HeaderMap) -> Result<Session> {
    let token = bearer_token(headers)?;
    identity.resolve(token).await
}

/// Resolve the request's session and require administrator rights.
pub async fn require_admin(identity: &dyn IdentityProvider, headers: &HeaderMap) -> Result<Session> {
    let session = authenticate(identity, headers).await?;
    if !session.is_admin {
        warn!(user_id = %session.user_id, "Non-admin attempted an admin route");
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(session)
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// Verifies tokens against the backend's auth endpoint, then looks the user up
/// in the people table: `is_role == 1` marks an administrator.
pub struct SupabaseIdentity {
    client: reqwest::Client,
    auth_url: String,
    anon_key: String,
    rows: Arc<dyn RowSource>,
}

impl SupabaseIdentity {
    pub fn new(cfg: &Config, rows: Arc<dyn RowSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout)
            .build()?;
        Ok(Self {
            client,
            auth_url: cfg.auth_url(),
            anon_key: cfg.supabase_key.clone(),
            rows,
        })
    }

    /// Any failure to confirm the token, transport errors included, is
    /// `Unauthorized`.
    async fn user_id(&self, token: &str) -> Result<String> {
        let sent = self
            .client
            .get(format!("{}/user", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Auth endpoint request failed: {e}");
                return Err(AppError::Unauthorized("Invalid token".to_string()));
            }
        };

        if !resp.status().is_success() {
            debug!(status = resp.status().as_u16(), "Token rejected by auth endpoint");
            return Err(AppError::Unauthorized("Invalid token".to_string()));
        }
        let user: AuthUser = resp
            .json()
            .await
            .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?;
        Ok(user.id)
    }
}

/// Admin flag for `user_id`; a user with no people row is not an admin.
pub async fn is_admin(rows: &dyn RowSource, user_id: &str) -> Result<bool> {
    let query = RowQuery::new(tables::PEOPLE)
        .select("is_role")
        .eq("user_id", user_id)
        .limit(1);
    let people: Vec<Person> = fetch_as(rows, &query).await?;
    Ok(people.first().map(|p| p.role() == Role::Admin).unwrap_or(false))
}

/// [`is_admin`], where a failed lookup denies admin rights.
pub async fn admin_flag(rows: &dyn RowSource, user_id: &str) -> bool {
    match is_admin(rows, user_id).await {
        Ok(flag) => flag,
        Err(e) => {
            warn!(user_id, "Admin lookup failed, treating user as non-admin: {e}");
            false
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn resolve(&self, token: &str) -> Result<Session> {
        let user_id = self.user_id(token).await?;
        let is_admin = admin_flag(self.rows.as_ref(), &user_id).await;
        Ok(Session { user_id, is_admin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{headers, MemoryRows, StaticIdentity};
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::{json, Value};

    /// Serves `/auth/v1/user` with a fixed answer; returns the base URL.
    async fn auth_server(status: StatusCode, body: Value) -> String {
        let app = Router::new().route(
            "/auth/v1/user",
            get(move || async move { (status, Json(body)) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn identity(base_url: &str, rows: MemoryRows) -> SupabaseIdentity {
        let cfg = Config::from_lookup(|key| match key {
            "SUPABASE_URL" => Some(base_url.to_string()),
            "SUPABASE_KEY" => Some("anon".to_string()),
            _ => None,
        })
        .unwrap();
        SupabaseIdentity::new(&cfg, Arc::new(rows)).unwrap()
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&headers(Some("Bearer abc"))).unwrap(), "abc");

        let err = bearer_token(&headers(None)).unwrap_err();
        assert_eq!(err.to_string(), "Authorization header missing");

        let err = bearer_token(&headers(Some("Bearer"))).unwrap_err();
        assert_eq!(err.to_string(), "Token missing");
    }

    #[tokio::test]
    async fn admin_gate() {
        let identity = StaticIdentity::default()
            .with("admin-token", "u-admin", true)
            .with("user-token", "u-user", false);

        let s = require_admin(&identity, &headers(Some("Bearer admin-token"))).await.unwrap();
        assert_eq!(s.user_id, "u-admin");

        let err = require_admin(&identity, &headers(Some("Bearer user-token"))).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = require_admin(&identity, &headers(Some("Bearer nope"))).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let s = authenticate(&identity, &headers(Some("Bearer user-token"))).await.unwrap();
        assert!(!s.is_admin);
    }

    #[tokio::test]
    async fn admin_flag_comes_from_people_table() {
        let rows = MemoryRows::default().with_rows(
            tables::PEOPLE,
            vec![
                serde_json::json!({"user_id": "u-1", "is_role": 1}),
                serde_json::json!({"user_id": "u-2", "is_role": "0"}),
            ],
        );

        assert!(is_admin(&rows, "u-1").await.unwrap());
        assert!(!is_admin(&rows, "u-2").await.unwrap());
        assert!(!is_admin(&rows, "u-missing").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_auth_endpoint_is_unauthorized() {
        let id = identity("http://127.0.0.1:1", MemoryRows::default());
        let err = id.resolve("t").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)), "got {err:?}");
        assert_eq!(err.to_string(), "Invalid token");
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let url = auth_server(StatusCode::UNAUTHORIZED, json!({"msg": "bad jwt"})).await;
        let err = identity(&url, MemoryRows::default()).resolve("t").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn failed_role_lookup_denies_admin() {
        let url = auth_server(StatusCode::OK, json!({"id": "u-1"})).await;
        let id = identity(&url, MemoryRows::default().failing(tables::PEOPLE));

        let s = id.resolve("t").await.unwrap();
        assert_eq!(s, Session { user_id: "u-1".to_string(), is_admin: false });

        let err = require_admin(&id, &headers(Some("Bearer t"))).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(err.to_string(), "Admin access required");
    }

    #[tokio::test]
    async fn resolves_admin_from_people_row() {
        let url = auth_server(StatusCode::OK, json!({"id": "u-1"})).await;
        let rows = MemoryRows::default()
            .with_rows(tables::PEOPLE, vec![json!({"user_id": "u-1", "is_role": 1})]);
        let s = identity(&url, rows).resolve("t").await.unwrap();
        assert!(s.is_admin);
    }
}
