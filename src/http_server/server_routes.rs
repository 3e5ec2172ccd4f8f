//! Server HTTP Routes
//!
//! Endpoints that are not scoped to one database: welcome, catalog,
//! UUIDs, replication, active tasks and the session/config stubs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::errors::{ApiError, ApiResult};
use crate::gateway::Gateway;
use crate::replication::{ReplicateReply, ReplicationRequest, TaskInfo};

// ==================
// Response Types
// ==================

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub couchdb: &'static str,
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UuidsResponse {
    pub uuids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UserCtx {
    pub name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub ok: bool,
    #[serde(rename = "userCtx")]
    pub user_ctx: UserCtx,
    pub info: Value,
}

// ==================
// Server Routes
// ==================

/// Create server-level routes
pub fn server_routes(state: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", get(welcome_handler))
        .route("/_all_dbs", get(all_dbs_handler))
        .route("/_uuids", get(uuids_handler))
        .route("/_replicate", post(replicate_handler))
        .route("/_active_tasks", get(active_tasks_handler))
        .route("/_session", get(session_handler))
        // Stubs
        .route("/_config", get(config_handler))
        .route("/_config/*path", get(config_entry_handler))
        .route("/_log", get(|| async { "_log is not implemented." }))
        .route("/_stats", get(|| async { "_stats is not implemented." }))
        .with_state(state)
}

// ==================
// Helper Functions
// ==================

/// Leading digits of `count`; missing, zero or garbage means one
fn parse_count(raw: Option<&str>) -> usize {
    let digits: String = raw
        .unwrap_or("")
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => 1,
        Ok(n) => n,
    }
}

/// User name from a `Basic` authorization header; the password is ignored
fn basic_user(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let user = credentials.split(':').next().unwrap_or_default();
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

// ==================
// Handlers
// ==================

async fn welcome_handler() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        couchdb: "Welcome",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn all_dbs_handler(State(state): State<Arc<Gateway>>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.registry().list_all().await?))
}

async fn uuids_handler(
    State(state): State<Arc<Gateway>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<UuidsResponse>> {
    let count = parse_count(params.get("count").map(String::as_str));
    let max = state.config().max_uuid_count;
    if count > max {
        return Err(ApiError::BadRequest(format!(
            "count parameter too large, the maximum is {}",
            max
        )));
    }
    let uuids = (0..count).map(|_| Uuid::new_v4().simple().to_string()).collect();
    Ok(Json(UuidsResponse { uuids }))
}

async fn replicate_handler(
    State(state): State<Arc<Gateway>>,
    body: Bytes,
) -> ApiResult<Json<ReplicateReply>> {
    let request: ReplicationRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid replication request: {}", e)))?;
    let reply = state.replicator().replicate(request).await?;
    Ok(Json(reply))
}

async fn active_tasks_handler(State(state): State<Arc<Gateway>>) -> ApiResult<Json<Vec<TaskInfo>>> {
    Ok(Json(state.replicator().active_tasks()?))
}

async fn session_handler(headers: HeaderMap) -> ApiResult<Json<SessionResponse>> {
    if !headers.contains_key(header::AUTHORIZATION) {
        return Err(ApiError::Unauthorized("no auth header".into()));
    }
    let name = basic_user(&headers)
        .ok_or_else(|| ApiError::Unauthorized("unsupported authorization header".into()))?;
    Ok(Json(SessionResponse {
        ok: true,
        user_ctx: UserCtx { name, roles: Vec::new() },
        info: json!({ "authenticated": null }),
    }))
}

async fn config_handler() -> Json<Value> {
    Json(json!({
        "facts": { "couchgate has no config": true }
    }))
}

async fn config_entry_handler() -> Json<Value> {
    Json(json!({
        "ok": true,
        "couchgate has no config": true
    }))
}
