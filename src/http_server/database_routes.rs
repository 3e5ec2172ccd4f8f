//! Database HTTP Routes
//!
//! Endpoints for database lifecycle and database-wide operations.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::errors::{ApiError, ApiResult};
use super::request::{all_docs_options, json_body, query_map};
use super::response::{created, DatabaseInfoResponse, OkResponse};
use crate::gateway::Gateway;
use crate::store::{AllDocsResponse, PutOptions, RevsDiffRequest, RevsDiffResponse};

// ==================
// Response Types
// ==================

#[derive(Debug, Serialize)]
pub struct DesignInfoResponse {
    pub name: String,
    pub view_index: &'static str,
}

// ==================
// Database Routes
// ==================

/// Create database routes
pub fn database_routes(state: Arc<Gateway>) -> Router {
    Router::new()
        // Lifecycle
        .route(
            "/:db",
            get(info_handler)
                .put(create_handler)
                .delete(destroy_handler)
                .post(post_doc_handler),
        )
        // Database-wide operations
        .route("/:db/_all_docs", get(all_docs_handler).post(all_docs_handler))
        .route("/:db/_bulk_docs", post(bulk_docs_handler))
        .route("/:db/_revs_diff", post(revs_diff_handler))
        .route("/:db/_compact", post(compact_handler))
        .route("/:db/_temp_view", post(temp_view_handler))
        .route("/:db/_design/:ddoc/_info", get(design_info_handler))
        .with_state(state)
}

// ==================
// Lifecycle Handlers
// ==================

async fn info_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
) -> ApiResult<Json<DatabaseInfoResponse>> {
    let handle = state.registry().resolve(&db).await?;
    let info = handle
        .info()
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::NOT_FOUND))?;
    Ok(Json(DatabaseInfoResponse {
        info,
        instance_start_time: state.instance_start_time(),
    }))
}

async fn create_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
) -> ApiResult<Response> {
    let handle = state.registry().create(&db).await?;
    info!(db = handle.name(), "Database created");
    Ok(created(state.location(&[handle.name()]), OkResponse::success()))
}

async fn destroy_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    state.registry().destroy(&db).await?;
    info!(db = %db, "Database destroyed");
    Ok(Json(OkResponse::success()))
}

/// Create a document; a client `_id` is kept, otherwise one is generated
async fn post_doc_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Response> {
    let handle = state.registry().resolve(&db).await?;
    let mut doc = match json_body(&body)? {
        Value::Object(doc) => doc,
        _ => return Err(ApiError::BadRequest("Document must be a JSON object".into())),
    };
    if !doc.get("_id").is_some_and(Value::is_string) {
        doc.insert("_id".into(), Value::String(Uuid::new_v4().simple().to_string()));
    }
    let opts = PutOptions {
        new_edits: params.get("new_edits").map_or(true, |v| v != "false"),
    };
    let result = handle
        .put(Value::Object(doc), opts)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::INTERNAL_SERVER_ERROR))?;
    Ok(created(state.location(&[handle.name(), &result.id]), result))
}

// ==================
// Database-wide Handlers
// ==================

async fn all_docs_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Json<AllDocsResponse>> {
    let handle = state.registry().resolve(&db).await?;
    let mut merged = query_map(&params);
    match json_body(&body)? {
        Value::Object(fields) => {
            for (key, value) in fields {
                merged.entry(key).or_insert(value);
            }
        }
        _ => return Err(ApiError::BadRequest("Request body must be a JSON object".into())),
    }
    let opts = all_docs_options(&merged)?;
    let response = handle
        .all_docs(opts)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::BAD_REQUEST))?;
    Ok(Json(response))
}

async fn bulk_docs_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let handle = state.registry().resolve(&db).await?;
    let mut payload = match json_body(&body)? {
        Value::Object(payload) => payload,
        Value::Array(_) => {
            return Err(ApiError::translated(
                StatusCode::NOT_FOUND,
                "bad_request",
                "req body must be a JSON object",
            ))
        }
        _ => return Err(ApiError::BadRequest("req body must be a JSON object".into())),
    };
    let docs = match payload.remove("docs") {
        Some(Value::Array(docs)) => docs,
        _ => return Err(ApiError::BadRequest("Missing JSON list of 'docs'".into())),
    };
    let opts = PutOptions {
        new_edits: payload.get("new_edits").and_then(Value::as_bool).unwrap_or(true),
    };
    let results = handle
        .bulk_docs(docs, opts)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::INTERNAL_SERVER_ERROR))?;
    Ok((StatusCode::CREATED, Json(results)).into_response())
}

async fn revs_diff_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
    body: Bytes,
) -> ApiResult<Json<RevsDiffResponse>> {
    let handle = state.registry().resolve(&db).await?;
    let request: RevsDiffRequest = serde_json::from_value(json_body(&body)?)
        .map_err(|e| ApiError::BadRequest(format!("invalid _revs_diff body: {}", e)))?;
    let diff = handle
        .revs_diff(request)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::BAD_REQUEST))?;
    Ok(Json(diff))
}

async fn compact_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let handle = state.registry().resolve(&db).await?;
    handle
        .compact()
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::INTERNAL_SERVER_ERROR))?;
    Ok(Json(OkResponse::success()))
}

/// Ad hoc map functions are never evaluated
async fn temp_view_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
) -> ApiResult<Json<Value>> {
    state.registry().resolve(&db).await?;
    Err(ApiError::BadRequest("temporary views are disabled".into()))
}

async fn design_info_handler(
    State(state): State<Arc<Gateway>>,
    Path((db, ddoc)): Path<(String, String)>,
) -> ApiResult<Json<DesignInfoResponse>> {
    state.registry().resolve(&db).await?;
    Ok(Json(DesignInfoResponse {
        name: ddoc,
        view_index: "Not implemented.",
    }))
}
