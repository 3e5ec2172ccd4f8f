//! Document HTTP Routes
//!
//! Single-document CRUD, `COPY` and attachments. Design documents and
//! local documents use the same handlers through [`DocPath`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::debug;

use super::errors::{ApiError, ApiResult};
use super::request::{get_options, json_object, DocPath};
use super::response::{attachment, created};
use crate::gateway::Gateway;
use crate::registry::DatabaseHandle;
use crate::store::{GetOptions, PutOptions, WriteResult};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ==================
// Document Routes
// ==================

/// Create document and attachment routes
pub fn document_routes(state: Arc<Gateway>) -> Router {
    Router::new()
        .route("/:db/:id", document_methods())
        .route("/:db/_design/:ddoc", document_methods())
        .route("/:db/_local/:local", document_methods())
        .route("/:db/:id/:att", attachment_methods())
        .route("/:db/_design/:ddoc/:att", attachment_methods())
        .with_state(state)
}

fn document_methods() -> MethodRouter<Arc<Gateway>> {
    get(get_doc_handler)
        .put(put_doc_handler)
        .delete(delete_doc_handler)
        .fallback(copy_handler)
}

fn attachment_methods() -> MethodRouter<Arc<Gateway>> {
    get(get_attachment_handler)
        .put(put_attachment_handler)
        .delete(delete_attachment_handler)
}

// ==================
// Helper Functions
// ==================

async fn resolve(state: &Gateway, path: &DocPath) -> ApiResult<DatabaseHandle> {
    Ok(state.registry().resolve(&path.db).await?)
}

/// Split `Destination: id?rev=X` into id and revision
fn parse_destination(raw: &str) -> (String, Option<String>) {
    match raw.split_once("?rev=") {
        Some((id, rev)) if !id.is_empty() && !rev.is_empty() => (id.to_string(), Some(rev.to_string())),
        _ => (raw.to_string(), None),
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/related"))
}

/// Answer an `open_revs` read: one `{"ok": doc}` or `{"missing": rev}` per revision
async fn open_revs(
    handle: &DatabaseHandle,
    id: &str,
    raw: &str,
    params: &HashMap<String, String>,
) -> ApiResult<Json<Vec<Value>>> {
    let base = get_options(params);
    let revs: Vec<Option<String>> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(revs)) => revs
            .into_iter()
            .filter_map(|r| r.as_str().map(|s| Some(s.to_string())))
            .collect(),
        _ if raw == "all" => vec![None],
        _ => return Err(ApiError::BadRequest("open_revs must be a JSON array or \"all\"".into())),
    };

    let mut rows = Vec::with_capacity(revs.len());
    for rev in revs {
        let opts = GetOptions {
            rev: rev.clone(),
            ..base.clone()
        };
        match handle.get(id, opts).await {
            Ok(doc) => rows.push(json!({ "ok": doc })),
            Err(err) if err.is_not_found() => {
                if let Some(rev) = rev {
                    rows.push(json!({ "missing": rev }));
                }
            }
            Err(err) => return Err(ApiError::from_store(err, StatusCode::NOT_FOUND)),
        }
    }
    Ok(Json(rows))
}

// ==================
// Document Handlers
// ==================

async fn get_doc_handler(
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let handle = resolve(&state, &path).await?;
    if let Some(raw) = params.get("open_revs") {
        return Ok(open_revs(&handle, &path.id, raw, &params).await?.into_response());
    }
    let doc = handle
        .get(&path.id, get_options(&params))
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::NOT_FOUND))?;
    Ok(Json(doc).into_response())
}

/// Create or update a document; the path id is authoritative
async fn put_doc_handler(
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let handle = resolve(&state, &path).await?;
    if is_multipart(&headers) {
        return Err(ApiError::UnsupportedMediaType(
            "multipart/related document bodies are not supported".into(),
        ));
    }
    let mut doc = json_object(&body)?;
    doc.insert("_id".into(), Value::String(path.id.clone()));
    if !doc.contains_key("_rev") {
        if let Some(rev) = params.get("rev") {
            doc.insert("_rev".into(), Value::String(rev.clone()));
        }
    }
    let opts = PutOptions {
        new_edits: params.get("new_edits").map_or(true, |v| v != "false"),
    };
    let result = handle
        .put(Value::Object(doc), opts)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::INTERNAL_SERVER_ERROR))?;
    Ok(created(state.location(&path.segments()), result))
}

/// Delete at `?rev=`, or at the current revision when none is given.
///
/// An absent document is 404 even when a rev is supplied; a stale rev is
/// left to the store and comes back as a conflict.
async fn delete_doc_handler(
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<WriteResult>> {
    let handle = resolve(&state, &path).await?;
    let current = handle
        .get(&path.id, GetOptions::default())
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::NOT_FOUND))?;
    let rev = match params.get("rev") {
        Some(rev) => rev.clone(),
        None => current["_rev"].as_str().unwrap_or_default().to_string(),
    };
    let result = handle
        .remove(&path.id, &rev)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::NOT_FOUND))?;
    Ok(Json(result))
}

/// `COPY`; any other method not routed above is refused
async fn copy_handler(
    method: Method,
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if method.as_str() != "COPY" {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }
    let destination = headers
        .get("destination")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Destination header is mandatory for COPY.".into()))?;
    let (dest_id, dest_rev) = parse_destination(destination);

    let handle = resolve(&state, &path).await?;
    let opts = GetOptions {
        attachments: true,
        ..get_options(&params)
    };
    let mut doc = handle
        .get(&path.id, opts)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::NOT_FOUND))?;

    if let Value::Object(fields) = &mut doc {
        fields.insert("_id".into(), Value::String(dest_id.clone()));
        match dest_rev {
            Some(rev) => fields.insert("_rev".into(), Value::String(rev)),
            None => fields.remove("_rev"),
        };
    }
    let result = handle
        .put(doc, PutOptions::default())
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::CONFLICT))?;
    debug!(db = %path.db, from = %path.id, to = %dest_id, "Copied document");

    let target = DocPath {
        db: path.db.clone(),
        id: result.id.clone(),
        attachment: None,
    };
    Ok(created(state.location(&target.segments()), result))
}

// ==================
// Attachment Handlers
// ==================

async fn get_attachment_handler(
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let handle = resolve(&state, &path).await?;
    let name = path.attachment.as_deref().unwrap_or_default();
    let doc = handle
        .get(&path.id, get_options(&params))
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::NOT_FOUND))?;

    let content_type = doc
        .get("_attachments")
        .and_then(|atts| atts.get(name))
        .map(|stub| {
            stub.get("content_type")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string()
        })
        .ok_or_else(|| ApiError::NotFound("missing".into()))?;

    let data = handle
        .get_attachment(&path.id, name)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::CONFLICT))?;
    attachment(data, &content_type)
}

async fn put_attachment_handler(
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let handle = resolve(&state, &path).await?;
    let name = path.attachment.as_deref().unwrap_or_default();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let result = handle
        .put_attachment(
            &path.id,
            name,
            params.get("rev").map(String::as_str),
            body.to_vec(),
            content_type,
        )
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::CONFLICT))?;
    Ok(created(state.location(&path.segments()), result))
}

async fn delete_attachment_handler(
    State(state): State<Arc<Gateway>>,
    path: DocPath,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<WriteResult>> {
    let handle = resolve(&state, &path).await?;
    let name = path.attachment.as_deref().unwrap_or_default();
    let rev = params.get("rev").map(String::as_str).unwrap_or_default();
    let result = handle
        .remove_attachment(&path.id, name, rev)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::CONFLICT))?;
    Ok(Json(result))
}
