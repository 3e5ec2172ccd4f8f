//! Request-side helpers shared by the route files: body parsing, query
//! option decoding and the document path extractor.

use std::collections::HashMap;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use serde_json::{Map, Value};

use super::errors::ApiError;
use crate::store::{AllDocsOptions, GetOptions};

// ==================
// Bodies
// ==================

/// Parse a request body as JSON; an empty body is `{}`
pub fn json_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {}", e)))
}

/// Parse a body that must be a JSON object
pub fn json_object(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    match json_body(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::BadRequest("Document must be a JSON object".into())),
    }
}

// ==================
// Query Options
// ==================

/// Query values are JSON when they parse as JSON, plain strings otherwise
pub fn query_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Query parameters as JSON values
pub fn query_map(params: &HashMap<String, String>) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), query_value(v)))
        .collect()
}

fn as_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn as_usize(value: Option<&Value>) -> Result<Option<usize>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ApiError::BadRequest(format!("invalid integer: {}", n))),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("invalid integer: {}", s))),
        Some(other) => Err(ApiError::BadRequest(format!("invalid integer: {}", other))),
    }
}

fn as_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// `_all_docs` options from merged query/body parameters
pub fn all_docs_options(params: &Map<String, Value>) -> Result<AllDocsOptions, ApiError> {
    let keys = match params.get("keys") {
        None | Some(Value::Null) => None,
        Some(Value::Array(keys)) => Some(keys.iter().filter_map(|k| as_key(Some(k))).collect()),
        Some(other) => return Err(ApiError::BadRequest(format!("keys must be an array, got {}", other))),
    };
    Ok(AllDocsOptions {
        include_docs: as_bool(params.get("include_docs")),
        limit: as_usize(params.get("limit"))?,
        skip: as_usize(params.get("skip"))?.unwrap_or(0),
        descending: as_bool(params.get("descending")),
        key: as_key(params.get("key")),
        keys,
        start_key: as_key(params.get("startkey").or_else(|| params.get("start_key"))),
        end_key: as_key(params.get("endkey").or_else(|| params.get("end_key"))),
    })
}

/// Document read options from the query string
pub fn get_options(params: &HashMap<String, String>) -> GetOptions {
    GetOptions {
        rev: params.get("rev").cloned(),
        revs: params.get("revs").is_some_and(|v| v == "true"),
        attachments: params.get("attachments").is_some_and(|v| v == "true"),
    }
}

// ==================
// Document Paths
// ==================

/// Database, document id and optional attachment name of a document route.
///
/// Routes name the id segment `:id`, `:ddoc` (design documents) or `:local`
/// (local documents); the prefix is restored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath {
    pub db: String,
    pub id: String,
    pub attachment: Option<String>,
}

impl DocPath {
    /// Path segments of the document, for `Location` headers
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.db.as_str()];
        match self.id.split_once('/') {
            Some((prefix, rest)) if prefix == "_design" || prefix == "_local" => {
                segments.push(prefix);
                segments.push(rest);
            }
            _ => segments.push(&self.id),
        }
        if let Some(attachment) = &self.attachment {
            segments.push(attachment);
        }
        segments
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for DocPath {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(mut params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let db = params
            .remove("db")
            .ok_or_else(|| ApiError::Internal("route without a database segment".into()))?;
        let id = if let Some(ddoc) = params.remove("ddoc") {
            format!("_design/{}", ddoc)
        } else if let Some(local) = params.remove("local") {
            format!("_local/{}", local)
        } else {
            params
                .remove("id")
                .ok_or_else(|| ApiError::Internal("route without a document segment".into()))?
        };
        Ok(Self {
            db,
            id,
            attachment: params.remove("att"),
        })
    }
}
