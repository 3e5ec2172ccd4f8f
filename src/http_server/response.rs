//! # Response Formatting
//!
//! Success-side half of the translator: created resources, plain
//! acknowledgements and attachment bodies.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use super::errors::{ApiError, ApiResult};
use crate::store::{AttachmentData, DbInfo};

/// `{"ok": true}`
#[derive(Debug, Clone, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn success() -> Self {
        Self { ok: true }
    }
}

/// `GET /{db}` body
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfoResponse {
    #[serde(flatten)]
    pub info: DbInfo,
    pub instance_start_time: String,
}

/// 201 with a `Location` header pointing at the new resource
pub fn created<T: Serialize>(location: String, body: T) -> Response {
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(body),
    )
        .into_response()
}

/// Attachment body with its stored content type
pub fn attachment(data: AttachmentData, content_type: &str) -> ApiResult<Response> {
    let bytes = match data {
        AttachmentData::Raw(bytes) => bytes,
        AttachmentData::Base64(text) => STANDARD
            .decode(text.as_bytes())
            .map_err(|e| ApiError::Internal(format!("corrupt attachment data: {}", e)))?,
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type.to_string())],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::json;

    #[tokio::test]
    async fn test_created_sets_location() {
        let response = created("http://localhost:5984/db".into(), OkResponse::success());
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::LOCATION], "http://localhost:5984/db");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_base64_attachment_is_decoded() {
        let response = attachment(AttachmentData::Base64("aGVsbG8=".into()), "text/plain").unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_raw_attachment_passes_through() {
        let response = attachment(AttachmentData::Raw(vec![0, 1, 2]), "application/octet-stream").unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &[0, 1, 2]);
    }

    #[test]
    fn test_corrupt_base64_is_internal() {
        let err = attachment(AttachmentData::Base64("***".into()), "text/plain").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_info_flattens() {
        let body = DatabaseInfoResponse {
            info: DbInfo {
                db_name: "db".into(),
                doc_count: 1,
                doc_del_count: 0,
                update_seq: json!(1),
                compact_running: false,
            },
            instance_start_time: "0".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["db_name"], "db");
        assert_eq!(json["instance_start_time"], "0");
    }
}
