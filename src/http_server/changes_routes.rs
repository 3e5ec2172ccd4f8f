//! Changes HTTP Routes
//!
//! `GET /{db}/_changes` in its three feed modes. Live feeds are written as
//! a streaming body; the status is committed with the first chunk.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::debug;

use super::errors::{ApiError, ApiResult};
use crate::changes::{open_feed, ChangeFeedQuery, FeedResponse};
use crate::gateway::Gateway;

/// Create changes routes
pub fn changes_routes(state: Arc<Gateway>) -> Router {
    Router::new()
        .route("/:db/_changes", get(changes_handler))
        .with_state(state)
}

async fn changes_handler(
    State(state): State<Arc<Gateway>>,
    Path(db): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let handle = state.registry().resolve(&db).await?;
    let query = ChangeFeedQuery::from_params(&params, state.config().heartbeat());
    debug!(db = %db, mode = ?query.mode, "Changes request");

    let feed = open_feed(&*handle, &query)
        .await
        .map_err(|e| ApiError::from_store(e, StatusCode::INTERNAL_SERVER_ERROR))?;

    let mut live = match feed {
        FeedResponse::Complete(response) => return Ok(Json(response).into_response()),
        FeedResponse::Stream(live) => live,
    };

    // nothing is written yet, so an error here can still carry its status
    let first = match live.next_chunk().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(err)) => return Err(ApiError::from_store(err, StatusCode::INTERNAL_SERVER_ERROR)),
        None => return Ok((StatusCode::OK, Body::empty()).into_response()),
    };

    let content_type = if query.continuous() {
        "text/plain; charset=utf-8"
    } else {
        "application/json"
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(live.into_stream(first)),
    )
        .into_response())
}
