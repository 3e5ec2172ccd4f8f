//! Replication Tests
//!
//! `POST /_replicate` between local databases: documents copied, history
//! recorded under both endpoints and capped, continuous tasks listed and
//! cancelled.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::TestApp;
use couchgate::replication::HISTORY_LIMIT;
use serde_json::json;

async fn replicate(app: &TestApp, body: serde_json::Value) -> common::TestResponse {
    app.send("POST", "/_replicate", Some(&body)).await
}

// =============================================================================
// One-shot Replication
// =============================================================================

/// Local to local copies documents and logs one entry under each name.
#[tokio::test]
async fn test_local_replication_records_both_sides() {
    let app = TestApp::new();
    app.create_db("dba").await;
    app.create_db("dbb").await;
    app.put("/dba/one", &json!({"v": 1})).await;
    app.put("/dba/two", &json!({"v": 2})).await;

    let response = replicate(&app, json!({"source": "dba", "target": "dbb"})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["ok"], true);
    assert_eq!(response.body["docs_written"], 2);
    assert_eq!(response.body["history"].as_array().unwrap().len(), 1);

    assert_eq!(app.get("/dbb/two").await.body["v"], 2);

    let history = app.gateway.replicator().history();
    let source = history.history("dba").unwrap();
    let target = history.history("dbb").unwrap();
    assert_eq!(source.len(), 1);
    assert_eq!(target.len(), 1);
    assert!(source[0].start_time <= source[0].end_time);
    assert_eq!(source[0].session_id, target[0].session_id);
}

/// A rerun only copies what changed since the last checkpoint.
#[tokio::test]
async fn test_rerun_resumes() {
    let app = TestApp::new();
    app.create_db("dba").await;
    app.create_db("dbb").await;
    app.put("/dba/one", &json!({})).await;
    replicate(&app, json!({"source": "dba", "target": "dbb"})).await;

    app.put("/dba/three", &json!({})).await;
    let response = replicate(&app, json!({"source": "dba", "target": "dbb"})).await;
    assert_eq!(response.body["docs_read"], 1);
    assert_eq!(response.body["history"].as_array().unwrap().len(), 2);
}

/// History per database never exceeds the cap.
#[tokio::test]
async fn test_history_is_capped() {
    let app = TestApp::new();
    app.create_db("dba").await;
    app.create_db("dbb").await;

    for _ in 0..HISTORY_LIMIT + 1 {
        let response = replicate(&app, json!({"source": "dba", "target": "dbb"})).await;
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(app.gateway.replicator().history().len("dba"), HISTORY_LIMIT);
    assert_eq!(app.gateway.replicator().history().len("dbb"), HISTORY_LIMIT);
}

/// A failed replication is 400 and leaves no history behind.
#[tokio::test]
async fn test_failure_records_nothing() {
    let app = TestApp::new();
    app.create_db("dbb").await;

    let response = replicate(&app, json!({"source": "ghost", "target": "dbb"})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
    assert!(app.gateway.replicator().history().is_empty("dbb"));

    let response = app.send("POST", "/_replicate", Some(&json!({"source": "dbb"}))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

/// `create_target` creates a missing local target.
#[tokio::test]
async fn test_create_target() {
    let app = TestApp::new();
    app.create_db("dba").await;
    app.put("/dba/doc", &json!({})).await;

    let response = replicate(&app, json!({"source": "dba", "target": "fresh", "create_target": true})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(app.get("/fresh/doc").await.status, StatusCode::OK);
}

// =============================================================================
// Continuous Replication
// =============================================================================

/// Acknowledged at once, listed as active, keeps copying, and stops on cancel.
#[tokio::test]
async fn test_continuous_lifecycle() {
    let app = TestApp::new();
    app.create_db("dba").await;
    app.create_db("dbb").await;

    let request = json!({"source": "dba", "target": "dbb", "continuous": true});
    let response = replicate(&app, request.clone()).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["ok"], true);
    assert!(response.body["_local_id"].as_str().unwrap().ends_with("+continuous"));

    let tasks = app.get("/_active_tasks").await.body;
    assert_eq!(tasks.as_array().unwrap().len(), 1);
    assert_eq!(tasks[0]["type"], "replication");

    app.put("/dba/later", &json!({"v": "x"})).await;
    let mut copied = false;
    for _ in 0..200 {
        if app.get("/dbb/later").await.status == StatusCode::OK {
            copied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(copied);

    let mut cancel = request;
    cancel["cancel"] = json!(true);
    let response = replicate(&app, cancel.clone()).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(app.get("/_active_tasks").await.body, json!([]));

    let response = replicate(&app, cancel).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

/// Deleting and recreating the target ends the task; the new database is
/// not written to.
#[tokio::test]
async fn test_continuous_stops_when_target_is_deleted() {
    let app = TestApp::new();
    app.create_db("dba").await;
    app.create_db("dbb").await;
    app.put("/dba/before", &json!({})).await;

    let request = json!({"source": "dba", "target": "dbb", "continuous": true});
    assert_eq!(replicate(&app, request).await.status, StatusCode::OK);

    let response = app.send("DELETE", "/dbb", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let mut stopped = false;
    for _ in 0..200 {
        if app.get("/_active_tasks").await.body == json!([]) {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stopped);

    app.create_db("dbb").await;
    app.put("/dba/after", &json!({})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.get("/dbb/after").await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/dbb").await.body["doc_count"], 0);
}
