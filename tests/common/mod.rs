//! Shared helpers for router-level tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use couchgate::http_server::{build_router, GatewayConfig};
use couchgate::store::MemoryStore;
use couchgate::Gateway;
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<Gateway>,
    pub router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(Gateway::new(store.clone(), config));
        let router = build_router(Arc::clone(&gateway));
        Self { store, gateway, router }
    }

    pub fn request(method: &str, uri: &str, body: Option<&Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    /// Send a request and read the body as JSON (text bodies become strings)
    pub async fn send_request(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, headers, body }
    }

    pub async fn send(&self, method: &str, uri: &str, body: Option<&Value>) -> TestResponse {
        self.send_request(Self::request(method, uri, body)).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send("GET", uri, None).await
    }

    pub async fn put(&self, uri: &str, body: &Value) -> TestResponse {
        self.send("PUT", uri, Some(body)).await
    }

    pub async fn create_db(&self, name: &str) {
        let response = self.send("PUT", &format!("/{}", name), None).await;
        assert_eq!(response.status, StatusCode::CREATED, "create {}: {:?}", name, response.body);
    }
}
