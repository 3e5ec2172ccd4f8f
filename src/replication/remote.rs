//! Remote CouchDB databases spoken to over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::endpoint::{Endpoint, WriteOutcome};
use super::errors::{ReplicationError, ReplicationResult};
use crate::store::{ChangesQuery, ChangesResponse, RevsDiffRequest, RevsDiffResponse, StoreError};

/// Server-side wait of a longpoll request
const LONGPOLL_TIMEOUT_MS: u64 = 60_000;

/// A database at an `http(s)://` URL
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    url: String,
    base: Url,
    client: Client,
}

impl RemoteEndpoint {
    pub fn new(client: Client, url: &str) -> ReplicationResult<Self> {
        let base = Url::parse(url)
            .map_err(|e| ReplicationError::InvalidRequest(format!("invalid endpoint {}: {}", url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ReplicationError::InvalidRequest(format!("invalid endpoint {}", url)));
        }
        Ok(Self {
            url: url.to_string(),
            base,
            client,
        })
    }

    /// Base URL with extra path segments, each percent-encoded
    fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ReplicationResult<T> {
        let response = request
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ReplicationError::remote(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let error = body["error"].as_str().unwrap_or("remote_error");
            let reason = body["reason"].as_str().unwrap_or_else(|| status.as_str());
            return Err(ReplicationError::endpoint(
                &self.url,
                StoreError::new(Some(status.as_u16()), error, reason),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ReplicationError::remote(&self.url, e))
    }

    /// Create the remote database; an existing one is fine
    pub async fn ensure_exists(&self) -> ReplicationResult<()> {
        let response = self
            .client
            .put(self.base.clone())
            .send()
            .await
            .map_err(|e| ReplicationError::remote(&self.url, e))?;
        match response.status() {
            s if s.is_success() || s == StatusCode::PRECONDITION_FAILED => Ok(()),
            s => Err(ReplicationError::endpoint(
                &self.url,
                StoreError::new(Some(s.as_u16()), "db_not_created", format!("could not create {}", self.url)),
            )),
        }
    }

    fn changes_params(query: &ChangesQuery) -> Vec<(String, String)> {
        let mut params = vec![
            ("since".to_string(), query.since.to_query_value()),
            ("style".to_string(), "all_docs".to_string()),
        ];
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(filter) = &query.filter {
            params.push(("filter".to_string(), filter.clone()));
        }
        for (key, value) in &query.query_params {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.push((key.clone(), value));
        }
        params
    }
}

#[async_trait]
impl Endpoint for RemoteEndpoint {
    fn describe(&self) -> &str {
        &self.url
    }

    async fn changes(&self, query: &ChangesQuery) -> ReplicationResult<ChangesResponse> {
        let request = self
            .client
            .get(self.url_for(&["_changes"]))
            .query(&Self::changes_params(query));
        self.send_json(request).await
    }

    async fn wait_for_change(&self, query: &ChangesQuery) -> ReplicationResult<()> {
        let mut params = Self::changes_params(query);
        params.retain(|(k, _)| k != "limit");
        params.push(("feed".to_string(), "longpoll".to_string()));
        params.push(("limit".to_string(), "1".to_string()));
        params.push(("timeout".to_string(), LONGPOLL_TIMEOUT_MS.to_string()));
        let request = self
            .client
            .get(self.url_for(&["_changes"]))
            .query(&params)
            .timeout(Duration::from_millis(LONGPOLL_TIMEOUT_MS + 15_000));
        let _: Value = self.send_json(request).await?;
        Ok(())
    }

    async fn revs_diff(&self, request: RevsDiffRequest) -> ReplicationResult<RevsDiffResponse> {
        let request = self.client.post(self.url_for(&["_revs_diff"])).json(&request);
        self.send_json(request).await
    }

    async fn fetch_revisions(&self, id: &str, revs: &[String]) -> ReplicationResult<Vec<Value>> {
        let open_revs = serde_json::to_string(revs)
            .map_err(|e| ReplicationError::Internal(e.to_string()))?;
        let request = self.client.get(self.url_for(&[id])).query(&[
            ("revs", "true"),
            ("attachments", "true"),
            ("latest", "true"),
            ("open_revs", open_revs.as_str()),
        ]);
        let rows: Vec<Value> = self.send_json(request).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.get_mut("ok").map(Value::take))
            .collect())
    }

    async fn write_replicated(&self, docs: Vec<Value>) -> ReplicationResult<WriteOutcome> {
        let total = docs.len();
        let request = self
            .client
            .post(self.url_for(&["_bulk_docs"]))
            .json(&json!({ "docs": docs, "new_edits": false }));
        let rows: Vec<Value> = self.send_json(request).await?;
        let failed = rows.iter().filter(|row| row.get("error").is_some()).count();
        debug!(endpoint = %self.url, total, failed, "Wrote replicated batch");
        Ok(WriteOutcome {
            written: total.saturating_sub(failed),
            failed,
        })
    }

    async fn read_checkpoint(&self, replication_id: &str) -> ReplicationResult<Option<Value>> {
        let request = self.client.get(self.url_for(&["_local", replication_id]));
        match self.send_json(request).await {
            Ok(doc) => Ok(Some(doc)),
            Err(ReplicationError::Endpoint { source, .. }) if source.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_checkpoint(&self, replication_id: &str, body: Value) -> ReplicationResult<()> {
        let mut doc = body;
        if let Some(existing) = self.read_checkpoint(replication_id).await? {
            doc["_rev"] = existing["_rev"].clone();
        }
        let request = self
            .client
            .put(self.url_for(&["_local", replication_id]))
            .json(&doc);
        let _: Value = self.send_json(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Since;
    use serde_json::Map;

    #[test]
    fn test_url_for_encodes_segments() {
        let remote = RemoteEndpoint::new(Client::new(), "http://example.com:5984/db/").unwrap();
        assert_eq!(
            remote.url_for(&["_design/app"]).as_str(),
            "http://example.com:5984/db/_design%2Fapp"
        );
        assert_eq!(
            remote.url_for(&["_local", "abc"]).as_str(),
            "http://example.com:5984/db/_local/abc"
        );
    }

    #[test]
    fn test_rejects_unparseable_url() {
        assert!(RemoteEndpoint::new(Client::new(), "http//nope").is_err());
    }

    #[test]
    fn test_changes_params() {
        let mut query_params = Map::new();
        query_params.insert("doc_ids".into(), json!(["a"]));
        let query = ChangesQuery {
            since: Since::Seq(json!(12)),
            limit: Some(100),
            filter: Some("_doc_ids".into()),
            query_params,
            ..Default::default()
        };
        let params = RemoteEndpoint::changes_params(&query);
        assert!(params.contains(&("since".to_string(), "12".to_string())));
        assert!(params.contains(&("doc_ids".to_string(), "[\"a\"]".to_string())));
        assert!(params.contains(&("limit".to_string(), "100".to_string())));
    }
}
