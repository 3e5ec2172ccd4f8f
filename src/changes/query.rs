//! Changes feed request parameters.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::store::{ChangesQuery, Since};

/// Delivery mode selected by the `feed` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    #[default]
    Normal,
    Longpoll,
    Continuous,
}

impl FeedMode {
    /// Unknown values fall back to a one-shot feed
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("longpoll") => FeedMode::Longpoll,
            Some("continuous") => FeedMode::Continuous,
            _ => FeedMode::Normal,
        }
    }
}

/// A parsed `_changes` request
#[derive(Debug, Clone)]
pub struct ChangeFeedQuery {
    pub mode: FeedMode,
    pub since: Since,
    pub heartbeat: Duration,
    pub limit: Option<usize>,
    pub include_docs: bool,
    pub descending: bool,
    pub filter: Option<String>,
    /// Copy of every request parameter, handed to store filters
    pub query_params: Map<String, Value>,
}

fn flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|v| v == "true")
}

impl ChangeFeedQuery {
    pub fn from_params(params: &HashMap<String, String>, default_heartbeat: Duration) -> Self {
        let heartbeat = params
            .get("heartbeat")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(default_heartbeat);

        // limit=0 behaves like limit=1
        let limit = params
            .get("limit")
            .and_then(|v| v.parse::<usize>().ok())
            .map(|n| n.max(1));

        let query_params = params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        Self {
            mode: FeedMode::parse(params.get("feed").map(String::as_str)),
            since: params.get("since").map(|s| Since::parse(s)).unwrap_or_default(),
            heartbeat,
            limit,
            include_docs: flag(params, "include_docs"),
            descending: flag(params, "descending"),
            filter: params.get("filter").filter(|f| !f.is_empty()).cloned(),
            query_params,
        }
    }

    /// Live and continuous are both derived from the feed mode
    pub fn live(&self) -> bool {
        self.mode != FeedMode::Normal
    }

    pub fn continuous(&self) -> bool {
        self.mode == FeedMode::Continuous
    }

    /// Store query for this feed; live queries never run descending
    pub fn to_store_query(&self, live: bool) -> ChangesQuery {
        ChangesQuery {
            since: self.since.clone(),
            live,
            limit: self.limit,
            include_docs: self.include_docs,
            descending: self.descending && !live,
            filter: self.filter.clone(),
            query_params: self.query_params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFAULT: Duration = Duration::from_millis(6000);

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_mode_from_feed_param() {
        let q = ChangeFeedQuery::from_params(&params(&[("feed", "continuous")]), DEFAULT);
        assert!(q.live() && q.continuous());
        let q = ChangeFeedQuery::from_params(&params(&[("feed", "longpoll")]), DEFAULT);
        assert!(q.live() && !q.continuous());
        let q = ChangeFeedQuery::from_params(&params(&[("feed", "normal")]), DEFAULT);
        assert!(!q.live());
        let q = ChangeFeedQuery::from_params(&params(&[("feed", "bogus")]), DEFAULT);
        assert_eq!(q.mode, FeedMode::Normal);
    }

    #[test]
    fn test_client_cannot_set_live_directly() {
        let q = ChangeFeedQuery::from_params(&params(&[("live", "true"), ("continuous", "true")]), DEFAULT);
        assert!(!q.live());
        assert!(!q.to_store_query(false).live);
    }

    #[test]
    fn test_heartbeat_fallbacks() {
        let q = ChangeFeedQuery::from_params(&params(&[("heartbeat", "250")]), DEFAULT);
        assert_eq!(q.heartbeat, Duration::from_millis(250));
        for raw in ["0", "true", "-5", "abc"] {
            let q = ChangeFeedQuery::from_params(&params(&[("heartbeat", raw)]), DEFAULT);
            assert_eq!(q.heartbeat, DEFAULT, "heartbeat={}", raw);
        }
    }

    #[test]
    fn test_since_defaults_to_start() {
        let q = ChangeFeedQuery::from_params(&params(&[]), DEFAULT);
        assert_eq!(q.since, Since::Start);
        let q = ChangeFeedQuery::from_params(&params(&[("since", "now")]), DEFAULT);
        assert_eq!(q.since, Since::Now);
    }

    #[test]
    fn test_query_params_are_an_independent_copy() {
        let mut raw = params(&[("filter", "_doc_ids"), ("doc_ids", "[\"a\"]")]);
        let q = ChangeFeedQuery::from_params(&raw, DEFAULT);
        raw.insert("doc_ids".into(), "[\"b\"]".into());
        assert_eq!(q.query_params["doc_ids"], json!("[\"a\"]"));
        assert_eq!(q.filter.as_deref(), Some("_doc_ids"));
    }

    #[test]
    fn test_live_query_never_descends() {
        let q = ChangeFeedQuery::from_params(&params(&[("descending", "true"), ("limit", "0")]), DEFAULT);
        assert!(q.to_store_query(false).descending);
        assert!(!q.to_store_query(true).descending);
        assert_eq!(q.limit, Some(1));
    }
}
