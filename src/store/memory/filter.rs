//! Built-in change filters.

use std::collections::HashSet;

use serde_json::Value;

use super::table::DESIGN_PREFIX;
use crate::store::errors::{StoreError, StoreResult};
use crate::store::types::ChangesQuery;

/// Filter applied to change rows by document id
#[derive(Debug, Clone)]
pub(crate) enum ChangeFilter {
    All,
    /// `_doc_ids`: only the listed documents
    DocIds(HashSet<String>),
    /// `_design`: only design documents
    Design,
}

impl ChangeFilter {
    pub fn from_query(query: &ChangesQuery) -> StoreResult<Self> {
        match query.filter.as_deref() {
            None | Some("") => Ok(ChangeFilter::All),
            Some("_doc_ids") => parse_doc_ids(query.query_params.get("doc_ids")).map(ChangeFilter::DocIds),
            Some("_design") => Ok(ChangeFilter::Design),
            Some(other) => Err(StoreError::bad_request(format!(
                "Unsupported filter: {}",
                other
            ))),
        }
    }

    pub fn matches(&self, id: &str) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::DocIds(ids) => ids.contains(id),
            ChangeFilter::Design => id.starts_with(DESIGN_PREFIX),
        }
    }
}

/// `doc_ids` arrives either as a JSON array or as its string encoding
fn parse_doc_ids(raw: Option<&Value>) -> StoreResult<HashSet<String>> {
    let invalid = || StoreError::bad_request("`doc_ids` filter parameter is not a list of doc ids.");
    let parsed;
    let list = match raw {
        Some(Value::Array(items)) => items,
        Some(Value::String(text)) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|_| invalid())?;
            parsed.as_array().ok_or_else(invalid)?
        }
        _ => return Err(invalid()),
    };
    list.iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(filter: &str, params: Value) -> ChangesQuery {
        ChangesQuery {
            filter: Some(filter.to_string()),
            query_params: params.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_doc_ids_from_string() {
        let filter = ChangeFilter::from_query(&query("_doc_ids", json!({"doc_ids": "[\"a\",\"b\"]"}))).unwrap();
        assert!(filter.matches("a"));
        assert!(!filter.matches("c"));
    }

    #[test]
    fn test_doc_ids_requires_list() {
        let err = ChangeFilter::from_query(&query("_doc_ids", json!({}))).unwrap_err();
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn test_design_filter() {
        let filter = ChangeFilter::from_query(&query("_design", json!({}))).unwrap();
        assert!(filter.matches("_design/app"));
        assert!(!filter.matches("doc"));
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let err = ChangeFilter::from_query(&query("app/by_type", json!({}))).unwrap_err();
        assert_eq!(err.error, "bad_request");
    }
}
