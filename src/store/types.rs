//! # Store Wire Types
//!
//! Request and response shapes exchanged with a document store. They
//! serialize to the CouchDB JSON forms the gateway answers with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Starting point of a changes query
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Since {
    /// Beginning of the database history
    #[default]
    Start,
    /// Current end of the history; only later commits are reported
    Now,
    /// Opaque sequence token; only events strictly after it are reported
    Seq(Value),
}

impl Since {
    /// Parse the `since` query parameter
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "0" => Since::Start,
            "now" => Since::Now,
            other => match other.parse::<u64>() {
                Ok(n) => Since::Seq(Value::from(n)),
                Err(_) => Since::Seq(Value::String(other.to_string())),
            },
        }
    }

    /// Build from a `last_seq` value returned by an earlier query
    pub fn from_seq(seq: &Value) -> Self {
        match seq {
            Value::Null => Since::Start,
            Value::Number(n) if n.as_u64() == Some(0) => Since::Start,
            Value::String(s) => Since::parse(s),
            other => Since::Seq(other.clone()),
        }
    }

    /// Render as a query-string value
    pub fn to_query_value(&self) -> String {
        match self {
            Since::Start => "0".to_string(),
            Since::Now => "now".to_string(),
            Since::Seq(Value::String(s)) => s.clone(),
            Since::Seq(other) => other.to_string(),
        }
    }
}

/// Extract the integer prefix of a sequence token (`42` or `"42-g1AAA"`)
pub fn seq_number(seq: &Value) -> Option<u64> {
    match seq {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.split('-').next().and_then(|p| p.parse().ok()),
        _ => None,
    }
}

/// Query handed to a store's change source
#[derive(Debug, Clone, Default)]
pub struct ChangesQuery {
    pub since: Since,
    pub live: bool,
    pub limit: Option<usize>,
    pub include_docs: bool,
    pub descending: bool,
    pub filter: Option<String>,
    /// Copy of the request's query parameters, read by filters
    pub query_params: Map<String, Value>,
}

/// A revision reference inside a change row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRef {
    pub rev: String,
}

/// One row of a changes feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: Value,
    pub id: String,
    pub changes: Vec<RevisionRef>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// Result of a non-live changes query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeEvent>,
    pub last_seq: Value,
}

/// Successful single-document write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

impl WriteResult {
    pub fn new(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            ok: true,
            id: id.into(),
            rev: rev.into(),
        }
    }
}

/// Per-document outcome of a bulk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BulkResult {
    Written(WriteResult),
    Failed {
        id: String,
        error: String,
        reason: String,
    },
}

impl BulkResult {
    pub fn is_written(&self) -> bool {
        matches!(self, BulkResult::Written(_))
    }
}

/// Options for document reads
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub rev: Option<String>,
    /// Include `_revisions` history
    pub revs: bool,
    /// Inline attachment bodies instead of stubs
    pub attachments: bool,
}

/// Options for document writes
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// `false` stores the supplied revision verbatim (replication mode)
    pub new_edits: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self { new_edits: true }
    }
}

/// Options for `_all_docs`
#[derive(Debug, Clone, Default)]
pub struct AllDocsOptions {
    pub include_docs: bool,
    pub limit: Option<usize>,
    pub skip: usize,
    pub descending: bool,
    pub key: Option<String>,
    pub keys: Option<Vec<String>>,
    pub start_key: Option<String>,
    pub end_key: Option<String>,
}

/// Value column of an `_all_docs` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValue {
    pub rev: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// One `_all_docs` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllDocsRow {
    Found {
        id: String,
        key: String,
        value: RowValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc: Option<Value>,
    },
    Missing {
        key: String,
        error: String,
    },
}

/// Result of `_all_docs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsResponse {
    pub total_rows: usize,
    pub offset: usize,
    pub rows: Vec<AllDocsRow>,
}

/// Input of `_revs_diff`: document id to candidate revisions
pub type RevsDiffRequest = BTreeMap<String, Vec<String>>;

/// Per-document answer of `_revs_diff`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevsDiffEntry {
    pub missing: Vec<String>,
}

/// Output of `_revs_diff`; documents with nothing missing are omitted
pub type RevsDiffResponse = BTreeMap<String, RevsDiffEntry>;

/// Database summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbInfo {
    pub db_name: String,
    pub doc_count: usize,
    pub doc_del_count: usize,
    pub update_seq: Value,
    pub compact_running: bool,
}

/// Attachment body as handed back by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    /// Raw bytes
    Raw(Vec<u8>),
    /// Base64 text that still needs decoding
    Base64(String),
}
