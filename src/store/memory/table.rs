//! Document table of one in-memory database.
//!
//! Each document keeps a linear revision history; the last entry is the
//! winner. `by_seq` holds every document once, at its latest sequence.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::filter::ChangeFilter;
use crate::store::errors::{StoreError, StoreResult};
use crate::store::types::{
    seq_number, AllDocsOptions, AllDocsResponse, AllDocsRow, AttachmentData, ChangeEvent,
    ChangesQuery, ChangesResponse, DbInfo, GetOptions, PutOptions, RevisionRef, RevsDiffEntry,
    RevsDiffRequest, RevsDiffResponse, RowValue, Since, WriteResult,
};

pub(crate) const LOCAL_PREFIX: &str = "_local/";
pub(crate) const DESIGN_PREFIX: &str = "_design/";

/// Generation number of a revision (`3-abc` -> 3)
pub(crate) fn rev_generation(rev: &str) -> u64 {
    rev.split('-').next().and_then(|g| g.parse().ok()).unwrap_or(0)
}

fn rev_hash(rev: &str) -> &str {
    rev.split_once('-').map(|(_, h)| h).unwrap_or(rev)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn digest_of(bytes: &[u8]) -> String {
    format!("sha256-{}", BASE64.encode(Sha256::digest(bytes)))
}

fn next_rev(previous: Option<&str>, body: &Map<String, Value>, deleted: bool) -> String {
    let generation = previous.map(rev_generation).unwrap_or(0) + 1;
    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or("").as_bytes());
    hasher.update(Value::Object(body.clone()).to_string().as_bytes());
    hasher.update([deleted as u8]);
    format!("{}-{}", generation, hex(&hasher.finalize()[..16]))
}

#[derive(Debug, Clone)]
pub(crate) struct StoredAttachment {
    pub content_type: String,
    pub data: AttachmentData,
    pub digest: String,
    pub length: usize,
    pub revpos: u64,
}

impl StoredAttachment {
    fn from_inline(content_type: String, data: &str, revpos: u64) -> StoreResult<Self> {
        let decoded = BASE64
            .decode(data)
            .map_err(|_| StoreError::bad_request("Invalid attachment data"))?;
        Ok(Self {
            content_type,
            digest: digest_of(&decoded),
            length: decoded.len(),
            data: AttachmentData::Base64(data.to_string()),
            revpos,
        })
    }

    fn from_bytes(content_type: String, bytes: Vec<u8>, revpos: u64) -> Self {
        Self {
            content_type,
            digest: digest_of(&bytes),
            length: bytes.len(),
            data: AttachmentData::Raw(bytes),
            revpos,
        }
    }

    fn base64(&self) -> String {
        match &self.data {
            AttachmentData::Raw(bytes) => BASE64.encode(bytes),
            AttachmentData::Base64(text) => text.clone(),
        }
    }

    fn to_json(&self, inline: bool) -> Value {
        let mut out = json!({
            "content_type": self.content_type,
            "digest": self.digest,
            "length": self.length,
            "revpos": self.revpos,
        });
        if inline {
            out["data"] = Value::String(self.base64());
        } else {
            out["stub"] = Value::Bool(true);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredDoc {
    pub id: String,
    /// Oldest first
    pub revs: Vec<String>,
    pub body: Map<String, Value>,
    pub deleted: bool,
    pub seq: u64,
    pub attachments: BTreeMap<String, StoredAttachment>,
}

impl StoredDoc {
    pub fn rev(&self) -> &str {
        self.revs.last().map(String::as_str).unwrap_or("")
    }

    pub fn generation(&self) -> u64 {
        rev_generation(self.rev())
    }

    pub fn to_json(&self, opts: &GetOptions) -> Value {
        let mut out = Map::new();
        out.insert("_id".into(), Value::String(self.id.clone()));
        out.insert("_rev".into(), Value::String(self.rev().to_string()));
        for (key, value) in &self.body {
            out.insert(key.clone(), value.clone());
        }
        if self.deleted {
            out.insert("_deleted".into(), Value::Bool(true));
        }
        if !self.attachments.is_empty() {
            let atts: Map<String, Value> = self
                .attachments
                .iter()
                .map(|(name, att)| (name.clone(), att.to_json(opts.attachments)))
                .collect();
            out.insert("_attachments".into(), Value::Object(atts));
        }
        if opts.revs {
            let ids: Vec<Value> = self
                .revs
                .iter()
                .rev()
                .map(|r| Value::String(rev_hash(r).to_string()))
                .collect();
            out.insert(
                "_revisions".into(),
                json!({ "start": self.generation(), "ids": ids }),
            );
        }
        Value::Object(out)
    }

    fn change_event(&self, include_docs: bool) -> ChangeEvent {
        ChangeEvent {
            seq: Value::from(self.seq),
            id: self.id.clone(),
            changes: vec![RevisionRef {
                rev: self.rev().to_string(),
            }],
            deleted: self.deleted,
            doc: include_docs.then(|| self.to_json(&GetOptions::default())),
        }
    }
}

/// A document as submitted by a writer
#[derive(Debug)]
struct IncomingDoc {
    id: String,
    rev: Option<String>,
    deleted: bool,
    body: Map<String, Value>,
    attachments: Option<Map<String, Value>>,
    /// Oldest first, from `_revisions`
    history: Option<Vec<String>>,
}

impl IncomingDoc {
    fn parse(doc: Value) -> StoreResult<Self> {
        let Value::Object(fields) = doc else {
            return Err(StoreError::bad_request("Document must be a JSON object"));
        };

        let mut id = None;
        let mut rev = None;
        let mut deleted = false;
        let mut attachments = None;
        let mut history = None;
        let mut body = Map::new();

        for (key, value) in fields {
            match key.as_str() {
                "_id" => id = value.as_str().map(str::to_string),
                "_rev" => rev = value.as_str().map(str::to_string),
                "_deleted" => deleted = value.as_bool().unwrap_or(false),
                "_attachments" => attachments = value.as_object().cloned(),
                "_revisions" => history = parse_revisions(&value),
                k if k.starts_with('_') => {}
                _ => {
                    body.insert(key, value);
                }
            }
        }

        let id = id.ok_or_else(|| StoreError::bad_request("Document must have an _id"))?;
        validate_id(&id)?;

        Ok(Self {
            id,
            rev,
            deleted,
            body,
            attachments,
            history,
        })
    }
}

fn parse_revisions(value: &Value) -> Option<Vec<String>> {
    let start = value.get("start")?.as_u64()?;
    let ids = value.get("ids")?.as_array()?;
    let mut revs: Vec<String> = ids
        .iter()
        .enumerate()
        .filter_map(|(i, id)| {
            let generation = start.checked_sub(i as u64)?;
            Some(format!("{}-{}", generation, id.as_str()?))
        })
        .collect();
    revs.reverse();
    Some(revs)
}

fn validate_id(id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(StoreError::bad_request("Document id must not be empty"));
    }
    if id.starts_with('_') && !id.starts_with(DESIGN_PREFIX) && !id.starts_with(LOCAL_PREFIX) {
        return Err(StoreError::bad_request(
            "Only reserved document ids may start with underscore.",
        ));
    }
    Ok(())
}

/// A committed write, broadcast to live subscribers
#[derive(Debug, Clone)]
pub(crate) struct Commit {
    pub seq: u64,
    /// Carries the full document; subscribers strip it when not asked for
    pub event: ChangeEvent,
}

#[derive(Debug, Default)]
pub(crate) struct DocTable {
    docs: HashMap<String, StoredDoc>,
    local: HashMap<String, (u64, Value)>,
    by_seq: BTreeMap<u64, String>,
    update_seq: u64,
}

impl DocTable {
    pub fn info(&self, name: &str) -> DbInfo {
        let deleted = self.docs.values().filter(|d| d.deleted).count();
        DbInfo {
            db_name: name.to_string(),
            doc_count: self.docs.len() - deleted,
            doc_del_count: deleted,
            update_seq: Value::from(self.update_seq),
            compact_running: false,
        }
    }

    /// Apply one document write
    pub fn write(
        &mut self,
        doc: Value,
        opts: &PutOptions,
    ) -> StoreResult<(WriteResult, Option<Commit>)> {
        let incoming = IncomingDoc::parse(doc)?;
        if incoming.id.starts_with(LOCAL_PREFIX) {
            return self.write_local(incoming).map(|result| (result, None));
        }
        if opts.new_edits {
            self.write_new_edit(incoming)
                .map(|(result, commit)| (result, Some(commit)))
        } else {
            self.write_replicated(incoming)
        }
    }

    fn write_local(&mut self, incoming: IncomingDoc) -> StoreResult<WriteResult> {
        let current = self.local.get(&incoming.id).map(|(n, _)| *n);
        let expected = current.map(|n| format!("0-{}", n));
        if incoming.rev != expected && !(current.is_none() && incoming.rev.is_none()) {
            return Err(StoreError::conflict());
        }
        if incoming.deleted {
            self.local.remove(&incoming.id);
            return Ok(WriteResult::new(incoming.id, "0-0"));
        }
        let next = current.unwrap_or(0) + 1;
        let rev = format!("0-{}", next);
        let mut body = incoming.body;
        body.insert("_id".into(), Value::String(incoming.id.clone()));
        body.insert("_rev".into(), Value::String(rev.clone()));
        self.local.insert(incoming.id.clone(), (next, Value::Object(body)));
        Ok(WriteResult::new(incoming.id, rev))
    }

    fn write_new_edit(&mut self, incoming: IncomingDoc) -> StoreResult<(WriteResult, Commit)> {
        let existing = self.docs.get(&incoming.id);
        match existing {
            Some(doc) if !doc.deleted => {
                if incoming.rev.as_deref() != Some(doc.rev()) {
                    return Err(StoreError::conflict());
                }
            }
            Some(doc) => {
                if incoming.rev.is_some() && incoming.rev.as_deref() != Some(doc.rev()) {
                    return Err(StoreError::conflict());
                }
            }
            None => {
                if incoming.rev.is_some() {
                    return Err(StoreError::conflict());
                }
            }
        }

        let previous = existing.map(|d| d.rev().to_string());
        let rev = next_rev(previous.as_deref(), &incoming.body, incoming.deleted);
        let attachments = if incoming.deleted {
            BTreeMap::new()
        } else {
            merge_attachments(existing, incoming.attachments, rev_generation(&rev))?
        };
        let mut revs = existing.map(|d| d.revs.clone()).unwrap_or_default();
        revs.push(rev.clone());

        let commit = self.commit(StoredDoc {
            id: incoming.id.clone(),
            revs,
            body: incoming.body,
            deleted: incoming.deleted,
            seq: 0,
            attachments,
        });
        Ok((WriteResult::new(incoming.id, rev), commit))
    }

    fn write_replicated(
        &mut self,
        incoming: IncomingDoc,
    ) -> StoreResult<(WriteResult, Option<Commit>)> {
        let rev = incoming
            .rev
            .clone()
            .ok_or_else(|| StoreError::bad_request("new_edits=false requires _rev"))?;
        let existing = self.docs.get(&incoming.id);

        if let Some(doc) = existing {
            if doc.revs.contains(&rev) || rev_generation(&rev) < doc.generation() {
                // already known, or loses against the current winner
                return Ok((WriteResult::new(incoming.id, rev), None));
            }
        }

        let mut revs = incoming.history.unwrap_or_else(|| vec![rev.clone()]);
        if revs.last() != Some(&rev) {
            revs = vec![rev.clone()];
        }
        let attachments = if incoming.deleted {
            BTreeMap::new()
        } else {
            merge_attachments(existing, incoming.attachments, rev_generation(&rev))?
        };

        let commit = self.commit(StoredDoc {
            id: incoming.id.clone(),
            revs,
            body: incoming.body,
            deleted: incoming.deleted,
            seq: 0,
            attachments,
        });
        Ok((WriteResult::new(incoming.id, rev), Some(commit)))
    }

    fn commit(&mut self, mut doc: StoredDoc) -> Commit {
        self.update_seq += 1;
        doc.seq = self.update_seq;
        if let Some(old) = self.docs.get(&doc.id) {
            self.by_seq.remove(&old.seq);
        }
        self.by_seq.insert(doc.seq, doc.id.clone());
        let commit = Commit {
            seq: doc.seq,
            event: doc.change_event(true),
        };
        self.docs.insert(doc.id.clone(), doc);
        commit
    }

    pub fn get(&self, id: &str, opts: &GetOptions) -> StoreResult<Value> {
        if id.starts_with(LOCAL_PREFIX) {
            return self
                .local
                .get(id)
                .map(|(_, doc)| doc.clone())
                .ok_or_else(|| StoreError::not_found("missing"));
        }
        let doc = self
            .docs
            .get(id)
            .ok_or_else(|| StoreError::not_found("missing"))?;
        match opts.rev.as_deref() {
            Some(rev) if rev != doc.rev() => Err(StoreError::not_found("missing")),
            Some(_) => Ok(doc.to_json(opts)),
            None if doc.deleted => Err(StoreError::not_found("deleted")),
            None => Ok(doc.to_json(opts)),
        }
    }

    pub fn all_docs(&self, opts: &AllDocsOptions) -> AllDocsResponse {
        let live_docs = self.docs.values().filter(|d| !d.deleted).count();
        let row_for = |doc: &StoredDoc| AllDocsRow::Found {
            id: doc.id.clone(),
            key: doc.id.clone(),
            value: RowValue {
                rev: doc.rev().to_string(),
                deleted: doc.deleted,
            },
            doc: if opts.include_docs && !doc.deleted {
                Some(doc.to_json(&GetOptions::default()))
            } else if opts.include_docs {
                Some(Value::Null)
            } else {
                None
            },
        };

        let rows: Vec<AllDocsRow> = if let Some(keys) = &opts.keys {
            keys.iter()
                .map(|key| match self.docs.get(key) {
                    Some(doc) => row_for(doc),
                    None => AllDocsRow::Missing {
                        key: key.clone(),
                        error: "not_found".to_string(),
                    },
                })
                .collect()
        } else {
            let mut ids: Vec<&String> = self
                .docs
                .values()
                .filter(|d| !d.deleted)
                .map(|d| &d.id)
                .collect();
            ids.sort();
            if opts.descending {
                ids.reverse();
            }
            let (low, high) = if opts.descending {
                (opts.end_key.as_ref(), opts.start_key.as_ref())
            } else {
                (opts.start_key.as_ref(), opts.end_key.as_ref())
            };
            ids.into_iter()
                .filter(|id| opts.key.as_ref().map_or(true, |k| *id == k))
                .filter(|id| low.map_or(true, |l| *id >= l))
                .filter(|id| high.map_or(true, |h| *id <= h))
                .filter_map(|id| self.docs.get(id))
                .map(row_for)
                .collect()
        };

        let rows: Vec<AllDocsRow> = rows
            .into_iter()
            .skip(opts.skip)
            .take(opts.limit.unwrap_or(usize::MAX))
            .collect();

        AllDocsResponse {
            total_rows: live_docs,
            offset: opts.skip,
            rows,
        }
    }

    /// Sequence after which a query starts reporting
    pub fn resolve_since(&self, since: &Since) -> StoreResult<u64> {
        match since {
            Since::Start => Ok(0),
            Since::Now => Ok(self.update_seq),
            Since::Seq(token) => seq_number(token).ok_or_else(|| {
                StoreError::bad_request(format!("Malformed since value: {}", token))
            }),
        }
    }

    /// Events strictly after `after`, ascending
    pub fn events_after(
        &self,
        after: u64,
        filter: &ChangeFilter,
        include_docs: bool,
    ) -> Vec<(u64, ChangeEvent)> {
        self.by_seq
            .range(after.saturating_add(1)..)
            .filter(|(_, id)| filter.matches(id))
            .filter_map(|(seq, id)| self.docs.get(id).map(|d| (*seq, d.change_event(include_docs))))
            .collect()
    }

    pub fn changes(&self, query: &ChangesQuery, filter: &ChangeFilter) -> StoreResult<ChangesResponse> {
        let after = self.resolve_since(&query.since)?;
        let mut events = self.events_after(after, filter, query.include_docs);
        if query.descending {
            events.reverse();
        }
        let limited = query.limit.is_some_and(|limit| events.len() > limit);
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }

        let last_seq = if limited || query.descending {
            events
                .last()
                .map(|(seq, _)| Value::from(*seq))
                .unwrap_or_else(|| Value::from(after))
        } else {
            Value::from(self.update_seq.max(after))
        };

        Ok(ChangesResponse {
            results: events.into_iter().map(|(_, event)| event).collect(),
            last_seq,
        })
    }

    pub fn revs_diff(&self, request: RevsDiffRequest) -> RevsDiffResponse {
        request
            .into_iter()
            .filter_map(|(id, revs)| {
                let known = self.docs.get(&id).map(|d| &d.revs);
                let missing: Vec<String> = revs
                    .into_iter()
                    .filter(|rev| known.map_or(true, |k| !k.contains(rev)))
                    .collect();
                (!missing.is_empty()).then_some((id, RevsDiffEntry { missing }))
            })
            .collect()
    }

    pub fn put_attachment(
        &mut self,
        id: &str,
        name: &str,
        rev: Option<&str>,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<(WriteResult, Commit)> {
        validate_id(id)?;
        let existing = self.docs.get(id).filter(|d| !d.deleted);
        match (existing, rev) {
            (Some(doc), Some(rev)) if rev == doc.rev() => {}
            (None, None) => {}
            _ => return Err(StoreError::conflict()),
        }

        let body = existing.map(|d| d.body.clone()).unwrap_or_default();
        let previous = existing.map(|d| d.rev().to_string());
        let new_rev = next_rev(previous.as_deref(), &body, false);
        let mut attachments = existing.map(|d| d.attachments.clone()).unwrap_or_default();
        attachments.insert(
            name.to_string(),
            StoredAttachment::from_bytes(content_type.to_string(), data, rev_generation(&new_rev)),
        );
        let mut revs = existing.map(|d| d.revs.clone()).unwrap_or_default();
        revs.push(new_rev.clone());

        let commit = self.commit(StoredDoc {
            id: id.to_string(),
            revs,
            body,
            deleted: false,
            seq: 0,
            attachments,
        });
        Ok((WriteResult::new(id, new_rev), commit))
    }

    pub fn get_attachment(&self, id: &str, name: &str) -> StoreResult<AttachmentData> {
        self.docs
            .get(id)
            .filter(|d| !d.deleted)
            .and_then(|d| d.attachments.get(name))
            .map(|att| att.data.clone())
            .ok_or_else(|| StoreError::not_found("missing"))
    }

    pub fn remove_attachment(
        &mut self,
        id: &str,
        name: &str,
        rev: &str,
    ) -> StoreResult<(WriteResult, Commit)> {
        let doc = self
            .docs
            .get(id)
            .filter(|d| !d.deleted)
            .ok_or_else(|| StoreError::not_found("missing"))?;
        if doc.rev() != rev {
            return Err(StoreError::conflict());
        }
        if !doc.attachments.contains_key(name) {
            return Err(StoreError::not_found("missing"));
        }

        let mut attachments = doc.attachments.clone();
        attachments.remove(name);
        let new_rev = next_rev(Some(rev), &doc.body, false);
        let mut revs = doc.revs.clone();
        revs.push(new_rev.clone());
        let body = doc.body.clone();

        let commit = self.commit(StoredDoc {
            id: id.to_string(),
            revs,
            body,
            deleted: false,
            seq: 0,
            attachments,
        });
        Ok((WriteResult::new(id, new_rev), commit))
    }
}

fn merge_attachments(
    existing: Option<&StoredDoc>,
    incoming: Option<Map<String, Value>>,
    revpos: u64,
) -> StoreResult<BTreeMap<String, StoredAttachment>> {
    let mut merged = BTreeMap::new();
    let Some(incoming) = incoming else {
        return Ok(merged);
    };

    for (name, entry) in incoming {
        if entry.get("stub").and_then(Value::as_bool).unwrap_or(false) {
            let kept = existing
                .and_then(|d| d.attachments.get(&name))
                .ok_or_else(|| StoreError::bad_request(format!("Missing stub attachment: {}", name)))?;
            merged.insert(name, kept.clone());
            continue;
        }
        let data = entry
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::bad_request(format!("Attachment {} has no data", name)))?;
        let content_type = entry
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream")
            .to_string();
        merged.insert(name, StoredAttachment::from_inline(content_type, data, revpos)?);
    }
    Ok(merged)
}
