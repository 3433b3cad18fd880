//! In-memory [`Source`] backend.
//!
//! Backs the integration test suite and the `mem://` connection scheme.
//! Records are stored as the raw bytes the cursor will yield; the fixture
//! loader encodes documents as newline-terminated JSON. Test-only knobs
//! (per-record delays, injected cursor failures, oplog truncation) let the
//! suite exercise cancellation, error propagation, and rollover paths.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docdump_core::{Error, Namespace, Result};
use serde_json::Value;

use crate::{CollectionInfo, CollectionType, RecordCursor, ServerInfo, Source, Timestamp};

#[derive(Debug, Clone, Default)]
struct MemCollection {
  kind: CollectionType,
  options: Value,
  records: Vec<Vec<u8>>,
  size_override: Option<u64>,
  /// Yield this many records, then fail the cursor.
  fail_after: Option<usize>,
  /// Sleep between records, to widen cancellation windows in tests.
  record_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
  databases: BTreeMap<String, BTreeMap<String, MemCollection>>,
  oplog: Vec<(Timestamp, Vec<u8>)>,
  server_version: String,
  is_router: bool,
  is_restricted: bool,
  auth_schema_version: i32,
  fail_ping: bool,
}

/// An in-memory document store with the full [`Source`] surface.
#[derive(Clone, Default)]
pub struct MemorySource {
  inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
  pub fn new() -> Self {
    let source = Self::default();
    {
      let mut inner = source.inner.lock().unwrap();
      inner.server_version = "7.0.0".to_string();
      inner.auth_schema_version = 5;
    }
    source
  }

  /// Load a source from a fixture file.
  ///
  /// The fixture maps database names to collections; each collection is
  /// either a bare array of documents or an object with `docs` and optional
  /// `kind` (`regular`, `view`, `timeseries`) and `options` fields.
  pub fn from_fixture(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path)?;
    let root: Value = serde_json::from_str(&text)
      .map_err(|e| Error::InvalidOptions(format!("fixture {}: {e}", path.display())))?;
    let Value::Object(dbs) = root else {
      return Err(Error::InvalidOptions(format!(
        "fixture {}: expected a database map at the top level",
        path.display()
      )));
    };

    let source = Self::new();
    for (db, collections) in dbs {
      let Value::Object(collections) = collections else {
        return Err(Error::InvalidOptions(format!(
          "fixture {}: database `{db}` is not a collection map",
          path.display()
        )));
      };
      for (name, spec) in collections {
        let (kind, options, docs) = match spec {
          Value::Array(docs) => (CollectionType::Regular, Value::Null, docs),
          Value::Object(mut obj) => {
            let kind = match obj.get("kind").and_then(Value::as_str) {
              None | Some("regular") => CollectionType::Regular,
              Some("view") => CollectionType::View,
              Some("timeseries") => CollectionType::Timeseries,
              Some(other) => {
                return Err(Error::InvalidOptions(format!(
                  "fixture {}: unknown collection kind `{other}`",
                  path.display()
                )));
              }
            };
            let options = obj.remove("options").unwrap_or(Value::Null);
            let docs = match obj.remove("docs") {
              Some(Value::Array(docs)) => docs,
              None => Vec::new(),
              Some(_) => {
                return Err(Error::InvalidOptions(format!(
                  "fixture {}: `docs` for {db}.{name} is not an array",
                  path.display()
                )));
              }
            };
            (kind, options, docs)
          }
          _ => {
            return Err(Error::InvalidOptions(format!(
              "fixture {}: collection `{db}.{name}` has an unsupported shape",
              path.display()
            )));
          }
        };
        let records = docs.iter().map(encode_record).collect();
        source.insert_collection_full(&db, &name, kind, options, records);
      }
    }
    Ok(source)
  }

  /// Insert a regular collection whose records are JSON documents.
  pub fn insert_docs(&self, db: &str, collection: &str, docs: &[Value]) {
    let records = docs.iter().map(encode_record).collect();
    self.insert_collection_full(db, collection, CollectionType::Regular, Value::Null, records);
  }

  /// Insert a collection with explicit kind, options, and raw records.
  pub fn insert_collection_full(
    &self,
    db: &str,
    collection: &str,
    kind: CollectionType,
    options: Value,
    records: Vec<Vec<u8>>,
  ) {
    let mut inner = self.inner.lock().unwrap();
    inner.databases.entry(db.to_string()).or_default().insert(
      collection.to_string(),
      MemCollection {
        kind,
        options,
        records,
        ..Default::default()
      },
    );
  }

  /// Override the storage size estimate reported for scheduling.
  pub fn set_size_bytes(&self, db: &str, collection: &str, size: u64) {
    self.with_collection(db, collection, |c| c.size_override = Some(size));
  }

  /// Make the cursor for this collection fail after yielding `n` records.
  pub fn fail_cursor_after(&self, db: &str, collection: &str, n: usize) {
    self.with_collection(db, collection, |c| c.fail_after = Some(n));
  }

  /// Sleep between records when iterating this collection.
  pub fn set_record_delay(&self, db: &str, collection: &str, delay: Duration) {
    self.with_collection(db, collection, |c| c.record_delay = Some(delay));
  }

  pub fn set_server_version(&self, version: &str) {
    self.inner.lock().unwrap().server_version = version.to_string();
  }

  pub fn set_router(&self, is_router: bool) {
    self.inner.lock().unwrap().is_router = is_router;
  }

  pub fn set_restricted(&self, is_restricted: bool) {
    self.inner.lock().unwrap().is_restricted = is_restricted;
  }

  pub fn set_auth_schema_version(&self, version: i32) {
    self.inner.lock().unwrap().auth_schema_version = version;
  }

  pub fn set_fail_ping(&self, fail: bool) {
    self.inner.lock().unwrap().fail_ping = fail;
  }

  /// Append an oplog entry with a JSON body.
  pub fn append_oplog(&self, ts: Timestamp, doc: &Value) {
    self.inner.lock().unwrap().oplog.push((ts, encode_record(doc)));
  }

  /// Drop every oplog entry older than `ts`, simulating retention rollover.
  pub fn truncate_oplog_before(&self, ts: Timestamp) {
    self.inner.lock().unwrap().oplog.retain(|(entry_ts, _)| *entry_ts >= ts);
  }

  fn with_collection(&self, db: &str, collection: &str, f: impl FnOnce(&mut MemCollection)) {
    let mut inner = self.inner.lock().unwrap();
    if let Some(c) = inner.databases.get_mut(db).and_then(|d| d.get_mut(collection)) {
      f(c);
    }
  }

  fn collection_snapshot(&self, ns: &Namespace) -> Option<MemCollection> {
    let inner = self.inner.lock().unwrap();
    inner.databases.get(&ns.db).and_then(|d| d.get(&ns.collection)).cloned()
  }
}

fn encode_record(doc: &Value) -> Vec<u8> {
  let mut bytes = serde_json::to_vec(doc).expect("JSON document is serializable");
  bytes.push(b'\n');
  bytes
}

fn info_for(name: &str, c: &MemCollection) -> CollectionInfo {
  CollectionInfo {
    name: name.to_string(),
    kind: c.kind,
    options: c.options.clone(),
    size_bytes: c
      .size_override
      .unwrap_or_else(|| c.records.iter().map(|r| r.len() as u64).sum()),
  }
}

/// Match a record against a filter document: every dotted filter key must
/// resolve to an equal value in the decoded record.
fn matches_filter(record: &[u8], filter: &Value) -> bool {
  let Some(filter) = filter.as_object() else {
    return true;
  };
  if filter.is_empty() {
    return true;
  }
  let Ok(doc) = serde_json::from_slice::<Value>(record) else {
    return false;
  };
  filter.iter().all(|(key, expected)| {
    let mut current = &doc;
    for segment in key.split('.') {
      match current.get(segment) {
        Some(next) => current = next,
        None => return false,
      }
    }
    current == expected
  })
}

struct MemCursor {
  records: std::vec::IntoIter<Vec<u8>>,
  yielded: usize,
  fail_after: Option<usize>,
  record_delay: Option<Duration>,
}

#[async_trait]
impl RecordCursor for MemCursor {
  async fn next(&mut self) -> Option<Result<Vec<u8>>> {
    if let Some(limit) = self.fail_after
      && self.yielded >= limit
    {
      return Some(Err(Error::Io(std::io::Error::other(
        "cursor read failed",
      ))));
    }
    if let Some(delay) = self.record_delay {
      tokio::time::sleep(delay).await;
    }
    let record = self.records.next()?;
    self.yielded += 1;
    Some(Ok(record))
  }
}

#[async_trait]
impl Source for MemorySource {
  async fn ping(&self) -> Result<()> {
    if self.inner.lock().unwrap().fail_ping {
      return Err(Error::Unreachable("ping failed".to_string()));
    }
    Ok(())
  }

  async fn server_info(&self) -> Result<ServerInfo> {
    let inner = self.inner.lock().unwrap();
    Ok(ServerInfo {
      version: inner.server_version.clone(),
      is_router: inner.is_router,
      is_restricted: inner.is_restricted,
    })
  }

  async fn list_databases(&self) -> Result<Vec<String>> {
    Ok(self.inner.lock().unwrap().databases.keys().cloned().collect())
  }

  async fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>> {
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .databases
        .get(db)
        .map(|collections| collections.iter().map(|(name, c)| info_for(name, c)).collect())
        .unwrap_or_default(),
    )
  }

  async fn collection_info(&self, ns: &Namespace) -> Result<Option<CollectionInfo>> {
    Ok(self.collection_snapshot(ns).map(|c| info_for(&ns.collection, &c)))
  }

  async fn estimated_count(&self, ns: &Namespace) -> Result<u64> {
    let c = self
      .collection_snapshot(ns)
      .ok_or_else(|| Error::NotFound(ns.to_string()))?;
    Ok(c.records.len() as u64)
  }

  async fn exact_count(&self, ns: &Namespace, filter: Option<&Value>) -> Result<u64> {
    let c = self
      .collection_snapshot(ns)
      .ok_or_else(|| Error::NotFound(ns.to_string()))?;
    Ok(match filter {
      None => c.records.len() as u64,
      Some(filter) => c.records.iter().filter(|r| matches_filter(r, filter)).count() as u64,
    })
  }

  async fn cursor(&self, ns: &Namespace, filter: Option<&Value>) -> Result<Box<dyn RecordCursor>> {
    let c = self
      .collection_snapshot(ns)
      .ok_or_else(|| Error::NotFound(ns.to_string()))?;
    let records: Vec<Vec<u8>> = match filter {
      None => c.records,
      Some(filter) => c.records.into_iter().filter(|r| matches_filter(r, filter)).collect(),
    };
    Ok(Box::new(MemCursor {
      records: records.into_iter(),
      yielded: 0,
      fail_after: c.fail_after,
      record_delay: c.record_delay,
    }))
  }

  async fn collection_metadata(&self, ns: &Namespace) -> Result<Value> {
    let c = self
      .collection_snapshot(ns)
      .ok_or_else(|| Error::NotFound(ns.to_string()))?;
    Ok(serde_json::json!({
      "options": c.options,
      "indexes": [{ "v": 2, "key": { "_id": 1 }, "name": "_id_" }],
    }))
  }

  async fn oplog_namespace(&self) -> Result<Namespace> {
    if self.inner.lock().unwrap().is_router {
      return Err(Error::TopologyMismatch(
        "routing nodes do not expose an oplog".to_string(),
      ));
    }
    Namespace::new("local", "oplog")
  }

  async fn newest_oplog_timestamp(&self) -> Result<Timestamp> {
    let inner = self.inner.lock().unwrap();
    inner
      .oplog
      .last()
      .map(|(ts, _)| *ts)
      .ok_or_else(|| Error::Internal("oplog has no entries".to_string()))
  }

  async fn oplog_timestamp_exists(&self, ts: Timestamp) -> Result<bool> {
    let inner = self.inner.lock().unwrap();
    Ok(inner.oplog.iter().any(|(entry_ts, _)| *entry_ts == ts))
  }

  async fn oplog_cursor(&self, start: Timestamp, end: Timestamp) -> Result<Box<dyn RecordCursor>> {
    let inner = self.inner.lock().unwrap();
    let records: Vec<Vec<u8>> = inner
      .oplog
      .iter()
      .filter(|(ts, _)| *ts >= start && *ts <= end)
      .map(|(_, record)| record.clone())
      .collect();
    Ok(Box::new(MemCursor {
      records: records.into_iter(),
      yielded: 0,
      fail_after: None,
      record_delay: None,
    }))
  }

  async fn auth_schema_version(&self) -> Result<i32> {
    Ok(self.inner.lock().unwrap().auth_schema_version)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn cursor_yields_records_in_insertion_order() {
    let source = MemorySource::new();
    source.insert_docs("db", "c", &[json!({"_id": 1}), json!({"_id": 2})]);

    let ns = Namespace::new("db", "c").unwrap();
    let mut cursor = source.cursor(&ns, None).await.unwrap();
    let first = cursor.next().await.unwrap().unwrap();
    let second = cursor.next().await.unwrap().unwrap();
    assert!(first.starts_with(b"{\"_id\":1}"));
    assert!(second.starts_with(b"{\"_id\":2}"));
    assert!(cursor.next().await.is_none());
  }

  #[tokio::test]
  async fn filter_matches_dotted_paths() {
    let source = MemorySource::new();
    source.insert_docs(
      "db",
      "c",
      &[json!({"meta": {"tag": "x"}, "v": 1}), json!({"meta": {"tag": "y"}, "v": 2})],
    );

    let ns = Namespace::new("db", "c").unwrap();
    let filter = json!({"meta.tag": "x"});
    assert_eq!(source.exact_count(&ns, Some(&filter)).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn cursor_failure_injection_fires_after_n_records() {
    let source = MemorySource::new();
    let docs: Vec<Value> = (0..5).map(|i| json!({"_id": i})).collect();
    source.insert_docs("db", "c", &docs);
    source.fail_cursor_after("db", "c", 2);

    let ns = Namespace::new("db", "c").unwrap();
    let mut cursor = source.cursor(&ns, None).await.unwrap();
    assert!(cursor.next().await.unwrap().is_ok());
    assert!(cursor.next().await.unwrap().is_ok());
    assert!(cursor.next().await.unwrap().is_err());
  }

  #[tokio::test]
  async fn oplog_rollover_drops_old_timestamps() {
    let source = MemorySource::new();
    source.append_oplog(Timestamp::new(1, 0), &json!({"op": "i"}));
    source.append_oplog(Timestamp::new(2, 0), &json!({"op": "u"}));

    assert!(source.oplog_timestamp_exists(Timestamp::new(1, 0)).await.unwrap());
    source.truncate_oplog_before(Timestamp::new(2, 0));
    assert!(!source.oplog_timestamp_exists(Timestamp::new(1, 0)).await.unwrap());
    assert_eq!(source.newest_oplog_timestamp().await.unwrap(), Timestamp::new(2, 0));
  }
}
