//! Server access layer.
//!
//! The dump engine never talks to a server directly; it goes through the
//! [`Source`] trait, which covers the handful of operations a dump needs:
//! probing, catalog listing, counting, cursors over raw records, oplog
//! endpoints, and the auth schema version. Transport-backed implementations
//! live out of tree; the in-memory backend in [`memory`] backs the test
//! suite and the `mem://` connection scheme.

pub mod memory;

use async_trait::async_trait;
use docdump_core::{Error, Namespace, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical timestamp of an oplog entry: seconds since the epoch plus an
/// ordinal distinguishing entries within the same second.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
  pub secs: u32,
  pub ordinal: u32,
}

impl Timestamp {
  pub fn new(secs: u32, ordinal: u32) -> Self {
    Self { secs, ordinal }
  }
}

impl std::fmt::Display for Timestamp {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.secs, self.ordinal)
  }
}

/// Catalog classification of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionType {
  #[default]
  Regular,
  View,
  Timeseries,
}

/// Catalog information for one collection.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
  pub name: String,
  pub kind: CollectionType,
  /// Creation options document, opaque to the dump engine except for the
  /// timeseries meta field lookup.
  pub options: Value,
  /// Storage size estimate used for scheduling.
  pub size_bytes: u64,
}

/// What the connected server looks like.
#[derive(Debug, Clone)]
pub struct ServerInfo {
  pub version: String,
  /// True for cluster components that proxy operations to shards and have
  /// no local oplog.
  pub is_router: bool,
  /// True for managed clusters that forbid admin-database access.
  pub is_restricted: bool,
}

/// A cursor over raw, already-encoded document records.
#[async_trait]
pub trait RecordCursor: Send {
  /// The next record, or `None` when the cursor is exhausted.
  async fn next(&mut self) -> Option<Result<Vec<u8>>>;
}

/// Everything the dump engine asks of a server.
#[async_trait]
pub trait Source: Send + Sync {
  async fn ping(&self) -> Result<()>;

  async fn server_info(&self) -> Result<ServerInfo>;

  async fn list_databases(&self) -> Result<Vec<String>>;

  async fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>>;

  /// Catalog entry for one namespace, `None` when it does not exist.
  async fn collection_info(&self, ns: &Namespace) -> Result<Option<CollectionInfo>>;

  /// Fast count that may use collection statistics.
  async fn estimated_count(&self, ns: &Namespace) -> Result<u64>;

  /// Exact count honoring an optional filter.
  async fn exact_count(&self, ns: &Namespace, filter: Option<&Value>) -> Result<u64>;

  /// Open a cursor over the raw records of `ns`, optionally filtered.
  async fn cursor(&self, ns: &Namespace, filter: Option<&Value>) -> Result<Box<dyn RecordCursor>>;

  /// Metadata document (creation options, indexes) for one namespace.
  async fn collection_metadata(&self, ns: &Namespace) -> Result<Value>;

  /// Namespace of the oplog. Errors with `TopologyMismatch` when the
  /// topology does not expose a single oplog.
  async fn oplog_namespace(&self) -> Result<Namespace>;

  /// Timestamp of the newest oplog entry.
  async fn newest_oplog_timestamp(&self) -> Result<Timestamp>;

  /// Whether an entry with exactly this timestamp is still retained.
  async fn oplog_timestamp_exists(&self, ts: Timestamp) -> Result<bool>;

  /// Cursor over oplog entries with `start <= ts <= end`.
  async fn oplog_cursor(&self, start: Timestamp, end: Timestamp) -> Result<Box<dyn RecordCursor>>;

  /// Auth schema version of the deployment.
  async fn auth_schema_version(&self) -> Result<i32>;
}

/// Resolve a connection string to a source.
///
/// Only the `mem://` scheme is handled in tree: `mem://` opens an empty
/// in-memory source and `mem://<path>` loads a fixture file (see
/// [`memory::MemorySource::from_fixture`]). Transport-backed schemes are
/// provided by the embedding application.
pub async fn connect(uri: &str) -> Result<std::sync::Arc<dyn Source>> {
  if let Some(rest) = uri.strip_prefix("mem://") {
    let source = if rest.is_empty() {
      memory::MemorySource::new()
    } else {
      memory::MemorySource::from_fixture(std::path::Path::new(rest))?
    };
    return Ok(std::sync::Arc::new(source));
  }
  Err(Error::Unreachable(format!(
    "no transport available for connection string `{uri}`"
  )))
}
