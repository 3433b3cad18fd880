//! Intents: the unit of dump work.

use docdump_core::{IntentKind, Namespace};
use serde_json::Value;

/// One collection to be dumped, plus where its bytes go.
///
/// Intents are immutable once the manager is finalized; the streams they
/// describe are opened by whichever worker ends up holding the intent.
#[derive(Debug, Clone)]
pub struct Intent {
  pub ns: Namespace,
  pub kind: IntentKind,
  /// Creation options document; `Null` when the server reported none.
  pub options: Value,
  /// Storage size estimate used by longest-task-first scheduling.
  pub size_hint: u64,
  pub dumps_data: bool,
  pub dumps_metadata: bool,
}

impl Intent {
  pub fn collection(ns: Namespace, kind: IntentKind, options: Value, size_hint: u64, with_metadata: bool) -> Self {
    Self {
      ns,
      kind,
      options,
      size_hint,
      dumps_data: true,
      dumps_metadata: with_metadata,
    }
  }

  /// A data-only intent for the singleton kinds the orchestrator dumps
  /// itself (users, roles, auth version, oplog).
  pub fn special(ns: Namespace, kind: IntentKind, size_hint: u64) -> Self {
    Self {
      ns,
      kind,
      options: Value::Null,
      size_hint,
      dumps_data: true,
      dumps_metadata: false,
    }
  }

  /// The namespace the cursor actually reads. Timeseries collections are
  /// dumped through their backing bucket collection.
  pub fn data_namespace(&self) -> Namespace {
    if self.kind == IntentKind::Timeseries {
      Namespace {
        db: self.ns.db.clone(),
        collection: format!("system.buckets.{}", self.ns.collection),
      }
    } else {
      self.ns.clone()
    }
  }
}
