//! Oplog capture: the happy path, rollover detection, topology rejection,
//! and the source-writes barrier.

mod common;

use std::sync::Arc;
use std::time::Duration;

use client::memory::MemorySource;
use client::{Source, Timestamp};
use common::{record, tree_options};
use docdump_core::Error;
use dump::Orchestrator;
use serde_json::json;
use tempfile::TempDir;

fn orchestrator(source: &MemorySource, options: docdump_core::DumpOptions) -> Orchestrator {
  Orchestrator::new(Arc::new(source.clone()) as Arc<dyn Source>, options)
}

#[tokio::test]
async fn oplog_window_is_captured_after_collections() {
  let source = MemorySource::new();
  source.insert_docs("db", "c", &[json!({"x": 1})]);
  source.append_oplog(Timestamp::new(1, 0), &json!({"op": "i", "n": 1}));
  source.append_oplog(Timestamp::new(2, 0), &json!({"op": "i", "n": 2}));
  source.append_oplog(Timestamp::new(3, 1), &json!({"op": "u", "n": 3}));

  let dir = TempDir::new().unwrap();
  let root = dir.path().join("dump");
  let mut options = tree_options(&root);
  options.output.oplog = true;
  orchestrator(&source, options).run().await.unwrap();

  // the window starts at the newest entry seen before collection dumping
  assert_eq!(
    std::fs::read(root.join("oplog.bson")).unwrap(),
    record(&json!({"op": "u", "n": 3}))
  );
  assert!(root.join("db/c.bson").exists());
}

#[tokio::test]
async fn rollover_before_the_end_check_fails_with_overflow() {
  let source = MemorySource::new();
  source.insert_docs("db", "c", &[json!({"x": 1})]);
  source.append_oplog(Timestamp::new(5, 0), &json!({"op": "i"}));

  let dir = TempDir::new().unwrap();
  let barrier = dir.path().join("writes-done");
  let root = dir.path().join("dump");
  let mut options = tree_options(&root);
  options.output.oplog = true;
  options.input.source_writes_done_barrier = Some(barrier.clone());

  let task = tokio::spawn(orchestrator(&source, options).run());

  // while the dump waits on the barrier, the oplog rolls past the start
  tokio::time::sleep(Duration::from_millis(300)).await;
  source.append_oplog(Timestamp::new(9, 0), &json!({"op": "i"}));
  source.truncate_oplog_before(Timestamp::new(9, 0));
  std::fs::write(&barrier, b"").unwrap();

  let err = task.await.unwrap().unwrap_err();
  assert!(matches!(err, Error::OplogOverflow), "got {err:?}");
}

#[tokio::test]
async fn oplog_capture_is_rejected_on_routing_nodes() {
  let source = MemorySource::new();
  source.insert_docs("db", "c", &[json!({"x": 1})]);
  source.set_router(true);

  let dir = TempDir::new().unwrap();
  let mut options = tree_options(&dir.path().join("dump"));
  options.output.oplog = true;

  let err = orchestrator(&source, options).run().await.unwrap_err();
  assert!(matches!(err, Error::TopologyMismatch(_)));
}

#[tokio::test]
async fn barrier_gates_collection_dumping_when_oplog_is_off() {
  let source = MemorySource::new();
  source.insert_docs("db", "c", &[json!({"x": 1})]);

  let dir = TempDir::new().unwrap();
  let barrier = dir.path().join("writes-done");
  let root = dir.path().join("dump");
  let mut options = tree_options(&root);
  options.input.source_writes_done_barrier = Some(barrier.clone());

  let task = tokio::spawn(orchestrator(&source, options).run());

  tokio::time::sleep(Duration::from_millis(250)).await;
  assert!(!task.is_finished(), "dump should still be waiting on the barrier");
  std::fs::write(&barrier, b"").unwrap();

  tokio::time::timeout(Duration::from_secs(5), task)
    .await
    .expect("dump should finish once the barrier appears")
    .unwrap()
    .unwrap();
  assert!(root.join("db/c.bson").exists());
}
