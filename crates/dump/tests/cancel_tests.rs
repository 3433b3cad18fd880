//! Cooperative cancellation through the shutdown notifier.

mod common;

use std::sync::Arc;
use std::time::Duration;

use client::Source;
use client::memory::MemorySource;
use common::tree_options;
use dump::Orchestrator;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn notify_stops_every_worker_within_a_record_step() {
  let source = MemorySource::new();
  for coll in ["a", "b"] {
    let docs: Vec<serde_json::Value> = (0..2000).map(|i| json!({"_id": i})).collect();
    source.insert_docs("db", coll, &docs);
    source.set_record_delay("db", coll, Duration::from_millis(5));
  }

  let dir = TempDir::new().unwrap();
  let root = dir.path().join("dump");
  let mut options = tree_options(&root);
  options.output.num_parallel_collections = 2;

  let orchestrator = Orchestrator::new(Arc::new(source.clone()) as Arc<dyn Source>, options);
  let notifier = orchestrator.shutdown_notifier();
  let task = tokio::spawn(orchestrator.run());

  tokio::time::sleep(Duration::from_millis(200)).await;
  notifier.notify();

  // interruption delivered by the operator is not an error
  let started = std::time::Instant::now();
  tokio::time::timeout(Duration::from_secs(5), task)
    .await
    .expect("dump should stop promptly after notify")
    .unwrap()
    .unwrap();
  assert!(started.elapsed() < Duration::from_secs(2));

  // the dump was cut short, so at most a fraction of the records landed
  let written = std::fs::read(root.join("db/a.bson")).map(|b| b.len()).unwrap_or(0);
  assert!(written < 2000 * 10, "dump was not actually interrupted");
}

#[tokio::test]
async fn dump_without_signal_runs_to_completion() {
  let source = MemorySource::new();
  source.insert_docs("db", "c", &[json!({"x": 1}), json!({"y": 2})]);

  let dir = TempDir::new().unwrap();
  let root = dir.path().join("dump");
  let orchestrator = Orchestrator::new(Arc::new(source) as Arc<dyn Source>, tree_options(&root));
  orchestrator.run().await.unwrap();

  let bytes = std::fs::read(root.join("db/c.bson")).unwrap();
  assert_eq!(bytes, [common::record(&json!({"x": 1})), common::record(&json!({"y": 2}))].concat());
}
