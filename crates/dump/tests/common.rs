//! Shared helpers for the dump integration tests.
//!
//! All scenarios run against the in-memory source, so tests control the
//! catalog, the records, the oplog, and every failure injection point.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use archive::{Frame, Prelude};
use docdump_core::DumpOptions;
use serde_json::Value;

/// Options for a directory-tree dump rooted at `root`.
#[allow(dead_code)]
pub fn tree_options(root: &Path) -> DumpOptions {
  let mut options = DumpOptions::default();
  options.output.out = Some(root.to_string_lossy().into_owned());
  options
}

/// Options for an archive dump written to `path`.
#[allow(dead_code)]
pub fn archive_options(path: &Path) -> DumpOptions {
  let mut options = DumpOptions::default();
  options.output.archive = Some(path.to_string_lossy().into_owned());
  options
}

/// The raw record bytes the in-memory source produces for a document.
#[allow(dead_code)]
pub fn record(doc: &Value) -> Vec<u8> {
  let mut bytes = serde_json::to_vec(doc).unwrap();
  bytes.push(b'\n');
  bytes
}

/// Cloneable in-memory writer standing in for standard output.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
  #[allow(dead_code)]
  pub fn contents(&self) -> Vec<u8> {
    self.0.lock().unwrap().clone()
  }
}

impl Write for SharedBuf {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

/// Decode an archive: the prelude, per-stream reassembled bytes keyed by
/// `db.collection`, and the list of terminated streams.
#[allow(dead_code)]
pub fn read_archive(mut bytes: &[u8]) -> (Prelude, HashMap<String, Vec<u8>>, Vec<String>) {
  let prelude = Prelude::read_from(&mut bytes).unwrap();
  let mut streams: HashMap<String, Vec<u8>> = HashMap::new();
  let mut terminated = Vec::new();
  while let Some(frame) = Frame::decode(&mut bytes).unwrap() {
    match frame {
      Frame::Data { tag, payload } => {
        streams.entry(tag.ns.to_string()).or_default().extend_from_slice(&payload);
      }
      Frame::End { tag } => terminated.push(tag.ns.to_string()),
    }
  }
  (prelude, streams, terminated)
}

#[allow(dead_code)]
pub fn gunzip(bytes: &[u8]) -> Vec<u8> {
  let mut decoder = flate2::read::GzDecoder::new(bytes);
  let mut out = Vec::new();
  decoder.read_to_end(&mut out).unwrap();
  out
}
