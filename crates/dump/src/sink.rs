//! Output sinks.
//!
//! Three destinations behind one byte-stream-per-intent capability: a
//! directory tree of files, a single multiplexed archive, or standard
//! output. The variant is chosen once at setup; workers only ever see
//! [`DocStream`]s.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use archive::{FinishWrite, MuxControl, StreamHandle, StreamTag};
use async_trait::async_trait;
use docdump_core::{Error, IntentKind, Namespace, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;
use tracing::trace;

use crate::intent::Intent;

/// Write side of one intent's data or metadata.
///
/// `close` seals the stream: it flushes buffers, finishes any compression
/// trailer, and on the archive sink emits the stream's terminator frame.
#[async_trait]
pub trait DocStream: Send {
  async fn write_record(&mut self, record: &[u8]) -> Result<()>;
  async fn close(self: Box<Self>) -> Result<()>;
}

pub enum OutputSink {
  Tree(TreeSink),
  Archive(ArchiveSink),
  Stdout(StdoutSink),
}

impl OutputSink {
  pub fn tree(root: PathBuf, gzip: bool) -> Self {
    OutputSink::Tree(TreeSink { root, gzip })
  }

  pub fn archive(control: MuxControl) -> Self {
    OutputSink::Archive(ArchiveSink {
      control,
      manifest: Arc::new(Mutex::new(HashMap::new())),
    })
  }

  pub fn stdout(out: Box<dyn Write + Send + Sync>) -> Self {
    OutputSink::Stdout(StdoutSink {
      out: Arc::new(Mutex::new(out)),
    })
  }

  pub async fn open_data(&self, intent: &Intent) -> Result<Box<dyn DocStream>> {
    match self {
      OutputSink::Tree(tree) => tree.open(tree.data_path(intent)),
      OutputSink::Archive(archive) => Ok(Box::new(ArchiveStream {
        handle: archive.control.open_stream(StreamTag {
          ns: intent.ns.clone(),
          kind: intent.kind,
        }),
      })),
      OutputSink::Stdout(stdout) => Ok(Box::new(StdoutStream {
        out: Arc::clone(&stdout.out),
      })),
    }
  }

  pub async fn open_metadata(&self, intent: &Intent) -> Result<Box<dyn DocStream>> {
    match self {
      OutputSink::Tree(tree) => tree.open(tree.metadata_path(intent)),
      OutputSink::Archive(archive) => Ok(Box::new(MetadataCapture {
        ns: intent.ns.clone(),
        buf: Vec::new(),
        manifest: Arc::clone(&archive.manifest),
      })),
      OutputSink::Stdout(_) => Err(Error::Internal(
        "metadata has no destination on the standard output sink".to_string(),
      )),
    }
  }

  /// Human-readable destination for log lines.
  pub fn data_location(&self, intent: &Intent) -> String {
    match self {
      OutputSink::Tree(tree) => tree.data_path(intent).display().to_string(),
      OutputSink::Archive(_) => format!("archive stream `{}`", intent.ns),
      OutputSink::Stdout(_) => "standard output".to_string(),
    }
  }

  /// Collection metadata captured for the archive prelude; empty for the
  /// other sinks.
  pub fn metadata_manifest(&self) -> HashMap<Namespace, Value> {
    match self {
      OutputSink::Archive(archive) => archive.manifest.lock().unwrap().clone(),
      _ => HashMap::new(),
    }
  }
}

// ---------------------------------------------------------------------------
// directory tree

pub struct TreeSink {
  root: PathBuf,
  gzip: bool,
}

impl TreeSink {
  fn data_path(&self, intent: &Intent) -> PathBuf {
    let rel = match intent.kind {
      IntentKind::Oplog => "oplog.bson".to_string(),
      _ => format!("{}/{}.bson", intent.ns.db, intent.ns.collection),
    };
    self.suffixed(rel)
  }

  fn metadata_path(&self, intent: &Intent) -> PathBuf {
    self.suffixed(format!(
      "{}/{}.metadata.json",
      intent.ns.db, intent.ns.collection
    ))
  }

  fn suffixed(&self, rel: String) -> PathBuf {
    let rel = if self.gzip { format!("{rel}.gz") } else { rel };
    self.root.join(rel)
  }

  fn open(&self, path: PathBuf) -> Result<Box<dyn DocStream>> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    trace!(path = %path.display(), "opening dump file");
    let file = File::create(&path)?;
    let writer = if self.gzip {
      FileWriter::Gzip(GzEncoder::new(BufWriter::new(file), Compression::default()))
    } else {
      FileWriter::Plain(BufWriter::new(file))
    };
    Ok(Box::new(TreeStream { writer }))
  }
}

enum FileWriter {
  Plain(BufWriter<File>),
  Gzip(GzEncoder<BufWriter<File>>),
}

struct TreeStream {
  writer: FileWriter,
}

#[async_trait]
impl DocStream for TreeStream {
  async fn write_record(&mut self, record: &[u8]) -> Result<()> {
    match &mut self.writer {
      FileWriter::Plain(w) => w.write_all(record)?,
      FileWriter::Gzip(w) => w.write_all(record)?,
    }
    Ok(())
  }

  async fn close(self: Box<Self>) -> Result<()> {
    match self.writer {
      FileWriter::Plain(mut w) => w.flush()?,
      FileWriter::Gzip(w) => {
        let mut inner = w.finish()?;
        inner.flush()?;
      }
    }
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// archive

pub struct ArchiveSink {
  control: MuxControl,
  manifest: Arc<Mutex<HashMap<Namespace, Value>>>,
}

struct ArchiveStream {
  handle: StreamHandle,
}

#[async_trait]
impl DocStream for ArchiveStream {
  async fn write_record(&mut self, record: &[u8]) -> Result<()> {
    self.handle.write(record).await
  }

  async fn close(self: Box<Self>) -> Result<()> {
    self.handle.close().await
  }
}

/// Metadata on the archive sink lands in the prelude manifest rather than
/// in a frame stream.
struct MetadataCapture {
  ns: Namespace,
  buf: Vec<u8>,
  manifest: Arc<Mutex<HashMap<Namespace, Value>>>,
}

#[async_trait]
impl DocStream for MetadataCapture {
  async fn write_record(&mut self, record: &[u8]) -> Result<()> {
    self.buf.extend_from_slice(record);
    Ok(())
  }

  async fn close(self: Box<Self>) -> Result<()> {
    let doc: Value = serde_json::from_slice(&self.buf)
      .map_err(|e| Error::Internal(format!("metadata for {} is not valid JSON: {e}", self.ns)))?;
    self.manifest.lock().unwrap().insert(self.ns.clone(), doc);
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// standard output

pub struct StdoutSink {
  out: Arc<Mutex<Box<dyn Write + Send + Sync>>>,
}

struct StdoutStream {
  out: Arc<Mutex<Box<dyn Write + Send + Sync>>>,
}

#[async_trait]
impl DocStream for StdoutStream {
  async fn write_record(&mut self, record: &[u8]) -> Result<()> {
    self.out.lock().unwrap().write_all(record)?;
    Ok(())
  }

  async fn close(self: Box<Self>) -> Result<()> {
    self.out.lock().unwrap().flush()?;
    Ok(())
  }
}

/// Adapter giving an arbitrary writer the sealing interface the archive
/// multiplexer expects; used when the archive goes to standard output.
pub(crate) struct NopFinishWriter(pub Box<dyn Write + Send + Sync>);

impl Write for NopFinishWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.0.flush()
  }
}

impl FinishWrite for NopFinishWriter {
  fn finish(mut self: Box<Self>) -> io::Result<()> {
    self.0.flush()
  }
}
