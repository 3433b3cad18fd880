//! The dump orchestrator: validates options, probes the server, plans
//! intents, and drives the IO phases in order (metadata, users/roles,
//! parallel collection dump, oplog capture, prelude).
//!
//! On the archive sink the multiplexer's completion and the underlying
//! writer's close are awaited on every exit path, success or not.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use archive::{FinishWrite, MuxControl, MuxReceiver, Multiplexer, Prelude, PreludeEntry};
use client::{ServerInfo, Source};
use docdump_core::{DumpOptions, Error, Namespace, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dumper::{self, DumpContext, run_worker_pool};
use crate::manager::{FinalizePolicy, IntentManager};
use crate::oplog;
use crate::plan;
use crate::query::load_query;
use crate::shutdown::ShutdownNotifier;
use crate::sink::{NopFinishWriter, OutputSink};

pub struct Orchestrator {
  source: Arc<dyn Source>,
  options: Arc<DumpOptions>,
  tool_version: String,
  shutdown: ShutdownNotifier,
  /// Replaces the process's standard output; used when testing the stdout
  /// and archive-to-stdout paths.
  output_writer: Option<Box<dyn Write + Send + Sync>>,
}

impl Orchestrator {
  pub fn new(source: Arc<dyn Source>, options: DumpOptions) -> Self {
    Self {
      source,
      options: Arc::new(options),
      tool_version: env!("CARGO_PKG_VERSION").to_string(),
      shutdown: ShutdownNotifier::new(),
      output_writer: None,
    }
  }

  pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
    self.tool_version = version.into();
    self
  }

  pub fn with_output_writer(mut self, writer: Box<dyn Write + Send + Sync>) -> Self {
    self.output_writer = Some(writer);
    self
  }

  /// Handle for the signal handler (and tests) to request cancellation.
  pub fn shutdown_notifier(&self) -> ShutdownNotifier {
    self.shutdown.clone()
  }

  /// Run the dump to completion.
  ///
  /// Cancellation is demoted to success only when it is the sole outcome
  /// and the shutdown broadcast actually fired; any other error wins.
  pub async fn run(mut self) -> Result<()> {
    match self.execute().await {
      Err(e) if e.is_terminated() && self.shutdown.is_fired() => {
        warn!("dump interrupted, output may be incomplete");
        Ok(())
      }
      other => other,
    }
  }

  async fn execute(&mut self) -> Result<()> {
    self.options.validate()?;
    self.source.ping().await?;
    let server = self.source.server_info().await?;
    debug!(version = %server.version, "connected to server");
    self.check_topology(&server)?;

    // without an oplog window, the barrier is the only way tests can pin
    // down which writes the dump observes
    if !self.options.output.oplog
      && let Some(barrier) = self.options.input.source_writes_done_barrier.clone()
    {
      wait_for_barrier(&barrier, &self.shutdown).await?;
    }

    let selection = self.options.selection.clone();
    if let (Some(db), Some(collection)) = (&selection.db, &selection.collection) {
      let ns = Namespace::new(db.clone(), collection.clone())?;
      if self.source.collection_info(&ns).await?.is_none() {
        warn!(%ns, "namespace does not exist, nothing was dumped");
        return Ok(());
      }
    }

    let query = load_query(&self.options.input)?;

    if self.options.output.dump_users_and_roles {
      let version = self.source.auth_schema_version().await?;
      debug!(version, "auth schema version");
      if version < 3 {
        return Err(Error::TopologyMismatch(format!(
          "dumping users and roles requires auth schema version >= 3, found {version}"
        )));
      }
    }

    let manager = Arc::new(IntentManager::new());
    let to_stdout = self.options.output.out.as_deref() == Some("-");
    let with_metadata = !to_stdout;
    match (&selection.db, &selection.collection) {
      (None, None) => {
        plan::create_all_intents(&self.source, &self.options, &manager, with_metadata).await?;
      }
      (Some(db), None) => {
        plan::create_intents_for_database(&self.source, &self.options, &manager, db, with_metadata)
          .await?;
      }
      (Some(db), Some(collection)) => {
        plan::create_collection_intent(&self.source, &manager, db, collection, with_metadata)
          .await?;
      }
      (None, Some(_)) => unreachable!("validation requires a database for a named collection"),
    }
    if self.options.output.oplog {
      plan::create_oplog_intent(&self.source, &manager).await?;
    }

    let admin_selected = selection.db.as_deref() == Some("admin");
    let wants_admin_users = !server.is_restricted && (selection.db.is_none() || admin_selected);
    let wants_db_users = self.options.output.dump_users_and_roles && !admin_selected;
    if wants_admin_users || wants_db_users {
      plan::create_users_roles_version_intents(&self.source, &manager).await?;
    }

    // the archive writer is created up front, but only handed to the
    // multiplexer once the prelude has been written
    let mut archive_out: Option<(MuxReceiver, Box<dyn FinishWrite>)> = None;
    let sink: Arc<OutputSink> = if let Some(path) = self.options.output.archive.clone() {
      let out = self.open_archive_out(&path)?;
      let (control, receiver) = MuxControl::channel();
      archive_out = Some((receiver, out));
      Arc::new(OutputSink::archive(control))
    } else if to_stdout {
      let writer = self
        .output_writer
        .take()
        .unwrap_or_else(|| Box::new(std::io::stdout()));
      Arc::new(OutputSink::stdout(writer))
    } else {
      Arc::new(OutputSink::tree(self.tree_root(), self.options.output.gzip))
    };

    let ctx = DumpContext {
      source: Arc::clone(&self.source),
      sink: Arc::clone(&sink),
      manager: Arc::clone(&manager),
      options: Arc::clone(&self.options),
      query,
      shutdown: self.shutdown.clone(),
    };

    debug!("dump phase: collection metadata");
    self.emit_metadata(&ctx).await?;

    let mut mux_task: Option<JoinHandle<Result<()>>> = None;
    if let Some((receiver, mut out)) = archive_out.take() {
      let prelude = self.build_prelude(&server.version, &manager, &sink);
      prelude.write_to(&mut out)?;
      let mux = Multiplexer::new(receiver, out, self.shutdown.token());
      mux_task = Some(tokio::spawn(mux.run()));
    }

    let result = self
      .io_phases(&ctx, &server, wants_admin_users, admin_selected)
      .await;

    // release every frame sender so the multiplexer can drain and seal
    drop(ctx);
    drop(sink);

    if let Some(task) = mux_task {
      let mux_result = match task.await {
        Ok(r) => r,
        Err(e) => Err(Error::Internal(format!("archive writer task failed: {e}"))),
      };
      return match (result, mux_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(mux_err)) => Err(mux_err),
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(mux_err)) => Err(Error::chain(primary, mux_err)),
      };
    }
    result
  }

  async fn io_phases(
    &self,
    ctx: &DumpContext,
    server: &ServerInfo,
    wants_admin_users: bool,
    admin_selected: bool,
  ) -> Result<()> {
    debug!("dump phase: users, roles, auth version");
    if wants_admin_users {
      self.dump_admin_users(ctx).await?;
    }
    if self.options.output.dump_users_and_roles {
      let db = self.options.selection.db.as_deref().unwrap_or_default();
      info!(db, "dumping users and roles");
      if admin_selected {
        info!("users and roles already dumped with the admin database");
      } else {
        self.dump_users_for_db(ctx, db).await?;
      }
    }

    // T0: bound the consistency window before any collection data moves
    let oplog_start = if self.options.output.oplog {
      Some(oplog::mark_oplog_start(&self.source).await?)
    } else {
      None
    };

    debug!("dump phase: collections");
    self.dump_collections(ctx).await?;

    if let Some(start) = oplog_start {
      debug!("dump phase: oplog");
      if let Some(barrier) = &self.options.input.source_writes_done_barrier {
        wait_for_barrier(barrier, &self.shutdown).await?;
      }
      oplog::capture_oplog(ctx, start).await?;
    }

    if self.options.output.archive.is_none() && self.options.output.out.as_deref() != Some("-") {
      self.write_tree_prelude(&server.version)?;
    }
    Ok(())
  }

  async fn dump_collections(&self, ctx: &DumpContext) -> Result<()> {
    let jobs = self
      .options
      .output
      .num_parallel_collections
      .min(ctx.manager.collection_count());
    let policy = if jobs > 1 {
      FinalizePolicy::LongestTaskFirst
    } else {
      FinalizePolicy::Legacy
    };
    ctx.manager.finalize(policy)?;

    if jobs == 0 {
      debug!("no collections to dump");
      return Ok(());
    }
    info!("dumping up to {jobs} collections in parallel");
    run_worker_pool(ctx, jobs).await
  }

  async fn dump_admin_users(&self, ctx: &DumpContext) -> Result<()> {
    for intent in [ctx.manager.users(), ctx.manager.roles(), ctx.manager.auth_version()]
      .into_iter()
      .flatten()
    {
      dumper::dump_intent(ctx, &intent).await?;
    }
    Ok(())
  }

  async fn dump_users_for_db(&self, ctx: &DumpContext, db: &str) -> Result<()> {
    let filter = serde_json::json!({ "db": db });
    for intent in [ctx.manager.users(), ctx.manager.roles()].into_iter().flatten() {
      dumper::dump_intent_with_filter(ctx, &intent, Some(&filter)).await?;
    }
    if let Some(intent) = ctx.manager.auth_version() {
      dumper::dump_intent_with_filter(ctx, &intent, None).await?;
    }
    Ok(())
  }

  async fn emit_metadata(&self, ctx: &DumpContext) -> Result<()> {
    for intent in ctx.manager.all_intents() {
      if !intent.dumps_metadata {
        continue;
      }
      let doc = self.source.collection_metadata(&intent.ns).await?;
      let bytes = serde_json::to_vec(&doc)
        .map_err(|e| Error::Internal(format!("encoding metadata for {}: {e}", intent.ns)))?;
      let mut stream = ctx.sink.open_metadata(&intent).await?;
      stream.write_record(&bytes).await?;
      stream.close().await?;
    }
    Ok(())
  }

  fn build_prelude(&self, server_version: &str, manager: &IntentManager, sink: &OutputSink) -> Prelude {
    let manifest = sink.metadata_manifest();
    let intents = manager
      .all_intents()
      .into_iter()
      .map(|intent| PreludeEntry {
        db: intent.ns.db.clone(),
        collection: intent.ns.collection.clone(),
        kind: intent.kind,
        metadata: manifest.get(&intent.ns).cloned(),
      })
      .collect();
    Prelude {
      server_version: server_version.to_string(),
      tool_version: self.tool_version.clone(),
      parallel_collections: self.options.output.num_parallel_collections,
      intents,
    }
  }

  fn check_topology(&self, server: &ServerInfo) -> Result<()> {
    if self.options.output.oplog && server.is_router {
      return Err(Error::TopologyMismatch(
        "oplog capture requires a node with its own oplog".to_string(),
      ));
    }
    let admin_selected = self.options.selection.db.as_deref() == Some("admin");
    if server.is_restricted && (self.options.output.dump_users_and_roles || admin_selected) {
      return Err(Error::TopologyMismatch(
        "cannot dump the admin database from a restricted managed cluster".to_string(),
      ));
    }
    Ok(())
  }

  fn tree_root(&self) -> PathBuf {
    PathBuf::from(self.options.output.out.clone().unwrap_or_else(|| "dump".to_string()))
  }

  fn open_archive_out(&mut self, path: &str) -> Result<Box<dyn FinishWrite>> {
    let base: Box<dyn FinishWrite> = if path == "-" {
      match self.output_writer.take() {
        Some(writer) => Box::new(NopFinishWriter(writer)),
        None => Box::new(std::io::stdout()),
      }
    } else {
      let mut target = PathBuf::from(path);
      // pointing the archive at a directory creates a default file in it
      if target.is_dir() {
        let name = if self.options.output.gzip { "archive.gz" } else { "archive" };
        target = target.join(name);
      }
      debug!(path = %target.display(), "creating archive file");
      Box::new(File::create(&target)?)
    };
    if self.options.output.gzip {
      Ok(Box::new(GzEncoder::new(base, Compression::default())))
    } else {
      Ok(base)
    }
  }

  fn write_tree_prelude(&self, server_version: &str) -> Result<()> {
    let root = self.tree_root();
    if !root.exists() {
      // nothing was dumped, so there is nowhere to record versions
      debug!(root = %root.display(), "output directory absent, skipping prelude");
      return Ok(());
    }
    let name = if self.options.output.gzip { "prelude.json.gz" } else { "prelude.json" };
    let path = root.join(name);
    debug!(path = %path.display(), "writing prelude");

    let body = serde_json::json!({
      "ServerVersion": server_version,
      "ToolVersion": self.tool_version,
    });
    let bytes = serde_json::to_vec(&body).map_err(|e| Error::Internal(e.to_string()))?;

    let mut file = File::create(&path)?;
    if self.options.output.gzip {
      let mut encoder = GzEncoder::new(file, Compression::default());
      encoder.write_all(&bytes)?;
      encoder.finish()?;
    } else {
      file.write_all(&bytes)?;
    }
    Ok(())
  }
}

/// Poll for the barrier file, waking promptly on shutdown.
async fn wait_for_barrier(path: &Path, shutdown: &ShutdownNotifier) -> Result<()> {
  info!(path = %path.display(), "waiting for source writes barrier");
  loop {
    if path.exists() {
      debug!(path = %path.display(), "barrier reached");
      return Ok(());
    }
    tokio::select! {
      biased;
      _ = shutdown.fired() => return Err(Error::Terminated),
      _ = tokio::time::sleep(Duration::from_millis(100)) => {}
    }
  }
}
