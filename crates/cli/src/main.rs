//! docdump - dump the logical contents of a document store into a
//! restorable directory tree, archive stream, or standard output.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use docdump_core::{DumpOptions, InputOptions, OutputOptions, SelectionOptions};
use dump::Orchestrator;
use tokio::signal;
use tracing::{info, warn};

mod logging;

use logging::init_logging;

#[derive(Parser)]
#[command(name = "docdump")]
#[command(version)]
#[command(about = "Dump the contents of a document store")]
struct Cli {
  /// Connection string for the source server
  #[arg(long, value_name = "URI", default_value = "mem://")]
  uri: String,

  /// Database to dump (default: all databases)
  #[arg(long)]
  db: Option<String>,

  /// Collection to dump (requires --db)
  #[arg(long)]
  collection: Option<String>,

  /// Collection to skip; repeatable (requires --db)
  #[arg(long = "excludeCollection", value_name = "NAME")]
  exclude_collection: Vec<String>,

  /// Collection name prefix to skip; repeatable (requires --db)
  #[arg(long = "excludeCollectionsWithPrefix", value_name = "PREFIX")]
  exclude_collections_with_prefix: Vec<String>,

  /// Dump directory, or `-` for standard output
  #[arg(long, value_name = "DIR")]
  out: Option<String>,

  /// Write a single archive file (or `-` for standard output) instead of a
  /// directory tree
  #[arg(long, value_name = "FILE")]
  archive: Option<String>,

  /// Compress the output with gzip
  #[arg(long)]
  gzip: bool,

  /// Number of collections to dump in parallel
  #[arg(long = "numParallelCollections", value_name = "N", default_value_t = 4)]
  num_parallel_collections: usize,

  /// Extended-JSON filter for the dumped documents (requires --collection)
  #[arg(long, value_name = "JSON")]
  query: Option<String>,

  /// Read the filter from a file instead
  #[arg(long = "queryFile", value_name = "PATH")]
  query_file: Option<PathBuf>,

  /// Force a full collection scan instead of an index scan
  #[arg(long = "forceTableScan")]
  force_table_scan: bool,

  /// Capture the oplog window spanning the dump (full dumps only)
  #[arg(long)]
  oplog: bool,

  /// Dump the users and roles attached to --db
  #[arg(long = "dumpDbUsersAndRoles")]
  dump_db_users_and_roles: bool,

  /// Dump view contents as if they were collections
  #[arg(long = "viewsAsCollections")]
  views_as_collections: bool,

  /// Test hook: wait for this file to exist before capturing dump endpoints
  #[arg(long = "sourceWritesDoneBarrier", value_name = "PATH", hide = true)]
  source_writes_done_barrier: Option<PathBuf>,
}

impl Cli {
  fn into_options(self) -> (String, DumpOptions) {
    let options = DumpOptions {
      selection: SelectionOptions {
        db: self.db,
        collection: self.collection,
        exclude_collections: self.exclude_collection,
        exclude_collection_prefixes: self.exclude_collections_with_prefix,
      },
      input: InputOptions {
        query: self.query,
        query_file: self.query_file,
        force_table_scan: self.force_table_scan,
        source_writes_done_barrier: self.source_writes_done_barrier,
      },
      output: OutputOptions {
        out: self.out,
        archive: self.archive,
        gzip: self.gzip,
        oplog: self.oplog,
        dump_users_and_roles: self.dump_db_users_and_roles,
        views_as_collections: self.views_as_collections,
        num_parallel_collections: self.num_parallel_collections,
      },
    };
    (self.uri, options)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  init_logging();
  let (uri, options) = Cli::parse().into_options();

  let source = client::connect(&uri).await?;
  let orchestrator = Orchestrator::new(source, options);

  // map interrupts onto the shutdown broadcast
  let notifier = orchestrator.shutdown_notifier();
  tokio::spawn(async move {
    if let Err(e) = signal::ctrl_c().await {
      warn!("failed to listen for interrupts: {e}");
      return;
    }
    info!("received interrupt, shutting down...");
    notifier.notify();
  });

  orchestrator.run().await?;
  Ok(())
}
