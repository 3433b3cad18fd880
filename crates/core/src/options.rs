//! Typed dump options and the compatibility rules enforced before any
//! connection work happens.
//!
//! Rules that depend on the server topology (oplog capture on a routing
//! node, admin access on a restricted cluster) are checked by the
//! orchestrator after probing; everything here is static.

use std::path::PathBuf;

use crate::{Error, Result};

/// Which namespaces to dump.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
  pub db: Option<String>,
  pub collection: Option<String>,
  pub exclude_collections: Vec<String>,
  pub exclude_collection_prefixes: Vec<String>,
}

/// How to read documents.
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
  /// Extended-JSON filter applied to the selected collection.
  pub query: Option<String>,
  /// File containing the filter; mutually exclusive with `query`.
  pub query_file: Option<PathBuf>,
  pub force_table_scan: bool,
  /// Test hook: wait for this file to exist before capturing dump/oplog
  /// endpoints.
  pub source_writes_done_barrier: Option<PathBuf>,
}

/// Where and how to write the dump.
#[derive(Debug, Clone)]
pub struct OutputOptions {
  /// Directory tree root, or `-` for standard output.
  pub out: Option<String>,
  /// Archive file path, or `-` for standard output.
  pub archive: Option<String>,
  pub gzip: bool,
  pub oplog: bool,
  pub dump_users_and_roles: bool,
  pub views_as_collections: bool,
  pub num_parallel_collections: usize,
}

impl Default for OutputOptions {
  fn default() -> Self {
    Self {
      out: None,
      archive: None,
      gzip: false,
      oplog: false,
      dump_users_and_roles: false,
      views_as_collections: false,
      num_parallel_collections: 4,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
  pub selection: SelectionOptions,
  pub input: InputOptions,
  pub output: OutputOptions,
}

impl DumpOptions {
  pub fn has_query(&self) -> bool {
    self.input.query.is_some() || self.input.query_file.is_some()
  }

  /// Check for incompatible option combinations.
  pub fn validate(&self) -> Result<()> {
    let sel = &self.selection;
    let input = &self.input;
    let out = &self.output;

    let invalid = |msg: &str| Err(Error::InvalidOptions(msg.to_string()));

    if out.out.as_deref() == Some("-") && sel.collection.is_none() {
      return invalid("can only dump a single collection to standard output");
    }
    if sel.db.is_none() && sel.collection.is_some() {
      return invalid("cannot dump a collection without a specified database");
    }
    if input.query.is_some() && sel.collection.is_none() {
      return invalid("cannot dump using a query without a specified collection");
    }
    if input.query_file.is_some() && sel.collection.is_none() {
      return invalid("cannot dump using a queryFile without a specified collection");
    }
    if input.query.is_some() && input.query_file.is_some() {
      return invalid("either query or queryFile can be specified as a query option, not both");
    }
    if self.has_query() && input.force_table_scan {
      return invalid("cannot use forceTableScan when specifying a query");
    }
    if out.dump_users_and_roles && sel.db.is_none() {
      return invalid("must specify a database when running with dumpDbUsersAndRoles");
    }
    if out.dump_users_and_roles && sel.collection.is_some() {
      return invalid("cannot specify a collection when running with dumpDbUsersAndRoles");
    }
    if let Some(collection) = &sel.collection
      && collection.starts_with("system.buckets.")
    {
      return invalid(
        "cannot specify a system.buckets collection; specifying the timeseries collection dumps its buckets",
      );
    }
    if out.oplog && sel.db.is_some() {
      return invalid("oplog mode is only supported on full dumps");
    }
    if !sel.exclude_collections.is_empty() && sel.collection.is_some() {
      return invalid("a collection cannot be specified when excludeCollection is specified");
    }
    if !sel.exclude_collection_prefixes.is_empty() && sel.collection.is_some() {
      return invalid(
        "a collection cannot be specified when excludeCollectionsWithPrefix is specified",
      );
    }
    if !sel.exclude_collections.is_empty() && sel.db.is_none() {
      return invalid("a database is required when excludeCollection is specified");
    }
    if !sel.exclude_collection_prefixes.is_empty() && sel.db.is_none() {
      return invalid("a database is required when excludeCollectionsWithPrefix is specified");
    }
    if out.out.is_some() && out.archive.is_some() {
      return invalid("out is not allowed when archive is specified");
    }
    if out.out.as_deref() == Some("-") && out.gzip {
      return invalid("compression cannot be used when dumping a single collection to standard output");
    }
    if out.num_parallel_collections == 0 {
      return invalid("numParallelCollections must be positive");
    }

    Ok(())
  }
}
