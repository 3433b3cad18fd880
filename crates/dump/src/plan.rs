//! Intent planning: turning the `(db, collection)` selector into the set of
//! intents the dump will execute.

use std::sync::Arc;

use client::{CollectionInfo, CollectionType, Source};
use docdump_core::{
  DumpOptions, Error, IntentKind, Namespace, Result, SelectionOptions,
};
use tracing::debug;

use crate::intent::Intent;
use crate::manager::IntentManager;

/// The server-internal database holding the oplog and replication state;
/// never part of a full dump.
const INTERNAL_DB: &str = "local";

const USERS_COLLECTION: &str = "system.users";
const ROLES_COLLECTION: &str = "system.roles";
const VERSION_COLLECTION: &str = "system.version";

pub(crate) async fn create_all_intents(
  source: &Arc<dyn Source>,
  options: &DumpOptions,
  manager: &IntentManager,
  with_metadata: bool,
) -> Result<()> {
  for db in source.list_databases().await? {
    if db == INTERNAL_DB {
      debug!(db, "skipping server-internal database");
      continue;
    }
    create_intents_for_database(source, options, manager, &db, with_metadata).await?;
  }
  Ok(())
}

pub(crate) async fn create_intents_for_database(
  source: &Arc<dyn Source>,
  options: &DumpOptions,
  manager: &IntentManager,
  db: &str,
  with_metadata: bool,
) -> Result<()> {
  for info in source.list_collections(db).await? {
    if should_skip_collection(&info.name, &options.selection) {
      debug!(db, collection = info.name, "skipping collection");
      continue;
    }
    manager.add(collection_intent(db, info, with_metadata)?)?;
  }
  Ok(())
}

pub(crate) async fn create_collection_intent(
  source: &Arc<dyn Source>,
  manager: &IntentManager,
  db: &str,
  collection: &str,
  with_metadata: bool,
) -> Result<()> {
  let ns = Namespace::new(db, collection)?;
  let info = source
    .collection_info(&ns)
    .await?
    .ok_or_else(|| Error::NotFound(ns.to_string()))?;
  manager.add(collection_intent(db, info, with_metadata)?)
}

pub(crate) async fn create_oplog_intent(
  source: &Arc<dyn Source>,
  manager: &IntentManager,
) -> Result<()> {
  let ns = source.oplog_namespace().await?;
  manager.add(Intent::special(ns, IntentKind::Oplog, 0))
}

/// Queue intents for the admin auth collections that exist on the server.
pub(crate) async fn create_users_roles_version_intents(
  source: &Arc<dyn Source>,
  manager: &IntentManager,
) -> Result<()> {
  let kinds = [
    (USERS_COLLECTION, IntentKind::Users),
    (ROLES_COLLECTION, IntentKind::Roles),
    (VERSION_COLLECTION, IntentKind::AuthVersion),
  ];
  for (collection, kind) in kinds {
    let ns = Namespace::new("admin", collection)?;
    if manager.contains(&ns) {
      continue;
    }
    match source.collection_info(&ns).await? {
      Some(info) => manager.add(Intent::special(ns, kind, info.size_bytes))?,
      None => debug!(%ns, "auth collection not present, skipping"),
    }
  }
  Ok(())
}

fn collection_intent(db: &str, info: CollectionInfo, with_metadata: bool) -> Result<Intent> {
  let ns = Namespace::new(db, &info.name)?;
  let kind = match info.kind {
    CollectionType::Regular => IntentKind::Regular,
    CollectionType::View => IntentKind::View,
    CollectionType::Timeseries => IntentKind::Timeseries,
  };
  Ok(Intent::collection(ns, kind, info.options, info.size_bytes, with_metadata))
}

fn should_skip_collection(name: &str, selection: &SelectionOptions) -> bool {
  // system.* collections are dumped through dedicated intents or not at all
  if name.starts_with("system.") {
    return true;
  }
  if selection.exclude_collections.iter().any(|c| c == name) {
    return true;
  }
  selection
    .exclude_collection_prefixes
    .iter()
    .any(|prefix| name.starts_with(prefix))
}
