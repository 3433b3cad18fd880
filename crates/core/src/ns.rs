//! Namespaces and intent classification.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A `(database, collection)` pair identifying one document container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
  pub db: String,
  pub collection: String,
}

impl Namespace {
  /// Build a namespace, rejecting empty components and embedded NULs.
  pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
    let db = db.into();
    let collection = collection.into();
    if db.is_empty() || collection.is_empty() {
      return Err(Error::Internal(format!(
        "namespace components must be non-empty, got `{db}.{collection}`"
      )));
    }
    if db.contains('\0') || collection.contains('\0') {
      return Err(Error::Internal(format!(
        "namespace `{db}.{collection}` contains a NUL byte"
      )));
    }
    Ok(Self { db, collection })
  }
}

impl std::fmt::Display for Namespace {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}", self.db, self.collection)
  }
}

/// What a dump work unit contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
  Regular,
  View,
  Timeseries,
  Users,
  Roles,
  AuthVersion,
  Oplog,
}

impl IntentKind {
  /// Stable single-byte encoding used by the archive frame tags.
  pub fn as_u8(self) -> u8 {
    match self {
      IntentKind::Regular => 0,
      IntentKind::View => 1,
      IntentKind::Timeseries => 2,
      IntentKind::Users => 3,
      IntentKind::Roles => 4,
      IntentKind::AuthVersion => 5,
      IntentKind::Oplog => 6,
    }
  }

  pub fn from_u8(byte: u8) -> Option<Self> {
    Some(match byte {
      0 => IntentKind::Regular,
      1 => IntentKind::View,
      2 => IntentKind::Timeseries,
      3 => IntentKind::Users,
      4 => IntentKind::Roles,
      5 => IntentKind::AuthVersion,
      6 => IntentKind::Oplog,
      _ => return None,
    })
  }

  /// Kinds that must be serialized with the rest of the dump rather than
  /// handed to the parallel worker pool.
  pub fn is_special(self) -> bool {
    matches!(
      self,
      IntentKind::Users | IntentKind::Roles | IntentKind::AuthVersion | IntentKind::Oplog
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_empty_components() {
    assert!(Namespace::new("", "c").is_err());
    assert!(Namespace::new("db", "").is_err());
  }

  #[test]
  fn rejects_embedded_nul() {
    assert!(Namespace::new("d\0b", "c").is_err());
  }

  #[test]
  fn kind_byte_round_trip() {
    for kind in [
      IntentKind::Regular,
      IntentKind::View,
      IntentKind::Timeseries,
      IntentKind::Users,
      IntentKind::Roles,
      IntentKind::AuthVersion,
      IntentKind::Oplog,
    ] {
      assert_eq!(IntentKind::from_u8(kind.as_u8()), Some(kind));
    }
    assert_eq!(IntentKind::from_u8(250), None);
  }
}
