//! Archive prelude: the JSON header carrying versions, the parallelism
//! hint, and the intent manifest a restore tool needs before it sees any
//! frames. On the directory-tree sink only the version pair is written (as
//! `prelude.json`).

use std::io::{Read, Write};

use docdump_core::{IntentKind, Namespace};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::{read_header, write_header};

/// One manifest entry per intent in the dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PreludeEntry {
  pub db: String,
  pub collection: String,
  pub kind: IntentKind,
  /// Collection metadata document captured during the metadata phase.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Value>,
}

impl PreludeEntry {
  pub fn namespace(&self) -> Namespace {
    Namespace {
      db: self.db.clone(),
      collection: self.collection.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Prelude {
  pub server_version: String,
  pub tool_version: String,
  pub parallel_collections: usize,
  pub intents: Vec<PreludeEntry>,
}

impl Prelude {
  /// Write the archive header followed by the length-prefixed prelude body.
  pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
    write_header(w)?;
    let body = serde_json::to_vec(self)?;
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(&body)
  }

  /// Read back a prelude written by [`Prelude::write_to`].
  pub fn read_from(r: &mut impl Read) -> std::io::Result<Self> {
    read_header(r)?;
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
    r.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn prelude_round_trip() {
    let prelude = Prelude {
      server_version: "7.0.2".to_string(),
      tool_version: "0.4.1".to_string(),
      parallel_collections: 4,
      intents: vec![
        PreludeEntry {
          db: "shop".to_string(),
          collection: "orders".to_string(),
          kind: IntentKind::Regular,
          metadata: Some(json!({"options": {}, "indexes": []})),
        },
        PreludeEntry {
          db: "local".to_string(),
          collection: "oplog".to_string(),
          kind: IntentKind::Oplog,
          metadata: None,
        },
      ],
    };

    let mut buf = Vec::new();
    prelude.write_to(&mut buf).unwrap();
    let parsed = Prelude::read_from(&mut buf.as_slice()).unwrap();
    assert_eq!(parsed, prelude);
  }

  #[test]
  fn field_names_are_stable() {
    let prelude = Prelude {
      server_version: "7.0.2".to_string(),
      tool_version: "0.4.1".to_string(),
      parallel_collections: 1,
      intents: vec![],
    };
    let json = serde_json::to_value(&prelude).unwrap();
    assert!(json.get("ServerVersion").is_some());
    assert!(json.get("ToolVersion").is_some());
    assert!(json.get("ParallelCollections").is_some());
    assert!(json.get("Intents").is_some());
  }
}
