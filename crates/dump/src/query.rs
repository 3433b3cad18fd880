//! User query loading and the timeseries predicate rewrite.

use docdump_core::{Error, InputOptions, Result};
use serde_json::Value;

use crate::intent::Intent;

/// Load the user filter from `--query` or `--queryFile`. The filter must be
/// a JSON object.
pub fn load_query(input: &InputOptions) -> Result<Option<Value>> {
  let text = if let Some(query) = &input.query {
    query.clone()
  } else if let Some(path) = &input.query_file {
    std::fs::read_to_string(path)?
  } else {
    return Ok(None);
  };

  let value: Value =
    serde_json::from_str(&text).map_err(|e| Error::InvalidOptions(format!("error parsing query: {e}")))?;
  if !value.is_object() {
    return Err(Error::InvalidOptions(
      "query must be a JSON document".to_string(),
    ));
  }
  Ok(Some(value))
}

/// Rewrite a filter for a timeseries collection.
///
/// Buckets store user tags under the `meta` key, so a predicate on
/// `<metaField>[.sub]` becomes `meta[.sub]`. A predicate whose first path
/// segment is anything else cannot be answered from the buckets and is
/// rejected.
pub fn rewrite_timeseries_query(query: &Value, intent: &Intent) -> Result<Value> {
  let meta_field = intent
    .options
    .get("timeseries")
    .and_then(|ts| ts.get("metaField"))
    .and_then(Value::as_str)
    .ok_or_else(|| {
      Error::Internal(format!(
        "could not determine the meta field for timeseries collection {}",
        intent.ns
      ))
    })?;

  let predicates = query
    .as_object()
    .ok_or_else(|| Error::InvalidOptions("query must be a JSON document".to_string()))?;

  let mut rewritten = serde_json::Map::with_capacity(predicates.len());
  for (key, condition) in predicates {
    let (head, rest) = match key.split_once('.') {
      Some((head, rest)) => (head, Some(rest)),
      None => (key.as_str(), None),
    };
    if head != meta_field {
      return Err(Error::QueryIncompatible(format!(
        "cannot query `{key}` on timeseries collection {}: only the meta field `{meta_field}` can be filtered",
        intent.ns
      )));
    }
    let new_key = match rest {
      Some(rest) => format!("meta.{rest}"),
      None => "meta".to_string(),
    };
    rewritten.insert(new_key, condition.clone());
  }
  Ok(Value::Object(rewritten))
}
