//! Oplog capture.
//!
//! The window is bounded by a start timestamp recorded before any
//! collection dumping and an end timestamp recorded after it. The start
//! entry is verified to still exist both before and after the copy: if the
//! oplog rolled over at any point, entries needed for a consistent snapshot
//! are gone and the dump must fail rather than report partial success.
//! Replaying `start..=end` over the restored collections yields a state
//! equivalent to a snapshot at the end timestamp; entries captured both in
//! a collection and in the window are idempotent on replay.

use std::sync::Arc;

use client::{Source, Timestamp};
use docdump_core::{Error, Result};
use tracing::{debug, info};

use crate::dumper::{DumpContext, seal_stream, stream_records};

/// Discover the oplog and record the copy start timestamp (T0).
pub(crate) async fn mark_oplog_start(source: &Arc<dyn Source>) -> Result<Timestamp> {
  let ns = source.oplog_namespace().await?;
  debug!(oplog = %ns, "found oplog");
  info!("getting most recent oplog timestamp");
  source.newest_oplog_timestamp().await
}

/// Copy the `start..=end` oplog window into the oplog intent, with rollover
/// checks on both sides of the copy.
pub(crate) async fn capture_oplog(ctx: &DumpContext, start: Timestamp) -> Result<()> {
  let intent = ctx
    .manager
    .oplog()
    .ok_or_else(|| Error::Internal("oplog capture requested without an oplog intent".to_string()))?;

  let end = ctx.source.newest_oplog_timestamp().await?;
  debug!(%start, %end, "oplog copy window");

  debug!(%start, "checking the start entry still exists");
  if !ctx.source.oplog_timestamp_exists(start).await? {
    return Err(Error::OplogOverflow);
  }

  info!(location = %ctx.sink.data_location(&intent), "writing captured oplog");
  let mut stream = ctx.sink.open_data(&intent).await?;
  let cursor = ctx.source.oplog_cursor(start, end).await?;
  let result = stream_records(cursor, &mut stream, &ctx.shutdown).await;
  let count = seal_stream(stream, result).await?;
  debug!(count, "copied oplog entries");

  // The copy itself may straddle a rollover; verify once more.
  debug!(%start, "re-checking the start entry still exists");
  if !ctx.source.oplog_timestamp_exists(start).await? {
    return Err(Error::OplogOverflow);
  }
  Ok(())
}
