//! Collection dump workers.
//!
//! Workers share the intent manager and a result channel: pop, dump,
//! finish, repeat until the queue is drained. Inside each dump a producer
//! task iterates the cursor and hands records over a one-slot channel to
//! the writer side, so a slow sink never blocks the cursor's socket for
//! more than one record.

use std::sync::Arc;

use client::{RecordCursor, Source};
use docdump_core::{DumpOptions, Error, IntentKind, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::intent::Intent;
use crate::manager::IntentManager;
use crate::query::rewrite_timeseries_query;
use crate::shutdown::ShutdownNotifier;
use crate::sink::{DocStream, OutputSink};

/// Everything a worker needs, cheaply cloneable.
#[derive(Clone)]
pub struct DumpContext {
  pub source: Arc<dyn Source>,
  pub sink: Arc<OutputSink>,
  pub manager: Arc<IntentManager>,
  pub options: Arc<DumpOptions>,
  pub query: Option<Value>,
  pub shutdown: ShutdownNotifier,
}

/// Run `jobs` workers against the manager and wait for all of them.
///
/// The first error fires the shutdown notifier so the remaining workers
/// stop at their next record; a non-terminated error always wins over
/// `Terminated`.
pub async fn run_worker_pool(ctx: &DumpContext, jobs: usize) -> Result<()> {
  let (results_tx, mut results_rx) = mpsc::channel::<Result<()>>(jobs);
  for id in 0..jobs {
    let ctx = ctx.clone();
    let results = results_tx.clone();
    tokio::spawn(async move {
      let result = worker_loop(&ctx, id).await;
      let _ = results.send(result).await;
    });
  }
  drop(results_tx);

  let mut first_error: Option<Error> = None;
  let mut terminated = false;
  while let Some(result) = results_rx.recv().await {
    match result {
      Ok(()) => {}
      Err(e) if e.is_terminated() => terminated = true,
      Err(e) => {
        if first_error.is_none() {
          // stop the other workers at their next record boundary
          ctx.shutdown.notify();
          first_error = Some(e);
        } else {
          debug!(error = %e, "additional worker error after abort");
        }
      }
    }
  }

  match first_error {
    Some(e) => Err(e),
    None if terminated => Err(Error::Terminated),
    None => Ok(()),
  }
}

async fn worker_loop(ctx: &DumpContext, id: usize) -> Result<()> {
  debug!(worker = id, "dump worker starting");
  while let Some(intent) = ctx.manager.pop() {
    if intent.dumps_data {
      dump_intent(ctx, &intent).await?;
    }
    ctx.manager.finish(&intent.ns);
  }
  debug!(worker = id, "dump worker exiting, no more work");
  Ok(())
}

/// Dump one intent's documents into its data stream.
pub(crate) async fn dump_intent(ctx: &DumpContext, intent: &Intent) -> Result<u64> {
  let to_stdout = ctx.options.output.out.as_deref() == Some("-");
  if to_stdout {
    info!(ns = %intent.ns, "writing to standard output");
  } else {
    info!(ns = %intent.ns, location = %ctx.sink.data_location(intent), "writing");
  }

  let mut stream = ctx.sink.open_data(intent).await?;

  // A view dumped as a view contributes no documents; the opened (empty)
  // stream still records its existence for restore.
  if intent.kind == IntentKind::View && !ctx.options.output.views_as_collections {
    stream.close().await?;
    debug!(ns = %intent.ns, "view recorded without documents");
    return Ok(0);
  }

  if ctx.query.is_none() && intent.kind != IntentKind::Oplog {
    let data_ns = intent.data_namespace();
    let expected = if intent.kind == IntentKind::View {
      ctx.source.exact_count(&data_ns, None).await?
    } else {
      ctx.source.estimated_count(&data_ns).await?
    };
    debug!(ns = %intent.ns, expected, "counted documents");
  }

  let filter = match &ctx.query {
    Some(query) if intent.kind == IntentKind::Timeseries => {
      Some(rewrite_timeseries_query(query, intent)?)
    }
    Some(query) => Some(query.clone()),
    None => None,
  };

  let cursor = ctx.source.cursor(&intent.data_namespace(), filter.as_ref()).await?;
  let result = stream_records(cursor, &mut stream, &ctx.shutdown).await;
  let count = seal_stream(stream, result).await?;

  if to_stdout {
    info!("dumped {count} {}", doc_plural(count));
  } else {
    info!(ns = %intent.ns, count, "done dumping");
  }
  Ok(count)
}

/// Dump an intent with a fixed filter, bypassing counting and view
/// handling. Used for the per-database users/roles passes.
pub(crate) async fn dump_intent_with_filter(
  ctx: &DumpContext,
  intent: &Intent,
  filter: Option<&Value>,
) -> Result<u64> {
  info!(ns = %intent.ns, location = %ctx.sink.data_location(intent), "writing");
  let mut stream = ctx.sink.open_data(intent).await?;
  let cursor = ctx.source.cursor(&intent.data_namespace(), filter).await?;
  let result = stream_records(cursor, &mut stream, &ctx.shutdown).await;
  let count = seal_stream(stream, result).await?;
  info!(ns = %intent.ns, count, "done dumping");
  Ok(count)
}

/// Move records from the cursor to the stream through a one-slot handoff.
///
/// The producer half owns the cursor and observes the shutdown notifier
/// between records; the writer half drains the channel and counts what it
/// wrote. A cursor error observed after the last record still fails the
/// dump: a short read must never look like success.
pub(crate) async fn stream_records(
  mut cursor: Box<dyn RecordCursor>,
  stream: &mut Box<dyn DocStream>,
  shutdown: &ShutdownNotifier,
) -> Result<u64> {
  let (records_tx, mut records_rx) = mpsc::channel::<Vec<u8>>(1);
  let shutdown = shutdown.clone();
  let producer = tokio::spawn(async move {
    loop {
      tokio::select! {
        biased;

        _ = shutdown.fired() => {
          debug!("terminating reads");
          return Err(Error::Terminated);
        }

        next = cursor.next() => match next {
          Some(Ok(record)) => {
            if records_tx.send(record).await.is_err() {
              // writer side bailed; its error is the one that surfaces
              return Ok(());
            }
          }
          Some(Err(e)) => return Err(e),
          None => return Ok(()),
        },
      }
    }
  });

  let mut count = 0u64;
  let mut write_error: Option<Error> = None;
  while let Some(record) = records_rx.recv().await {
    if let Err(e) = stream.write_record(&record).await {
      write_error = Some(e);
      break;
    }
    count += 1;
  }
  drop(records_rx);

  let producer_result = producer
    .await
    .map_err(|e| Error::Internal(format!("cursor task failed: {e}")))?;
  if let Some(e) = write_error {
    return Err(e);
  }
  producer_result?;
  Ok(count)
}

/// Close the stream, preserving an earlier dump error over a close error.
pub(crate) async fn seal_stream(stream: Box<dyn DocStream>, result: Result<u64>) -> Result<u64> {
  match (result, stream.close().await) {
    (Ok(count), Ok(())) => Ok(count),
    (Ok(_), Err(close_err)) => Err(close_err),
    (Err(primary), Ok(())) => Err(primary),
    (Err(primary), Err(close_err)) => {
      warn!(error = %close_err, "stream close also failed after dump error");
      Err(primary)
    }
  }
}

fn doc_plural(count: u64) -> &'static str {
  if count == 1 { "document" } else { "documents" }
}
