//! Frame multiplexer: funnels N concurrent producers into one serialized
//! archive stream.
//!
//! Producers obtain a [`StreamHandle`] from the [`MuxControl`], write record
//! bytes into it, and close it to emit the stream's terminator frame. The
//! [`Multiplexer`] task is the only writer of the underlying output; it
//! drains frames until the control and every handle are gone, or until the
//! shutdown token fires, in which case it stops accepting new frames,
//! drains what is already queued, and returns.
//!
//! Bytes written to one handle appear in the archive in write order.
//! Nothing is guaranteed across handles.

use std::io;

use docdump_core::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::FinishWrite;
use crate::frame::{Frame, StreamTag};

/// Records are coalesced into frames of roughly this size before being
/// handed to the multiplexer.
const FRAME_CHUNK_BYTES: usize = 64 * 1024;

/// Depth of the frame queue between producers and the multiplexer.
const QUEUE_DEPTH: usize = 64;

/// Handle used to open logical streams; dropping every control clone and
/// every open stream handle lets the multiplexer finish.
#[derive(Clone)]
pub struct MuxControl {
  tx: mpsc::Sender<Frame>,
}

/// Receiving half of the frame channel, consumed by [`Multiplexer::new`].
pub struct MuxReceiver {
  rx: mpsc::Receiver<Frame>,
}

impl MuxControl {
  /// Create the frame channel. The control half can start opening streams
  /// immediately; the receiver is attached to a writer once the archive
  /// header has been emitted.
  pub fn channel() -> (MuxControl, MuxReceiver) {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    (MuxControl { tx }, MuxReceiver { rx })
  }

  /// Register a new logical stream.
  pub fn open_stream(&self, tag: StreamTag) -> StreamHandle {
    trace!(stream = %tag, "opening archive stream");
    StreamHandle {
      tag,
      tx: self.tx.clone(),
      buf: Vec::new(),
    }
  }
}

/// Write side of one logical stream.
pub struct StreamHandle {
  tag: StreamTag,
  tx: mpsc::Sender<Frame>,
  buf: Vec<u8>,
}

impl StreamHandle {
  /// Append record bytes to this stream.
  pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
    self.buf.extend_from_slice(bytes);
    if self.buf.len() >= FRAME_CHUNK_BYTES {
      self.flush_frame().await?;
    }
    Ok(())
  }

  /// Flush remaining bytes and emit this stream's terminator frame.
  pub async fn close(mut self) -> Result<()> {
    self.flush_frame().await?;
    let tag = self.tag.clone();
    self.send(Frame::End { tag }).await
  }

  async fn flush_frame(&mut self) -> Result<()> {
    if self.buf.is_empty() {
      return Ok(());
    }
    let payload = std::mem::take(&mut self.buf);
    let tag = self.tag.clone();
    self.send(Frame::Data { tag, payload }).await
  }

  async fn send(&self, frame: Frame) -> Result<()> {
    self.tx.send(frame).await.map_err(|_| {
      Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "archive multiplexer is no longer accepting frames",
      ))
    })
  }
}

/// The single consumer task that serializes frames onto the archive writer.
pub struct Multiplexer {
  rx: mpsc::Receiver<Frame>,
  out: Box<dyn FinishWrite>,
  shutdown: CancellationToken,
}

impl Multiplexer {
  /// Attach the frame channel to the underlying writer. The caller must
  /// already have written the prelude to `out`.
  pub fn new(receiver: MuxReceiver, out: Box<dyn FinishWrite>, shutdown: CancellationToken) -> Self {
    Self {
      rx: receiver.rx,
      out,
      shutdown,
    }
  }

  /// Drain frames until every producer is done (or shutdown fires), then
  /// seal the output.
  pub async fn run(mut self) -> Result<()> {
    let mut frames = 0usize;
    loop {
      tokio::select! {
        biased;

        _ = self.shutdown.cancelled() => {
          debug!(frames, "multiplexer shutting down, draining in-flight frames");
          self.rx.close();
          while let Some(frame) = self.rx.recv().await {
            frame.encode(&mut self.out)?;
            frames += 1;
          }
          break;
        }

        frame = self.rx.recv() => match frame {
          Some(frame) => {
            frame.encode(&mut self.out)?;
            frames += 1;
          }
          None => break,
        },
      }
    }
    debug!(frames, "multiplexer complete, sealing archive");
    self.out.finish()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::io::Write;
  use std::sync::{Arc, Mutex};

  use docdump_core::{IntentKind, Namespace};

  use super::*;

  #[derive(Clone, Default)]
  struct SharedBuf(Arc<Mutex<Vec<u8>>>);

  impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  impl FinishWrite for SharedBuf {
    fn finish(self: Box<Self>) -> io::Result<()> {
      Ok(())
    }
  }

  fn tag(coll: &str) -> StreamTag {
    StreamTag {
      ns: Namespace::new("db", coll).unwrap(),
      kind: IntentKind::Regular,
    }
  }

  /// Reassemble per-stream bytes from an encoded frame sequence.
  fn reassemble(mut bytes: &[u8]) -> HashMap<String, Vec<u8>> {
    let mut streams: HashMap<String, Vec<u8>> = HashMap::new();
    let mut terminated: Vec<String> = Vec::new();
    while let Some(frame) = Frame::decode(&mut bytes).unwrap() {
      match frame {
        Frame::Data { tag, payload } => {
          streams.entry(tag.to_string()).or_default().extend_from_slice(&payload);
        }
        Frame::End { tag } => terminated.push(tag.to_string()),
      }
    }
    for name in streams.keys() {
      assert!(terminated.contains(name), "stream {name} missing terminator");
    }
    streams
  }

  #[tokio::test]
  async fn concurrent_streams_preserve_per_stream_order() {
    let buf = SharedBuf::default();
    let (control, receiver) = MuxControl::channel();
    let mux = Multiplexer::new(receiver, Box::new(buf.clone()), CancellationToken::new());
    let mux_task = tokio::spawn(mux.run());

    let mut tasks = Vec::new();
    for i in 0..4 {
      let mut handle = control.open_stream(tag(&format!("c{i}")));
      tasks.push(tokio::spawn(async move {
        let mut expected = Vec::new();
        for n in 0..100u32 {
          let record = format!("record-{i}-{n};").into_bytes();
          handle.write(&record).await.unwrap();
          expected.extend_from_slice(&record);
        }
        handle.close().await.unwrap();
        expected
      }));
    }

    let mut expected = HashMap::new();
    for (i, task) in tasks.into_iter().enumerate() {
      expected.insert(format!("db.c{i}"), task.await.unwrap());
    }

    drop(control);
    mux_task.await.unwrap().unwrap();

    let streams = reassemble(&buf.0.lock().unwrap());
    assert_eq!(streams, expected);
  }

  #[tokio::test]
  async fn empty_stream_still_gets_terminator() {
    let buf = SharedBuf::default();
    let (control, receiver) = MuxControl::channel();
    let mux = Multiplexer::new(receiver, Box::new(buf.clone()), CancellationToken::new());
    let mux_task = tokio::spawn(mux.run());

    let handle = control.open_stream(tag("empty"));
    handle.close().await.unwrap();
    drop(control);
    mux_task.await.unwrap().unwrap();

    let bytes = buf.0.lock().unwrap().clone();
    let frame = Frame::decode(&mut bytes.as_slice()).unwrap().unwrap();
    assert!(matches!(frame, Frame::End { .. }));
  }

  #[tokio::test]
  async fn shutdown_drains_queued_frames_and_returns() {
    let buf = SharedBuf::default();
    let shutdown = CancellationToken::new();
    let (control, receiver) = MuxControl::channel();

    // Queue a frame before the multiplexer task even starts.
    let mut handle = control.open_stream(tag("c"));
    handle.write(&vec![7u8; FRAME_CHUNK_BYTES]).await.unwrap();

    shutdown.cancel();
    let mux = Multiplexer::new(receiver, Box::new(buf.clone()), shutdown);
    mux.run().await.unwrap();

    let bytes = buf.0.lock().unwrap().clone();
    match Frame::decode(&mut bytes.as_slice()).unwrap().unwrap() {
      Frame::Data { payload, .. } => assert_eq!(payload, vec![7u8; FRAME_CHUNK_BYTES]),
      other => panic!("expected a data frame, got {other:?}"),
    }

    // The channel is closed: further writes fail instead of hanging.
    let err = handle.write(&vec![1u8; FRAME_CHUNK_BYTES]).await;
    assert!(err.is_err());
  }
}
