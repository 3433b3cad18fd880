//! Archive container format.
//!
//! An archive is a single sequential byte stream: a prelude header followed
//! by interleaved, length-delimited frames, each tagged with the logical
//! stream it belongs to. Many concurrent producers write through
//! [`StreamHandle`]s; a single [`Multiplexer`] task serializes their frames
//! onto the underlying writer. Restore tools reassemble per-stream bytes by
//! tag; no ordering is guaranteed between different streams.

mod frame;
mod mux;
mod prelude;

pub use frame::{FORMAT_VERSION, Frame, MAGIC, StreamTag, read_header, write_header};
pub use mux::{MuxControl, MuxReceiver, Multiplexer, StreamHandle};
pub use prelude::{Prelude, PreludeEntry};

use std::fs::File;
use std::io::{self, Write};

use flate2::write::GzEncoder;

/// A sink writer that can seal its stream on completion (flushing buffers
/// and finishing any compression trailer).
pub trait FinishWrite: Write + Send {
  fn finish(self: Box<Self>) -> io::Result<()>;
}

impl FinishWrite for File {
  fn finish(mut self: Box<Self>) -> io::Result<()> {
    self.flush()?;
    self.sync_all()
  }
}

impl FinishWrite for io::Stdout {
  fn finish(mut self: Box<Self>) -> io::Result<()> {
    self.flush()
  }
}

impl<W: FinishWrite + 'static> FinishWrite for GzEncoder<W> {
  fn finish(self: Box<Self>) -> io::Result<()> {
    let inner = GzEncoder::finish(*self)?;
    Box::new(inner).finish()
  }
}

impl FinishWrite for Box<dyn FinishWrite> {
  fn finish(self: Box<Self>) -> io::Result<()> {
    (*self).finish()
  }
}

/// In-memory writer, used by tests.
impl FinishWrite for io::Cursor<Vec<u8>> {
  fn finish(mut self: Box<Self>) -> io::Result<()> {
    self.flush()
  }
}
