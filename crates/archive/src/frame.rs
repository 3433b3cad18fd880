//! Wire framing.
//!
//! Layout after the prelude: a sequence of frames, each either
//!
//! ```text
//! 0x00 | tag | u32 payload_len | payload     (data)
//! 0x01 | tag                                 (stream terminator)
//! ```
//!
//! where `tag` is `u32 db_len | db | u32 coll_len | coll | kind_byte`. All
//! integers are little-endian. Every frame is self-describing so streams can
//! be interleaved arbitrarily.

use std::io::{self, Read, Write};

use docdump_core::{IntentKind, Namespace};

pub const MAGIC: &[u8; 4] = b"DDMP";
pub const FORMAT_VERSION: u32 = 1;

const FRAME_DATA: u8 = 0;
const FRAME_END: u8 = 1;

/// Identifier of one logical stream inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTag {
  pub ns: Namespace,
  pub kind: IntentKind,
}

impl std::fmt::Display for StreamTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.ns)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  Data { tag: StreamTag, payload: Vec<u8> },
  End { tag: StreamTag },
}

impl Frame {
  pub fn tag(&self) -> &StreamTag {
    match self {
      Frame::Data { tag, .. } | Frame::End { tag } => tag,
    }
  }

  pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
    match self {
      Frame::Data { tag, payload } => {
        w.write_all(&[FRAME_DATA])?;
        encode_tag(tag, w)?;
        w.write_all(&(payload.len() as u32).to_le_bytes())?;
        w.write_all(payload)
      }
      Frame::End { tag } => {
        w.write_all(&[FRAME_END])?;
        encode_tag(tag, w)
      }
    }
  }

  /// Decode the next frame; `Ok(None)` on clean end-of-stream.
  pub fn decode(r: &mut impl Read) -> io::Result<Option<Frame>> {
    let mut kind_byte = [0u8; 1];
    match r.read_exact(&mut kind_byte) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
      Err(e) => return Err(e),
    }
    let tag = decode_tag(r)?;
    match kind_byte[0] {
      FRAME_DATA => {
        let len = read_u32(r)? as usize;
        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)?;
        Ok(Some(Frame::Data { tag, payload }))
      }
      FRAME_END => Ok(Some(Frame::End { tag })),
      other => Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unknown frame type byte {other:#x}"),
      )),
    }
  }
}

fn encode_tag(tag: &StreamTag, w: &mut impl Write) -> io::Result<()> {
  write_lp_str(&tag.ns.db, w)?;
  write_lp_str(&tag.ns.collection, w)?;
  w.write_all(&[tag.kind.as_u8()])
}

fn decode_tag(r: &mut impl Read) -> io::Result<StreamTag> {
  let db = read_lp_str(r)?;
  let collection = read_lp_str(r)?;
  let mut kind = [0u8; 1];
  r.read_exact(&mut kind)?;
  let kind = IntentKind::from_u8(kind[0])
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown stream kind byte"))?;
  let ns = Namespace::new(db, collection)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
  Ok(StreamTag { ns, kind })
}

fn write_lp_str(s: &str, w: &mut impl Write) -> io::Result<()> {
  w.write_all(&(s.len() as u32).to_le_bytes())?;
  w.write_all(s.as_bytes())
}

fn read_lp_str(r: &mut impl Read) -> io::Result<String> {
  let len = read_u32(r)? as usize;
  let mut bytes = vec![0u8; len];
  r.read_exact(&mut bytes)?;
  String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
  let mut bytes = [0u8; 4];
  r.read_exact(&mut bytes)?;
  Ok(u32::from_le_bytes(bytes))
}

/// Write the archive magic and format version.
pub fn write_header(w: &mut impl Write) -> io::Result<()> {
  w.write_all(MAGIC)?;
  w.write_all(&FORMAT_VERSION.to_le_bytes())
}

/// Read and verify the archive magic; returns the format version.
pub fn read_header(r: &mut impl Read) -> io::Result<u32> {
  let mut magic = [0u8; 4];
  r.read_exact(&mut magic)?;
  if &magic != MAGIC {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      "not an archive: bad magic",
    ));
  }
  read_u32(r)
}
