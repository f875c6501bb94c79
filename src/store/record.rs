//! Versioned fixed-size records.

use bytes::{Buf, BufMut};
use color_eyre::Result;
use tracing::{debug, warn};

use super::storage::RecordStore;

/// Trait for composite datasets that are mirrored to a single storage slot.
///
/// Every encoded record starts with a `u16` little-endian version header and
/// has exactly `SIZE` bytes. A stored block of any other size, or carrying any
/// other version, belongs to an incompatible layout and is never decoded.
pub trait Record: Sized {
  /// Storage slot holding this record.
  const PERSIST_KEY: u32;

  /// Bump whenever the layout or the meaning of a field changes.
  const VERSION: u16;

  /// Encoded size including the version header.
  const SIZE: usize;

  /// Record name for log output.
  const NAME: &'static str;

  /// Write everything after the version header.
  fn encode_body(&self, buf: &mut impl BufMut);

  /// Read everything after the version header. `buf` holds exactly
  /// `SIZE - 2` bytes.
  fn decode_body(buf: &mut impl Buf) -> Self;
}

pub(crate) fn encode_record<R: Record>(record: &R) -> Vec<u8> {
  let mut buf = Vec::with_capacity(R::SIZE);
  buf.put_u16_le(R::VERSION);
  record.encode_body(&mut buf);
  debug_assert_eq!(buf.len(), R::SIZE, "{} layout size mismatch", R::NAME);
  buf
}

/// Decode a stored block, expecting layout version `expected_version`.
pub(crate) fn decode_record<R: Record>(mut bytes: &[u8], expected_version: u16) -> Option<R> {
  if bytes.len() != R::SIZE {
    return None;
  }
  let version = bytes.get_u16_le();
  if version != expected_version {
    return None;
  }
  Some(R::decode_body(&mut bytes))
}

/// Load a record, or `None` when nothing compatible is stored.
pub fn load_record<R: Record>(store: &dyn RecordStore) -> Result<Option<R>> {
  match store.stored_size(R::PERSIST_KEY)? {
    Some(size) if size == R::SIZE => {}
    Some(size) => {
      warn!(
        record = R::NAME,
        size,
        expected = R::SIZE,
        "Discarding stored record with incompatible size"
      );
      return Ok(None);
    }
    None => {
      debug!(record = R::NAME, "No stored record");
      return Ok(None);
    }
  }

  let Some(bytes) = store.read_bytes(R::PERSIST_KEY, R::SIZE)? else {
    return Ok(None);
  };

  let record = decode_record::<R>(&bytes, R::VERSION);
  if record.is_none() {
    warn!(
      record = R::NAME,
      expected_version = R::VERSION,
      "Discarding stored record with incompatible version"
    );
  }
  Ok(record)
}

/// Persist a record in full.
pub fn save_record<R: Record>(store: &dyn RecordStore, record: &R) -> Result<()> {
  store.write_bytes(R::PERSIST_KEY, &encode_record(record))
}
