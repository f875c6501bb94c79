//! Durable record store for configuration fields and cached datasets.
//!
//! This module owns everything that touches stored bytes:
//! - A small key/value slot store (`RecordStore`) with SQLite and in-memory backends
//! - Versioned, fixed-size composite records (`Record`) with load/save helpers
//! - The little-endian layouts of the weather, phone battery and timezone records

mod layout;
mod record;
mod storage;

pub use record::{load_record, save_record};
pub use storage::{MemoryStore, RecordStore, ScalarWidth, SqliteStore};

#[cfg(test)]
pub(crate) use record::decode_record;
