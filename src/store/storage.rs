//! Slot store trait and its SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Width of a stored scalar. Values that do not fit are reported as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarWidth {
  U8,
  U16,
}

impl ScalarWidth {
  fn fits(self, value: i64) -> bool {
    match self {
      ScalarWidth::U8 => u8::try_from(value).is_ok(),
      ScalarWidth::U16 => u16::try_from(value).is_ok(),
    }
  }
}

/// Trait for durable slot storage.
///
/// Every slot is identified by an integer key and holds either a scalar or a
/// byte block. Writes must be durable before they return.
pub trait RecordStore: Send + Sync {
  /// Whether anything is stored under `key`.
  fn exists(&self, key: u32) -> Result<bool>;

  /// Read a scalar, or `None` when absent, not a scalar, or wider than `width`.
  fn read_scalar(&self, key: u32, width: ScalarWidth) -> Result<Option<u32>>;

  fn write_scalar(&self, key: u32, value: u32) -> Result<()>;

  /// Size of the byte block stored under `key`.
  fn stored_size(&self, key: u32) -> Result<Option<usize>>;

  /// Read at most `max_len` bytes of the block stored under `key`.
  fn read_bytes(&self, key: u32, max_len: usize) -> Result<Option<Vec<u8>>>;

  fn write_bytes(&self, key: u32, data: &[u8]) -> Result<()>;

  /// Read a string slot, truncated to `max_len` bytes.
  fn read_string(&self, key: u32, max_len: usize) -> Result<Option<String>> {
    Ok(
      self
        .read_bytes(key, max_len)?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    )
  }

  fn write_string(&self, key: u32, value: &str) -> Result<()> {
    self.write_bytes(key, value.as_bytes())
  }
}

#[derive(Debug, Clone)]
enum Slot {
  Scalar(i64),
  Bytes(Vec<u8>),
}

/// Store that keeps slots in memory only.
/// Used by tests and for runs without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
  slots: Mutex<BTreeMap<u32, Slot>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_slots<T>(&self, f: impl FnOnce(&mut BTreeMap<u32, Slot>) -> T) -> Result<T> {
    let mut slots = self
      .slots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut slots))
  }
}

impl RecordStore for MemoryStore {
  fn exists(&self, key: u32) -> Result<bool> {
    self.with_slots(|slots| slots.contains_key(&key))
  }

  fn read_scalar(&self, key: u32, width: ScalarWidth) -> Result<Option<u32>> {
    self.with_slots(|slots| match slots.get(&key) {
      Some(Slot::Scalar(v)) if width.fits(*v) => u32::try_from(*v).ok(),
      _ => None,
    })
  }

  fn write_scalar(&self, key: u32, value: u32) -> Result<()> {
    self.with_slots(|slots| {
      slots.insert(key, Slot::Scalar(i64::from(value)));
    })
  }

  fn stored_size(&self, key: u32) -> Result<Option<usize>> {
    self.with_slots(|slots| match slots.get(&key) {
      Some(Slot::Bytes(b)) => Some(b.len()),
      _ => None,
    })
  }

  fn read_bytes(&self, key: u32, max_len: usize) -> Result<Option<Vec<u8>>> {
    self.with_slots(|slots| match slots.get(&key) {
      Some(Slot::Bytes(b)) => Some(b[..b.len().min(max_len)].to_vec()),
      _ => None,
    })
  }

  fn write_bytes(&self, key: u32, data: &[u8]) -> Result<()> {
    self.with_slots(|slots| {
      slots.insert(key, Slot::Bytes(data.to_vec()));
    })
  }
}

/// SQLite-based slot store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("facesync").join("state.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(SLOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for the slot table. Exactly one of `int_value` and `data` is set.
const SLOT_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;

CREATE TABLE IF NOT EXISTS slots (
    key INTEGER PRIMARY KEY,
    int_value INTEGER,
    data BLOB,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl RecordStore for SqliteStore {
  fn exists(&self, key: u32) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row("SELECT 1 FROM slots WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up slot {}: {}", key, e))?;

    Ok(found.is_some())
  }

  fn read_scalar(&self, key: u32, width: ScalarWidth) -> Result<Option<u32>> {
    let conn = self.lock()?;

    let value: Option<Option<i64>> = conn
      .query_row(
        "SELECT int_value FROM slots WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read scalar {}: {}", key, e))?;

    Ok(
      value
        .flatten()
        .filter(|v| width.fits(*v))
        .and_then(|v| u32::try_from(v).ok()),
    )
  }

  fn write_scalar(&self, key: u32, value: u32) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO slots (key, int_value, data, written_at)
         VALUES (?, ?, NULL, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write scalar {}: {}", key, e))?;

    Ok(())
  }

  fn stored_size(&self, key: u32) -> Result<Option<usize>> {
    let conn = self.lock()?;

    let size: Option<Option<i64>> = conn
      .query_row(
        "SELECT length(data) FROM slots WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read size of slot {}: {}", key, e))?;

    Ok(size.flatten().and_then(|s| usize::try_from(s).ok()))
  }

  fn read_bytes(&self, key: u32, max_len: usize) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;

    let data: Option<Option<Vec<u8>>> = conn
      .query_row("SELECT data FROM slots WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read slot {}: {}", key, e))?;

    Ok(data.flatten().map(|mut bytes| {
      bytes.truncate(max_len);
      bytes
    }))
  }

  fn write_bytes(&self, key: u32, data: &[u8]) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO slots (key, int_value, data, written_at)
         VALUES (?, NULL, ?, datetime('now'))",
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to write slot {}: {}", key, e))?;

    Ok(())
  }
}
