//! Decoded key/value message batches exchanged with the companion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single typed value carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
  U8(u8),
  U16(u16),
  I8(i8),
  I16(i16),
  I32(i32),
  Bytes(Vec<u8>),
  Str(String),
}

impl Value {
  /// Widen any integer variant. Byte arrays and strings have no integer value.
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::U8(v) => Some(i64::from(*v)),
      Value::U16(v) => Some(i64::from(*v)),
      Value::I8(v) => Some(i64::from(*v)),
      Value::I16(v) => Some(i64::from(*v)),
      Value::I32(v) => Some(i64::from(*v)),
      Value::Bytes(_) | Value::Str(_) => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Bytes(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  /// Short type name for log output.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::U8(_) => "u8",
      Value::U16(_) => "u16",
      Value::I8(_) => "i8",
      Value::I16(_) => "i16",
      Value::I32(_) => "i32",
      Value::Bytes(_) => "bytes",
      Value::Str(_) => "str",
    }
  }
}

/// One delivered message: a mapping from integer keys to values.
///
/// Serialized as a JSON object whose keys are the decimal message keys, e.g.
/// `{"103": {"i8": 3}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
  entries: BTreeMap<u32, Value>,
}

impl Batch {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert, mostly for tests and outbound messages.
  pub fn with(mut self, key: u32, value: Value) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: u32, value: Value) {
    self.entries.insert(key, value);
  }

  pub fn get(&self, key: u32) -> Option<&Value> {
    self.entries.get(&key)
  }

  pub fn contains(&self, key: u32) -> bool {
    self.entries.contains_key(&key)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
    self.entries.keys().copied()
  }

  /// Integer value at `key`, if present and representable as `T`.
  pub fn get_int<T: TryFrom<i64>>(&self, key: u32) -> Option<T> {
    self
      .get(key)
      .and_then(Value::as_int)
      .and_then(|v| T::try_from(v).ok())
  }

  pub fn get_bytes(&self, key: u32) -> Option<&[u8]> {
    self.get(key).and_then(Value::as_bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_json_batch() {
    let batch: Batch =
      serde_json::from_str(r#"{"103": {"i8": -3}, "104": {"bytes": [1, 2]}, "40": {"str": "%H"}}"#)
        .unwrap();

    assert_eq!(batch.keys().count(), 3);
    assert_eq!(batch.get_int::<i8>(103), Some(-3));
    assert_eq!(batch.get_bytes(104), Some(&[1u8, 2][..]));
    assert_eq!(batch.get(40).and_then(Value::as_str), Some("%H"));
  }

  #[test]
  fn test_get_int_rejects_out_of_range() {
    let batch = Batch::new().with(10, Value::I32(300));
    assert_eq!(batch.get_int::<u8>(10), None);
    assert_eq!(batch.get_int::<u16>(10), Some(300));
  }

  #[test]
  fn test_get_int_rejects_non_integer() {
    let batch = Batch::new().with(10, Value::Str("30".to_string()));
    assert_eq!(batch.get_int::<u16>(10), None);
  }

  #[test]
  fn test_outbound_encoding() {
    let batch = Batch::new().with(107, Value::U8(1));
    assert_eq!(serde_json::to_string(&batch).unwrap(), r#"{"107":{"u8":1}}"#);
  }
}
