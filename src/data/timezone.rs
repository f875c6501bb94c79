use bytes::Buf;
use chrono::{DateTime, Utc};

/// Number of timezone slots shown by the watch face.
pub const NUM_TZS: usize = 3;

/// Maximum number of offset transitions kept per slot.
pub const TZ_MAX_DATAPOINTS: usize = 3;

/// Encoded size of one transition in a timezone payload (`i32` + `i16`).
const PAYLOAD_ENTRY_SIZE: usize = 6;

/// An offset that is in force until `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
  pub until: DateTime<Utc>,
  pub offset_minutes: i16,
}

/// Offset schedule for one configured timezone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeZoneSlot {
  pub valid: bool,
  transitions: Vec<Transition>,
}

/// Result of decoding a timezone payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TzPayload {
  Schedule(TimeZoneSlot),
  /// The companion could not resolve the zone.
  Empty,
  Malformed,
}

impl TimeZoneSlot {
  /// A valid slot holding at most [`TZ_MAX_DATAPOINTS`] transitions.
  pub fn new(transitions: Vec<Transition>) -> Self {
    let mut transitions = transitions;
    transitions.truncate(TZ_MAX_DATAPOINTS);
    Self {
      valid: true,
      transitions,
    }
  }

  pub fn transitions(&self) -> &[Transition] {
    &self.transitions
  }

  /// Decode a payload of little-endian `(i32 until, i16 offset)` pairs.
  pub fn from_payload(mut payload: &[u8]) -> TzPayload {
    if payload.is_empty() {
      return TzPayload::Empty;
    }
    if payload.len() % PAYLOAD_ENTRY_SIZE != 0 {
      return TzPayload::Malformed;
    }

    let mut transitions = Vec::new();
    while payload.remaining() >= PAYLOAD_ENTRY_SIZE && transitions.len() < TZ_MAX_DATAPOINTS {
      let until = payload.get_i32_le();
      let offset_minutes = payload.get_i16_le();
      match DateTime::from_timestamp(i64::from(until), 0) {
        Some(until) if until.timestamp() != 0 => transitions.push(Transition {
          until,
          offset_minutes,
        }),
        _ => return TzPayload::Malformed,
      }
    }

    TzPayload::Schedule(Self::new(transitions))
  }

  /// UTC offset in force at `at`, or `None` once the schedule is exhausted.
  pub fn offset_at(&self, at: DateTime<Utc>) -> Option<i16> {
    if !self.valid {
      return None;
    }
    self
      .transitions
      .iter()
      .find(|t| at < t.until)
      .map(|t| t.offset_minutes)
  }

  /// The instant after which this slot has no offset information left.
  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    if !self.valid {
      return None;
    }
    self.transitions.iter().map(|t| t.until).max()
  }
}

/// Offset schedules for all timezone slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeZoneTable {
  pub slots: [TimeZoneSlot; NUM_TZS],
}
