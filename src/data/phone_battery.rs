use chrono::{DateTime, Utc};

use super::expired;

/// Battery level of the paired phone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhoneBatterySnapshot {
  /// Charge in percent.
  pub level: u8,
  /// `None` means never fetched.
  pub timestamp: Option<DateTime<Utc>>,
}

impl PhoneBatterySnapshot {
  pub fn never_fetched() -> Self {
    Self::default()
  }

  pub fn is_expired(&self, now: DateTime<Utc>, expiration_minutes: u16) -> bool {
    expired(self.timestamp, now, expiration_minutes)
  }
}
