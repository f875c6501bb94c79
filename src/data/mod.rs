//! Cached datasets pushed by the companion.

mod phone_battery;
mod timezone;
mod weather;

pub use phone_battery::PhoneBatterySnapshot;
pub use timezone::{TimeZoneSlot, TimeZoneTable, Transition, TzPayload, NUM_TZS, TZ_MAX_DATAPOINTS};
pub use weather::{Precipitation, WeatherSnapshot, PERC_MAX_LEN};

use chrono::{DateTime, Duration, Utc};

/// Convert unix seconds to an instant. `0` is the "never" sentinel.
pub fn instant_from_unix(secs: i64) -> Option<DateTime<Utc>> {
  if secs == 0 {
    None
  } else {
    DateTime::from_timestamp(secs, 0)
  }
}

/// Inverse of [`instant_from_unix`].
pub fn instant_to_unix(instant: Option<DateTime<Utc>>) -> i64 {
  instant.map(|t| t.timestamp()).unwrap_or(0)
}

/// Whether data captured at `timestamp` is older than `minutes` at `now`.
/// Missing data is always expired; `minutes == 0` disables expiry.
pub(crate) fn expired(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>, minutes: u16) -> bool {
  match timestamp {
    None => true,
    Some(_) if minutes == 0 => false,
    Some(ts) => now - ts > Duration::minutes(i64::from(minutes)),
  }
}
