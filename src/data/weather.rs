use chrono::{DateTime, Utc};

use super::expired;

/// Maximum number of precipitation samples kept per snapshot.
pub const PERC_MAX_LEN: usize = 30;

/// Precipitation probability series, one byte sample per hour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precipitation {
  samples: Vec<u8>,
  timestamp: Option<DateTime<Utc>>,
}

impl Precipitation {
  /// Build a series from the first `len` samples, capped at [`PERC_MAX_LEN`].
  pub fn new(samples: &[u8], len: usize, timestamp: Option<DateTime<Utc>>) -> Self {
    let len = len.min(samples.len()).min(PERC_MAX_LEN);
    Self {
      samples: samples[..len].to_vec(),
      timestamp,
    }
  }

  pub fn samples(&self) -> &[u8] {
    &self.samples
  }

  /// Start of the series
  pub fn timestamp(&self) -> Option<DateTime<Utc>> {
    self.timestamp
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }
}

/// Last weather report received from the companion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherSnapshot {
  /// When the report was captured; `None` means never fetched.
  pub timestamp: Option<DateTime<Utc>>,
  pub icon: i8,
  pub temp_cur: i16,
  pub temp_low: i16,
  pub temp_high: i16,
  pub precipitation: Precipitation,
  pub sunrise: Option<DateTime<Utc>>,
  pub sunset: Option<DateTime<Utc>>,
  /// The most recent fetch attempt failed.
  pub failed: bool,
}

impl WeatherSnapshot {
  pub fn never_fetched() -> Self {
    Self::default()
  }

  /// Whether the headline data is too old to display.
  pub fn is_expired(&self, now: DateTime<Utc>, expiration_minutes: u16) -> bool {
    expired(self.timestamp, now, expiration_minutes)
  }

  /// Sunrise/sunset times change slowly and use their own, longer expiry.
  pub fn is_sunrise_expired(&self, now: DateTime<Utc>, expiration_minutes: u16) -> bool {
    if self.sunrise.is_none() || self.sunset.is_none() {
      return true;
    }
    expired(self.timestamp, now, expiration_minutes)
  }
}
