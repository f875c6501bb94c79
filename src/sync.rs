//! Replacement of cached datasets from incoming message batches.
//!
//! A dataset is only ever replaced as a whole: the batch is checked for a
//! complete key set before anything is mutated.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::data::{
  instant_from_unix, PhoneBatterySnapshot, Precipitation, TimeZoneSlot, TimeZoneTable, TzPayload,
  WeatherSnapshot,
};
use crate::keys;
use crate::message::Batch;
use crate::store::{save_record, RecordStore};

/// What a batch did to one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetUpdate {
  /// The batch carried nothing for this dataset.
  Unchanged,
  /// The dataset was replaced with fresh data.
  Updated,
  /// The companion reported that fetching this dataset failed.
  FailureNotified,
}

const WEATHER_HEADLINE_KEYS: &[u32] = &[
  keys::MSG_WEATHER_ICON_CUR,
  keys::MSG_WEATHER_TEMP_CUR,
  keys::MSG_WEATHER_TEMP_LOW,
  keys::MSG_WEATHER_TEMP_HIGH,
];

const WEATHER_SERIES_KEYS: &[u32] = &[
  keys::MSG_WEATHER_PERC_DATA,
  keys::MSG_WEATHER_PERC_DATA_LEN,
  keys::MSG_WEATHER_PERC_DATA_TS,
];

/// Whether every key in `required` is present in `batch`.
pub fn require_all(batch: &Batch, required: &[u32]) -> bool {
  required.iter().all(|key| batch.contains(*key))
}

struct Headline {
  icon: i8,
  temp_cur: i16,
  temp_low: i16,
  temp_high: i16,
}

impl Headline {
  fn from_batch(batch: &Batch) -> Option<Self> {
    if !require_all(batch, WEATHER_HEADLINE_KEYS) {
      return None;
    }
    let headline = Self {
      icon: batch.get_int(keys::MSG_WEATHER_ICON_CUR)?,
      temp_cur: batch.get_int(keys::MSG_WEATHER_TEMP_CUR)?,
      temp_low: batch.get_int(keys::MSG_WEATHER_TEMP_LOW)?,
      temp_high: batch.get_int(keys::MSG_WEATHER_TEMP_HIGH)?,
    };
    Some(headline)
  }
}

fn precipitation_from_batch(batch: &Batch) -> Precipitation {
  if !require_all(batch, WEATHER_SERIES_KEYS) {
    return Precipitation::default();
  }

  let samples = batch.get_bytes(keys::MSG_WEATHER_PERC_DATA);
  let len = batch.get_int::<u8>(keys::MSG_WEATHER_PERC_DATA_LEN);
  let ts = batch.get_int::<i64>(keys::MSG_WEATHER_PERC_DATA_TS);

  match (samples, len, ts) {
    (Some(samples), Some(len), Some(ts)) => {
      Precipitation::new(samples, usize::from(len), instant_from_unix(ts))
    }
    _ => {
      warn!("Precipitation keys present but undecodable, clearing series");
      Precipitation::default()
    }
  }
}

fn optional_instant(batch: &Batch, key: u32) -> Option<DateTime<Utc>> {
  batch.get_int::<i64>(key).and_then(instant_from_unix)
}

/// Apply the weather keys of `batch` to `weather`.
///
/// A complete headline (icon and three temperatures) replaces the snapshot
/// in full. Without one, a failure notification only sets `failed`.
pub fn apply_weather(
  batch: &Batch,
  weather: &mut WeatherSnapshot,
  store: &dyn RecordStore,
  now: DateTime<Utc>,
) -> Result<DatasetUpdate> {
  if let Some(headline) = Headline::from_batch(batch) {
    let snapshot = WeatherSnapshot {
      timestamp: Some(now),
      icon: headline.icon,
      temp_cur: headline.temp_cur,
      temp_low: headline.temp_low,
      temp_high: headline.temp_high,
      precipitation: precipitation_from_batch(batch),
      sunrise: optional_instant(batch, keys::MSG_WEATHER_SUNRISE),
      sunset: optional_instant(batch, keys::MSG_WEATHER_SUNSET),
      failed: false,
    };
    save_record(store, &snapshot)?;
    info!(
      icon = snapshot.icon,
      temp = snapshot.temp_cur,
      samples = snapshot.precipitation.samples().len(),
      "Weather updated"
    );
    *weather = snapshot;
    return Ok(DatasetUpdate::Updated);
  }

  if require_all(batch, WEATHER_HEADLINE_KEYS) {
    warn!("Weather headline present but undecodable, ignoring");
  }

  if batch.contains(keys::MSG_WEATHER_FAILED) {
    weather.failed = true;
    save_record(store, &*weather)?;
    info!("Weather fetch failed on the companion");
    return Ok(DatasetUpdate::FailureNotified);
  }

  Ok(DatasetUpdate::Unchanged)
}

/// Apply the phone battery key of `batch` to `battery`.
pub fn apply_phone_battery(
  batch: &Batch,
  battery: &mut PhoneBatterySnapshot,
  store: &dyn RecordStore,
  now: DateTime<Utc>,
) -> Result<DatasetUpdate> {
  if !batch.contains(keys::MSG_PHONEBAT) {
    return Ok(DatasetUpdate::Unchanged);
  }
  let Some(level) = batch.get_int::<u8>(keys::MSG_PHONEBAT) else {
    warn!("Phone battery level undecodable, ignoring");
    return Ok(DatasetUpdate::Unchanged);
  };

  let snapshot = PhoneBatterySnapshot {
    level,
    timestamp: Some(now),
  };
  save_record(store, &snapshot)?;
  debug!(level, "Phone battery updated");
  *battery = snapshot;
  Ok(DatasetUpdate::Updated)
}

/// Apply the payload for timezone slot `slot` to `table`.
///
/// An empty payload means the companion could not resolve the zone.
pub fn apply_timezone(
  batch: &Batch,
  slot: usize,
  table: &mut TimeZoneTable,
  store: &dyn RecordStore,
) -> Result<DatasetUpdate> {
  let Some(&key) = keys::MSG_TZ.get(slot) else {
    return Ok(DatasetUpdate::Unchanged);
  };
  if !batch.contains(key) {
    return Ok(DatasetUpdate::Unchanged);
  }
  let Some(payload) = batch.get_bytes(key) else {
    warn!(slot, "Timezone payload is not a byte array, ignoring");
    return Ok(DatasetUpdate::Unchanged);
  };

  match TimeZoneSlot::from_payload(payload) {
    TzPayload::Schedule(schedule) => {
      let mut updated = table.clone();
      updated.slots[slot] = schedule;
      save_record(store, &updated)?;
      debug!(slot, transitions = updated.slots[slot].transitions().len(), "Timezone updated");
      *table = updated;
      Ok(DatasetUpdate::Updated)
    }
    TzPayload::Empty => {
      info!(slot, "Timezone lookup failed on the companion");
      Ok(DatasetUpdate::FailureNotified)
    }
    TzPayload::Malformed => {
      warn!(slot, len = payload.len(), "Malformed timezone payload, ignoring");
      Ok(DatasetUpdate::Unchanged)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::Value;
  use crate::store::{load_record, MemoryStore};
  use bytes::BufMut;
  use chrono::Duration;

  fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
  }

  fn headline_batch() -> Batch {
    Batch::new()
      .with(keys::MSG_WEATHER_ICON_CUR, Value::I8(2))
      .with(keys::MSG_WEATHER_TEMP_CUR, Value::I8(18))
      .with(keys::MSG_WEATHER_TEMP_LOW, Value::I8(11))
      .with(keys::MSG_WEATHER_TEMP_HIGH, Value::I16(24))
  }

  fn full_batch() -> Batch {
    headline_batch()
      .with(keys::MSG_WEATHER_PERC_DATA, Value::Bytes(vec![0, 10, 80, 40]))
      .with(keys::MSG_WEATHER_PERC_DATA_LEN, Value::U8(4))
      .with(keys::MSG_WEATHER_PERC_DATA_TS, Value::I32(1_699_999_000))
      .with(keys::MSG_WEATHER_SUNRISE, Value::I32(1_699_980_000))
      .with(keys::MSG_WEATHER_SUNSET, Value::I32(1_700_020_000))
  }

  #[test]
  fn test_require_all() {
    let batch = headline_batch();
    assert!(require_all(&batch, WEATHER_HEADLINE_KEYS));
    assert!(!require_all(&batch, WEATHER_SERIES_KEYS));
    assert!(require_all(&batch, &[]));
  }

  #[test]
  fn test_full_weather_update() {
    let store = MemoryStore::new();
    let mut weather = WeatherSnapshot {
      failed: true,
      ..Default::default()
    };

    let update = apply_weather(&full_batch(), &mut weather, &store, now()).unwrap();

    assert_eq!(update, DatasetUpdate::Updated);
    assert_eq!(weather.timestamp, Some(now()));
    assert_eq!(weather.temp_high, 24);
    assert_eq!(weather.precipitation.samples(), &[0, 10, 80, 40]);
    assert_eq!(weather.sunset, instant_from_unix(1_700_020_000));
    assert!(!weather.failed);

    let stored: WeatherSnapshot = load_record(&store).unwrap().unwrap();
    assert_eq!(stored, weather);
  }

  #[test]
  fn test_missing_series_key_clears_series() {
    let store = MemoryStore::new();
    let mut weather = WeatherSnapshot::never_fetched();
    apply_weather(&full_batch(), &mut weather, &store, now()).unwrap();
    assert!(!weather.precipitation.is_empty());

    let full = full_batch();
    for missing in WEATHER_SERIES_KEYS {
      let mut batch = Batch::new();
      for key in full.keys().filter(|k| k != missing) {
        batch.insert(key, full.get(key).unwrap().clone());
      }

      let later = now() + Duration::minutes(30);
      let update = apply_weather(&batch, &mut weather, &store, later).unwrap();

      assert_eq!(update, DatasetUpdate::Updated);
      assert!(weather.precipitation.is_empty());
      assert_eq!(weather.precipitation.timestamp(), None);
      assert_eq!(weather.timestamp, Some(later));

      // Restore the series for the next round
      apply_weather(&full, &mut weather, &store, now()).unwrap();
    }
  }

  #[test]
  fn test_missing_sun_times_are_cleared() {
    let store = MemoryStore::new();
    let mut weather = WeatherSnapshot::never_fetched();
    apply_weather(&full_batch(), &mut weather, &store, now()).unwrap();

    apply_weather(&headline_batch(), &mut weather, &store, now()).unwrap();
    assert_eq!(weather.sunrise, None);
    assert_eq!(weather.sunset, None);
  }

  #[test]
  fn test_incomplete_headline_changes_nothing() {
    let store = MemoryStore::new();
    let mut weather = WeatherSnapshot::never_fetched();

    let batch = Batch::new()
      .with(keys::MSG_WEATHER_ICON_CUR, Value::I8(2))
      .with(keys::MSG_WEATHER_TEMP_CUR, Value::I8(18))
      .with(keys::MSG_WEATHER_TEMP_LOW, Value::I8(11));
    let update = apply_weather(&batch, &mut weather, &store, now()).unwrap();

    assert_eq!(update, DatasetUpdate::Unchanged);
    assert_eq!(weather, WeatherSnapshot::never_fetched());
    assert!(!store.exists(keys::PERSIST_WEATHER).unwrap());
  }

  #[test]
  fn test_failure_only_sets_flag() {
    let store = MemoryStore::new();
    let mut weather = WeatherSnapshot::never_fetched();
    apply_weather(&full_batch(), &mut weather, &store, now()).unwrap();
    let before = weather.clone();

    let batch = Batch::new().with(keys::MSG_WEATHER_FAILED, Value::U8(1));
    let later = now() + Duration::minutes(45);
    let update = apply_weather(&batch, &mut weather, &store, later).unwrap();

    assert_eq!(update, DatasetUpdate::FailureNotified);
    assert!(weather.failed);
    assert_eq!(weather.timestamp, before.timestamp);
    assert_eq!(weather.icon, before.icon);
    assert_eq!(weather.temp_cur, before.temp_cur);
    assert_eq!(weather.precipitation, before.precipitation);

    let stored: WeatherSnapshot = load_record(&store).unwrap().unwrap();
    assert!(stored.failed);
  }

  #[test]
  fn test_headline_wins_over_failure_key() {
    let store = MemoryStore::new();
    let mut weather = WeatherSnapshot::never_fetched();

    let batch = headline_batch().with(keys::MSG_WEATHER_FAILED, Value::U8(1));
    let update = apply_weather(&batch, &mut weather, &store, now()).unwrap();

    assert_eq!(update, DatasetUpdate::Updated);
    assert!(!weather.failed);
  }

  #[test]
  fn test_phone_battery_update() {
    let store = MemoryStore::new();
    let mut battery = PhoneBatterySnapshot::never_fetched();

    let update = apply_phone_battery(&Batch::new(), &mut battery, &store, now()).unwrap();
    assert_eq!(update, DatasetUpdate::Unchanged);

    let batch = Batch::new().with(keys::MSG_PHONEBAT, Value::U8(73));
    let update = apply_phone_battery(&batch, &mut battery, &store, now()).unwrap();
    assert_eq!(update, DatasetUpdate::Updated);
    assert_eq!(battery.level, 73);
    assert_eq!(battery.timestamp, Some(now()));

    let stored: PhoneBatterySnapshot = load_record(&store).unwrap().unwrap();
    assert_eq!(stored, battery);
  }

  #[test]
  fn test_timezone_updates() {
    let store = MemoryStore::new();
    let mut table = TimeZoneTable::default();

    let mut payload = Vec::new();
    payload.put_i32_le(1_710_000_000);
    payload.put_i16_le(-300);
    let batch = Batch::new().with(keys::MSG_TZ[2], Value::Bytes(payload));

    let update = apply_timezone(&batch, 2, &mut table, &store).unwrap();
    assert_eq!(update, DatasetUpdate::Updated);
    assert!(table.slots[2].valid);
    assert!(!table.slots[0].valid);
    assert_eq!(apply_timezone(&batch, 0, &mut table, &store).unwrap(), DatasetUpdate::Unchanged);

    let stored: TimeZoneTable = load_record(&store).unwrap().unwrap();
    assert_eq!(stored, table);

    let empty = Batch::new().with(keys::MSG_TZ[2], Value::Bytes(Vec::new()));
    let update = apply_timezone(&empty, 2, &mut table, &store).unwrap();
    assert_eq!(update, DatasetUpdate::FailureNotified);
    assert!(table.slots[2].valid);

    let malformed = Batch::new().with(keys::MSG_TZ[2], Value::Bytes(vec![1, 2, 3]));
    let update = apply_timezone(&malformed, 2, &mut table, &store).unwrap();
    assert_eq!(update, DatasetUpdate::Unchanged);
  }
}
