//! Little-endian layouts of the composite records.
//!
//! Timestamps are stored as `i64` unix seconds, `0` meaning "never".

use bytes::{Buf, BufMut};
use chrono::DateTime;

use super::record::Record;
use crate::data::{
  instant_from_unix, instant_to_unix, PhoneBatterySnapshot, Precipitation, TimeZoneSlot,
  TimeZoneTable, Transition, WeatherSnapshot, NUM_TZS, PERC_MAX_LEN, TZ_MAX_DATAPOINTS,
};
use crate::keys;

const TZ_SLOT_SIZE: usize = 1 + TZ_MAX_DATAPOINTS * (4 + 2);

impl Record for WeatherSnapshot {
  const PERSIST_KEY: u32 = keys::PERSIST_WEATHER;
  const VERSION: u16 = 3;
  // version, timestamp, icon, 3 temps, samples, sample count, series ts, sunrise, sunset, failed
  const SIZE: usize = 2 + 8 + 1 + 3 * 2 + PERC_MAX_LEN + 1 + 8 + 8 + 8 + 1;
  const NAME: &'static str = "weather";

  fn encode_body(&self, buf: &mut impl BufMut) {
    buf.put_i64_le(instant_to_unix(self.timestamp));
    buf.put_i8(self.icon);
    buf.put_i16_le(self.temp_cur);
    buf.put_i16_le(self.temp_low);
    buf.put_i16_le(self.temp_high);

    let samples = self.precipitation.samples();
    let mut padded = [0u8; PERC_MAX_LEN];
    padded[..samples.len()].copy_from_slice(samples);
    buf.put_slice(&padded);
    buf.put_u8(samples.len() as u8);
    buf.put_i64_le(instant_to_unix(self.precipitation.timestamp()));

    buf.put_i64_le(instant_to_unix(self.sunrise));
    buf.put_i64_le(instant_to_unix(self.sunset));
    buf.put_u8(u8::from(self.failed));
  }

  fn decode_body(buf: &mut impl Buf) -> Self {
    let timestamp = instant_from_unix(buf.get_i64_le());
    let icon = buf.get_i8();
    let temp_cur = buf.get_i16_le();
    let temp_low = buf.get_i16_le();
    let temp_high = buf.get_i16_le();

    let mut samples = [0u8; PERC_MAX_LEN];
    buf.copy_to_slice(&mut samples);
    let len = usize::from(buf.get_u8());
    let series_ts = instant_from_unix(buf.get_i64_le());

    let sunrise = instant_from_unix(buf.get_i64_le());
    let sunset = instant_from_unix(buf.get_i64_le());
    let failed = buf.get_u8() != 0;

    Self {
      timestamp,
      icon,
      temp_cur,
      temp_low,
      temp_high,
      precipitation: Precipitation::new(&samples, len, series_ts),
      sunrise,
      sunset,
      failed,
    }
  }
}

impl Record for PhoneBatterySnapshot {
  const PERSIST_KEY: u32 = keys::PERSIST_PHONEBAT;
  const VERSION: u16 = 1;
  const SIZE: usize = 2 + 1 + 8;
  const NAME: &'static str = "phone_battery";

  fn encode_body(&self, buf: &mut impl BufMut) {
    buf.put_u8(self.level);
    buf.put_i64_le(instant_to_unix(self.timestamp));
  }

  fn decode_body(buf: &mut impl Buf) -> Self {
    let level = buf.get_u8();
    let timestamp = instant_from_unix(buf.get_i64_le());
    Self { level, timestamp }
  }
}

impl Record for TimeZoneTable {
  const PERSIST_KEY: u32 = keys::PERSIST_TZ;
  const VERSION: u16 = 1;
  const SIZE: usize = 2 + NUM_TZS * TZ_SLOT_SIZE;
  const NAME: &'static str = "timezones";

  fn encode_body(&self, buf: &mut impl BufMut) {
    for slot in &self.slots {
      buf.put_u8(u8::from(slot.valid));

      // Parallel arrays, unused entries zeroed
      let transitions = slot.transitions();
      for i in 0..TZ_MAX_DATAPOINTS {
        let until = transitions.get(i).map(|t| t.until.timestamp()).unwrap_or(0);
        buf.put_i32_le(i32::try_from(until).unwrap_or(i32::MAX));
      }
      for i in 0..TZ_MAX_DATAPOINTS {
        buf.put_i16_le(transitions.get(i).map(|t| t.offset_minutes).unwrap_or(0));
      }
    }
  }

  fn decode_body(buf: &mut impl Buf) -> Self {
    let mut table = TimeZoneTable::default();
    for slot in table.slots.iter_mut() {
      let valid = buf.get_u8() != 0;
      let mut untils = [0i32; TZ_MAX_DATAPOINTS];
      for until in untils.iter_mut() {
        *until = buf.get_i32_le();
      }
      let mut offsets = [0i16; TZ_MAX_DATAPOINTS];
      for offset in offsets.iter_mut() {
        *offset = buf.get_i16_le();
      }

      if valid {
        let transitions = untils
          .iter()
          .zip(offsets)
          .filter(|(until, _)| **until != 0)
          .filter_map(|(until, offset_minutes)| {
            DateTime::from_timestamp(i64::from(*until), 0).map(|until| Transition {
              until,
              offset_minutes,
            })
          })
          .collect();
        *slot = TimeZoneSlot::new(transitions);
      }
    }
    table
  }
}
