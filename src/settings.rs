//! Configuration fields and their synchronization with the companion.

use color_eyre::Result;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::keys;
use crate::message::{Batch, Value};
use crate::store::{RecordStore, ScalarWidth};

/// Maximum stored length of a string field, in bytes.
pub const STRING_MAX_LEN: usize = 50;

/// Compiled-in default, which also fixes the semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
  U8(u8),
  U16(u16),
  Str(&'static str),
}

/// Description of one configuration field.
#[derive(Debug, Clone)]
pub struct FieldDef {
  pub key: u32,
  pub name: &'static str,
  pub default: FieldDefault,
}

const fn u8_field(key: u32, name: &'static str, default: u8) -> FieldDef {
  FieldDef {
    key,
    name,
    default: FieldDefault::U8(default),
  }
}

const fn u16_field(key: u32, name: &'static str, default: u16) -> FieldDef {
  FieldDef {
    key,
    name,
    default: FieldDefault::U16(default),
  }
}

const fn str_field(key: u32, name: &'static str, default: &'static str) -> FieldDef {
  FieldDef {
    key,
    name,
    default: FieldDefault::Str(default),
  }
}

// GColor8 argb values used as color defaults
const BLACK: u8 = 0xC0;
const WHITE: u8 = 0xFF;
const RED: u8 = 0xF0;
const ORANGE: u8 = 0xF4;
const YELLOW: u8 = 0xFC;
const LIGHT_GRAY: u8 = 0xEA;
const BLUE: u8 = 0xC7;

/// All configuration fields known to this version.
pub const FIELDS: &[FieldDef] = &[
  u8_field(1, "vibrate_disconnect", 1),
  u8_field(2, "vibrate_reconnect", 1),
  u8_field(3, "message_disconnect", 1),
  u8_field(4, "message_reconnect", 1),
  u16_field(keys::CONFIG_WEATHER_REFRESH, "weather_refresh", 30),
  u16_field(keys::CONFIG_WEATHER_EXPIRATION, "weather_expiration", 180),
  u16_field(keys::CONFIG_WEATHER_REFRESH_FAILED, "weather_refresh_failed", 5),
  u8_field(13, "color_topbar_bg", LIGHT_GRAY),
  u8_field(14, "color_info_below", WHITE),
  u8_field(15, "color_progress_bar", BLUE),
  u8_field(16, "color_progress_bar2", WHITE),
  u8_field(17, "color_time", WHITE),
  u8_field(18, "color_perc", BLUE),
  u8_field(19, "color_widget_1", WHITE),
  u8_field(20, "color_widget_2", WHITE),
  u8_field(21, "color_widget_3", WHITE),
  u8_field(22, "color_widget_4", BLACK),
  u8_field(23, "color_widget_5", BLACK),
  u8_field(24, "color_widget_6", BLACK),
  u8_field(25, "color_background", BLACK),
  u8_field(26, "color_day", YELLOW),
  u8_field(27, "color_night", BLUE),
  u8_field(28, "color_bat_30", YELLOW),
  u8_field(29, "color_bat_20", ORANGE),
  u8_field(30, "color_bat_10", RED),
  u8_field(31, "lowbat_col", 0),
  u8_field(33, "widget_1", 1),
  u8_field(34, "widget_2", 2),
  u8_field(35, "widget_3", 3),
  u8_field(36, "widget_4", 4),
  u8_field(37, "widget_5", 5),
  u8_field(38, "widget_6", 6),
  u8_field(39, "progress", 1),
  str_field(40, "time_format", "%H:%M"),
  str_field(41, "info_below", "%A, %m/%d"),
  u8_field(42, "update_second", 0),
  u8_field(46, "show_daynight", 1),
  u16_field(47, "step_goal", 10000),
  str_field(keys::CONFIG_TZ_0_FORMAT, "tz_0_format", ""),
  str_field(keys::CONFIG_TZ_1_FORMAT, "tz_1_format", ""),
  str_field(keys::CONFIG_TZ_2_FORMAT, "tz_2_format", ""),
  u8_field(54, "hourly_vibrate", 0),
  str_field(55, "sunrise_format", "%H:%M"),
  u8_field(56, "widget_7", 0),
  u8_field(57, "widget_8", 0),
  u8_field(58, "widget_9", 0),
  u8_field(59, "widget_10", 0),
  u8_field(60, "widget_11", 0),
  u8_field(61, "widget_12", 0),
  u16_field(62, "timeout_2nd_widgets", 5),
  u8_field(63, "2nd_widgets", 0),
  u16_field(keys::CONFIG_WEATHER_SUNRISE_EXPIRATION, "weather_sunrise_expiration", 2880),
  u8_field(65, "color_quiet_mode", WHITE),
  u8_field(66, "quiet_col", 0),
  u16_field(keys::CONFIG_PHONE_BATTERY_EXPIRATION, "phone_battery_expiration", 120),
  u16_field(keys::CONFIG_PHONE_BATTERY_REFRESH, "phone_battery_refresh", 30),
  u8_field(keys::CONFIG_UPDATE_PHONEBAT_ON_SHAKE, "update_phonebat_on_shake", 0),
];

/// Current value of a configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
  U8(u8),
  U16(u16),
  Str(String),
}

impl FieldDef {
  fn default_value(&self) -> FieldValue {
    match self.default {
      FieldDefault::U8(v) => FieldValue::U8(v),
      FieldDefault::U16(v) => FieldValue::U16(v),
      FieldDefault::Str(s) => FieldValue::Str(s.to_string()),
    }
  }

  /// Decode an incoming value according to this field's type.
  ///
  /// Any integer that fits the field width is accepted; strings are truncated
  /// to [`STRING_MAX_LEN`] bytes.
  fn decode(&self, value: &Value) -> Option<FieldValue> {
    match self.default {
      FieldDefault::U8(_) => value
        .as_int()
        .and_then(|v| u8::try_from(v).ok())
        .map(FieldValue::U8),
      FieldDefault::U16(_) => value
        .as_int()
        .and_then(|v| u16::try_from(v).ok())
        .map(FieldValue::U16),
      FieldDefault::Str(_) => value
        .as_str()
        .map(|s| FieldValue::Str(truncate_str(s, STRING_MAX_LEN).to_string())),
    }
  }
}

/// Cut `s` to at most `max_len` bytes without splitting a character.
fn truncate_str(s: &str, max_len: usize) -> &str {
  if s.len() <= max_len {
    return s;
  }
  let mut end = max_len;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  &s[..end]
}

/// Keys of the fields changed by one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
  changed: Vec<u32>,
}

impl SyncOutcome {
  /// Whether any field changed, i.e. a redraw is needed.
  pub fn is_dirty(&self) -> bool {
    !self.changed.is_empty()
  }

  pub fn changed_keys(&self) -> &[u32] {
    &self.changed
  }

  pub fn changed(&self, key: u32) -> bool {
    self.changed.contains(&key)
  }

  pub fn changed_any(&self, keys: &[u32]) -> bool {
    keys.iter().any(|k| self.changed(*k))
  }
}

/// In-memory values of all configuration fields.
#[derive(Debug, Clone)]
pub struct Settings {
  values: BTreeMap<u32, FieldValue>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      values: FIELDS.iter().map(|f| (f.key, f.default_value())).collect(),
    }
  }
}

impl Settings {
  /// Load every field from storage, writing the default for fields that have
  /// never been stored so storage is always populated afterwards.
  pub fn load(store: &dyn RecordStore) -> Result<Self> {
    let mut settings = Self::default();

    for field in FIELDS {
      let stored = if store.exists(field.key)? {
        read_field(store, field)?
      } else {
        None
      };

      match stored {
        Some(value) => {
          settings.values.insert(field.key, value);
        }
        None => {
          debug!(field = field.name, "Writing default configuration value");
          write_field(store, field.key, &field.default_value())?;
        }
      }
    }

    Ok(settings)
  }

  /// Apply every known configuration key in `batch`, persisting the fields
  /// whose value changed. Unknown keys are ignored.
  pub fn apply_batch(&mut self, batch: &Batch, store: &dyn RecordStore) -> Result<SyncOutcome> {
    let mut outcome = SyncOutcome::default();

    for field in FIELDS {
      let Some(raw) = batch.get(field.key) else {
        continue;
      };
      let Some(value) = field.decode(raw) else {
        warn!(
          field = field.name,
          got = raw.type_name(),
          "Ignoring configuration value of unexpected type or range"
        );
        continue;
      };

      if self.values.get(&field.key) == Some(&value) {
        continue;
      }

      debug!(field = field.name, ?value, "Configuration changed");
      write_field(store, field.key, &value)?;
      self.values.insert(field.key, value);
      outcome.changed.push(field.key);
    }

    Ok(outcome)
  }

  pub fn u8(&self, key: u32) -> u8 {
    match self.values.get(&key) {
      Some(FieldValue::U8(v)) => *v,
      _ => 0,
    }
  }

  pub fn u16(&self, key: u32) -> u16 {
    match self.values.get(&key) {
      Some(FieldValue::U16(v)) => *v,
      _ => 0,
    }
  }

  pub fn str(&self, key: u32) -> &str {
    match self.values.get(&key) {
      Some(FieldValue::Str(s)) => s,
      _ => "",
    }
  }

  /// Minutes between weather fetches; `0` disables weather.
  pub fn weather_refresh(&self) -> u16 {
    self.u16(keys::CONFIG_WEATHER_REFRESH)
  }

  /// Minutes until a retry after a failed weather fetch.
  pub fn weather_refresh_failed(&self) -> u16 {
    self.u16(keys::CONFIG_WEATHER_REFRESH_FAILED)
  }

  pub fn weather_expiration(&self) -> u16 {
    self.u16(keys::CONFIG_WEATHER_EXPIRATION)
  }

  pub fn weather_sunrise_expiration(&self) -> u16 {
    self.u16(keys::CONFIG_WEATHER_SUNRISE_EXPIRATION)
  }

  /// Minutes between phone battery fetches; `0` disables them.
  pub fn phone_battery_refresh(&self) -> u16 {
    self.u16(keys::CONFIG_PHONE_BATTERY_REFRESH)
  }

  pub fn phone_battery_expiration(&self) -> u16 {
    self.u16(keys::CONFIG_PHONE_BATTERY_EXPIRATION)
  }

  pub fn update_phone_battery_on_shake(&self) -> bool {
    self.u8(keys::CONFIG_UPDATE_PHONEBAT_ON_SHAKE) != 0
  }

  /// Display format of timezone slot `slot`; empty when the slot is unused.
  pub fn tz_format(&self, slot: usize) -> &str {
    keys::CONFIG_TZ_FORMAT
      .get(slot)
      .map(|key| self.str(*key))
      .unwrap_or("")
  }
}

fn read_field(store: &dyn RecordStore, field: &FieldDef) -> Result<Option<FieldValue>> {
  let value = match field.default {
    FieldDefault::U8(_) => store
      .read_scalar(field.key, ScalarWidth::U8)?
      .and_then(|v| u8::try_from(v).ok())
      .map(FieldValue::U8),
    FieldDefault::U16(_) => store
      .read_scalar(field.key, ScalarWidth::U16)?
      .and_then(|v| u16::try_from(v).ok())
      .map(FieldValue::U16),
    FieldDefault::Str(_) => store
      .read_string(field.key, STRING_MAX_LEN)?
      .map(FieldValue::Str),
  };

  if value.is_none() {
    warn!(field = field.name, "Stored configuration value unreadable, restoring default");
  }
  Ok(value)
}

fn write_field(store: &dyn RecordStore, key: u32, value: &FieldValue) -> Result<()> {
  match value {
    FieldValue::U8(v) => store.write_scalar(key, u32::from(*v)),
    FieldValue::U16(v) => store.write_scalar(key, u32::from(*v)),
    FieldValue::Str(s) => store.write_string(key, s),
  }
}
