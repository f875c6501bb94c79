//! Synchronization engine: owns every configuration field, cached dataset and
//! refresh timer, and turns incoming batches and timer deadlines into fetch
//! requests and redraw signals.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::fmt;
use tracing::{debug, info, warn};

use crate::data::{PhoneBatterySnapshot, TimeZoneSlot, TimeZoneTable, WeatherSnapshot, NUM_TZS};
use crate::keys;
use crate::message::Batch;
use crate::scheduler::{minutes, Freshness, RefreshScheduler};
use crate::settings::{Settings, SyncOutcome};
use crate::store::{load_record, save_record, RecordStore};
use crate::sync::{self, DatasetUpdate};

/// Retry delay for timezone lookups that failed or got no answer.
const TZ_RETRY_MINUTES: u16 = 60;

/// A cached dataset the companion can be asked to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
  Weather,
  PhoneBattery,
  TimeZone(usize),
}

impl Dataset {
  /// Every dataset, in evaluation order.
  pub fn all() -> impl Iterator<Item = Dataset> {
    [Dataset::Weather, Dataset::PhoneBattery]
      .into_iter()
      .chain((0..NUM_TZS).map(Dataset::TimeZone))
  }

  /// Message key that asks the companion to fetch this dataset.
  pub fn fetch_key(self) -> u32 {
    match self {
      Dataset::Weather => keys::MSG_FETCH_WEATHER,
      Dataset::PhoneBattery => keys::MSG_FETCH_PHONEBAT,
      Dataset::TimeZone(slot) => keys::MSG_FETCH_TZ[slot],
    }
  }
}

impl fmt::Display for Dataset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dataset::Weather => write!(f, "weather"),
      Dataset::PhoneBattery => write!(f, "phone_battery"),
      Dataset::TimeZone(slot) => write!(f, "timezone_{}", slot),
    }
  }
}

/// Synchronization state of the watch face.
pub struct Engine<S: RecordStore> {
  store: S,
  settings: Settings,
  weather: WeatherSnapshot,
  phone_battery: PhoneBatterySnapshot,
  timezones: TimeZoneTable,
  weather_refresh: RefreshScheduler,
  phone_battery_refresh: RefreshScheduler,
  tz_refresh: [RefreshScheduler; NUM_TZS],
  client_ready: bool,
  dirty: bool,
}

impl<S: RecordStore> Engine<S> {
  /// Load all configuration and cached data from `store`.
  ///
  /// Missing configuration is populated with defaults; cached datasets that
  /// are missing or stored in an incompatible layout start out as never
  /// fetched.
  pub fn open(store: S) -> Result<Self> {
    let settings = Settings::load(&store)?;
    let weather =
      load_record::<WeatherSnapshot>(&store)?.unwrap_or_else(WeatherSnapshot::never_fetched);
    let phone_battery = load_record::<PhoneBatterySnapshot>(&store)?
      .unwrap_or_else(PhoneBatterySnapshot::never_fetched);
    let timezones = load_record::<TimeZoneTable>(&store)?.unwrap_or_default();

    info!(
      weather = weather.timestamp.is_some(),
      phone_battery = phone_battery.timestamp.is_some(),
      "Loaded cached state"
    );

    let weather_refresh =
      RefreshScheduler::new(Dataset::Weather.to_string(), weather.timestamp.is_some());
    let phone_battery_refresh = RefreshScheduler::new(
      Dataset::PhoneBattery.to_string(),
      phone_battery.timestamp.is_some(),
    );
    let tz_refresh = std::array::from_fn(|slot| {
      RefreshScheduler::new(Dataset::TimeZone(slot).to_string(), timezones.slots[slot].valid)
    });

    Ok(Self {
      store,
      settings,
      weather,
      phone_battery,
      timezones,
      weather_refresh,
      phone_battery_refresh,
      tz_refresh,
      client_ready: false,
      dirty: true,
    })
  }

  /// Evaluate every dataset, as on startup or resume.
  pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Dataset> {
    let mut requests = Vec::new();
    for dataset in Dataset::all() {
      self.evaluate(dataset, now, &mut requests);
    }
    requests
  }

  /// Apply one incoming batch. Returns the datasets that must be fetched.
  ///
  /// Configuration fields are applied first, then each dataset's update
  /// decision is made before that dataset is evaluated, so a response is
  /// never answered with a repeat of its own request.
  pub fn handle_batch(&mut self, batch: &Batch, now: DateTime<Utc>) -> Result<Vec<Dataset>> {
    debug!(keys = ?batch.keys().collect::<Vec<_>>(), "Received message");

    let outcome = self.settings.apply_batch(batch, &self.store)?;
    if outcome.is_dirty() {
      debug!(changed = ?outcome.changed_keys(), "Configuration changed");
      self.dirty = true;
    }
    self.invalidate_reconfigured_timezones(&outcome)?;

    let client_ready = batch.contains(keys::MSG_CLIENT_READY);
    if client_ready {
      info!("Companion ready");
      self.client_ready = true;
    }

    let mut requests = Vec::new();
    for dataset in Dataset::all() {
      match self.apply_dataset(dataset, batch, now)? {
        DatasetUpdate::Updated => {
          self.dirty = true;
          self.scheduler_mut(dataset).on_updated();
          if matches!(self.freshness(dataset, now), Freshness::Stale { .. }) {
            // Asking again would only fetch the same outdated data
            warn!(%dataset, "Received data is already stale, retrying later");
            self.on_failed(dataset, now, &mut requests);
          } else {
            self.evaluate(dataset, now, &mut requests);
          }
        }
        DatasetUpdate::FailureNotified => {
          if dataset == Dataset::Weather {
            self.dirty = true;
          }
          self.on_failed(dataset, now, &mut requests);
        }
        DatasetUpdate::Unchanged => {
          if client_ready || outcome.changed_any(&self.policy_keys(dataset)) {
            self.evaluate(dataset, now, &mut requests);
          }
        }
      }
    }

    Ok(requests)
  }

  /// Evaluate every dataset whose timer is due at `now`.
  pub fn fire_due(&mut self, now: DateTime<Utc>) -> Vec<Dataset> {
    let mut requests = Vec::new();
    for dataset in Dataset::all() {
      if self.scheduler_mut(dataset).take_due(now) {
        debug!(%dataset, "Refresh timer fired");
        self.evaluate(dataset, now, &mut requests);
      }
    }
    requests
  }

  /// The watch was shaken or tapped. Forces a phone battery fetch when the
  /// user asked for it.
  pub fn handle_shake(&mut self, now: DateTime<Utc>) -> Vec<Dataset> {
    let interval = self.settings.phone_battery_refresh();
    if !self.settings.update_phone_battery_on_shake() || interval == 0 {
      return Vec::new();
    }

    let forced = Freshness::Stale {
      retry_after: minutes(interval),
    };
    if self.phone_battery_refresh.evaluate(forced, now) {
      vec![Dataset::PhoneBattery]
    } else {
      Vec::new()
    }
  }

  /// Earliest armed timer deadline across all datasets.
  pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
    self
      .schedulers()
      .filter_map(|s| s.timer().fire_at())
      .min()
  }

  /// Return and clear the redraw flag.
  pub fn take_dirty(&mut self) -> bool {
    std::mem::take(&mut self.dirty)
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn weather(&self) -> &WeatherSnapshot {
    &self.weather
  }

  pub fn phone_battery(&self) -> &PhoneBatterySnapshot {
    &self.phone_battery
  }

  pub fn timezones(&self) -> &TimeZoneTable {
    &self.timezones
  }

  pub fn client_ready(&self) -> bool {
    self.client_ready
  }

  pub fn scheduler(&self, dataset: Dataset) -> &RefreshScheduler {
    match dataset {
      Dataset::Weather => &self.weather_refresh,
      Dataset::PhoneBattery => &self.phone_battery_refresh,
      Dataset::TimeZone(slot) => &self.tz_refresh[slot],
    }
  }

  fn scheduler_mut(&mut self, dataset: Dataset) -> &mut RefreshScheduler {
    match dataset {
      Dataset::Weather => &mut self.weather_refresh,
      Dataset::PhoneBattery => &mut self.phone_battery_refresh,
      Dataset::TimeZone(slot) => &mut self.tz_refresh[slot],
    }
  }

  fn schedulers(&self) -> impl Iterator<Item = &RefreshScheduler> {
    [&self.weather_refresh, &self.phone_battery_refresh]
      .into_iter()
      .chain(self.tz_refresh.iter())
  }

  fn apply_dataset(
    &mut self,
    dataset: Dataset,
    batch: &Batch,
    now: DateTime<Utc>,
  ) -> Result<DatasetUpdate> {
    match dataset {
      Dataset::Weather => sync::apply_weather(batch, &mut self.weather, &self.store, now),
      Dataset::PhoneBattery => {
        sync::apply_phone_battery(batch, &mut self.phone_battery, &self.store, now)
      }
      Dataset::TimeZone(slot) => sync::apply_timezone(batch, slot, &mut self.timezones, &self.store),
    }
  }

  /// Configuration keys whose change requires re-evaluating `dataset`.
  fn policy_keys(&self, dataset: Dataset) -> Vec<u32> {
    match dataset {
      Dataset::Weather => vec![keys::CONFIG_WEATHER_REFRESH],
      Dataset::PhoneBattery => vec![keys::CONFIG_PHONE_BATTERY_REFRESH],
      Dataset::TimeZone(slot) => vec![keys::CONFIG_TZ_FORMAT[slot]],
    }
  }

  fn freshness(&self, dataset: Dataset, now: DateTime<Utc>) -> Freshness {
    match dataset {
      Dataset::Weather => {
        Freshness::from_interval(self.weather.timestamp, self.settings.weather_refresh(), now)
      }
      Dataset::PhoneBattery => Freshness::from_interval(
        self.phone_battery.timestamp,
        self.settings.phone_battery_refresh(),
        now,
      ),
      Dataset::TimeZone(slot) => {
        if self.settings.tz_format(slot).is_empty() {
          return Freshness::Disabled;
        }
        match self.timezones.slots[slot].expires_at() {
          Some(until) if now < until => Freshness::FreshUntil(until),
          _ => Freshness::Stale {
            retry_after: minutes(TZ_RETRY_MINUTES),
          },
        }
      }
    }
  }

  /// Delay before retrying after the companion reported a failed fetch.
  fn failure_retry(&self, dataset: Dataset) -> Duration {
    match dataset {
      Dataset::Weather => {
        let retry = self.settings.weather_refresh_failed();
        if retry == 0 {
          minutes(self.settings.weather_refresh())
        } else {
          minutes(retry)
        }
      }
      Dataset::PhoneBattery => minutes(self.settings.phone_battery_refresh()),
      Dataset::TimeZone(_) => minutes(TZ_RETRY_MINUTES),
    }
  }

  fn evaluate(&mut self, dataset: Dataset, now: DateTime<Utc>, requests: &mut Vec<Dataset>) {
    let freshness = self.freshness(dataset, now);
    if self.scheduler_mut(dataset).evaluate(freshness, now) && !requests.contains(&dataset) {
      requests.push(dataset);
    }
  }

  fn on_failed(&mut self, dataset: Dataset, now: DateTime<Utc>, requests: &mut Vec<Dataset>) {
    if self.freshness(dataset, now) == Freshness::Disabled {
      // Cancels any pending timer
      self.evaluate(dataset, now, requests);
      return;
    }
    let retry = self.failure_retry(dataset);
    self.scheduler_mut(dataset).on_failed(retry, now);
  }

  /// A changed timezone format means the slot may now name a different zone;
  /// its old schedule can no longer be trusted.
  fn invalidate_reconfigured_timezones(&mut self, outcome: &SyncOutcome) -> Result<()> {
    let mut changed = false;
    for slot in 0..NUM_TZS {
      if outcome.changed(keys::CONFIG_TZ_FORMAT[slot]) && self.timezones.slots[slot].valid {
        debug!(slot, "Timezone reconfigured, dropping cached schedule");
        self.timezones.slots[slot] = TimeZoneSlot::default();
        changed = true;
      }
    }
    if changed {
      save_record(&self.store, &self.timezones)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::Value;
  use crate::scheduler::RefreshState;
  use crate::store::{MemoryStore, SqliteStore};
  use bytes::BufMut;

  fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
  }

  fn weather_batch() -> Batch {
    Batch::new()
      .with(keys::MSG_WEATHER_ICON_CUR, Value::I8(1))
      .with(keys::MSG_WEATHER_TEMP_CUR, Value::I8(20))
      .with(keys::MSG_WEATHER_TEMP_LOW, Value::I8(12))
      .with(keys::MSG_WEATHER_TEMP_HIGH, Value::I8(25))
  }

  fn tz_payload(until: i32, offset: i16) -> Value {
    let mut buf = Vec::new();
    buf.put_i32_le(until);
    buf.put_i16_le(offset);
    Value::Bytes(buf)
  }

  fn started() -> (Engine<MemoryStore>, Vec<Dataset>) {
    let mut engine = Engine::open(MemoryStore::new()).unwrap();
    let requests = engine.start(now());
    (engine, requests)
  }

  #[test]
  fn test_first_start_requests_enabled_datasets() {
    let (engine, requests) = started();

    assert_eq!(requests, vec![Dataset::Weather, Dataset::PhoneBattery]);
    assert_eq!(engine.scheduler(Dataset::Weather).state(), RefreshState::StalePending);
    assert!(!engine.scheduler(Dataset::TimeZone(0)).timer().is_armed());
    assert_eq!(engine.next_deadline(), Some(now() + Duration::minutes(30)));
  }

  #[test]
  fn test_response_is_not_answered_with_request() {
    let (mut engine, _) = started();
    engine.take_dirty();

    let later = now() + Duration::seconds(5);
    let requests = engine.handle_batch(&weather_batch(), later).unwrap();

    assert!(requests.is_empty());
    assert!(engine.take_dirty());
    assert_eq!(engine.weather().temp_cur, 20);
    assert_eq!(engine.scheduler(Dataset::Weather).state(), RefreshState::Fresh);
    assert_eq!(
      engine.scheduler(Dataset::Weather).timer().fire_at(),
      Some(later + Duration::minutes(30))
    );
  }

  #[test]
  fn test_unrelated_batch_does_not_repeat_pending_request() {
    let (mut engine, _) = started();

    let batch = Batch::new().with(17, Value::U8(0xC3));
    let requests = engine.handle_batch(&batch, now() + Duration::minutes(1)).unwrap();

    assert!(requests.is_empty());
    assert_eq!(engine.scheduler(Dataset::Weather).state(), RefreshState::StalePending);
  }

  #[test]
  fn test_failure_schedules_fast_retry() {
    let (mut engine, _) = started();
    engine.handle_batch(&weather_batch(), now()).unwrap();
    engine.take_dirty();

    let later = now() + Duration::minutes(31);
    assert!(engine.fire_due(later).contains(&Dataset::Weather));

    let failed = Batch::new().with(keys::MSG_WEATHER_FAILED, Value::U8(1));
    let requests = engine.handle_batch(&failed, later).unwrap();

    assert!(requests.is_empty());
    assert!(engine.take_dirty());
    assert!(engine.weather().failed);
    assert_eq!(engine.weather().temp_cur, 20);
    assert_eq!(engine.scheduler(Dataset::Weather).state(), RefreshState::FailedPending);
    assert_eq!(
      engine.scheduler(Dataset::Weather).timer().fire_at(),
      Some(later + Duration::minutes(5))
    );

    // Retry fires on the short interval
    assert!(engine.fire_due(later + Duration::minutes(4)).is_empty());
    assert_eq!(
      engine.fire_due(later + Duration::minutes(5)),
      vec![Dataset::Weather]
    );
  }

  #[test]
  fn test_zero_failure_retry_falls_back_to_interval() {
    let (mut engine, _) = started();
    let batch = Batch::new().with(keys::CONFIG_WEATHER_REFRESH_FAILED, Value::U16(0));
    engine.handle_batch(&batch, now()).unwrap();

    let failed = Batch::new().with(keys::MSG_WEATHER_FAILED, Value::U8(1));
    engine.handle_batch(&failed, now()).unwrap();

    assert_eq!(
      engine.scheduler(Dataset::Weather).timer().fire_at(),
      Some(now() + Duration::minutes(30))
    );
  }

  #[test]
  fn test_disabling_refresh_cancels_timer() {
    let (mut engine, _) = started();

    let batch = Batch::new().with(keys::CONFIG_WEATHER_REFRESH, Value::U16(0));
    let requests = engine.handle_batch(&batch, now()).unwrap();

    assert!(requests.is_empty());
    assert!(!engine.scheduler(Dataset::Weather).timer().is_armed());

    let failed = Batch::new().with(keys::MSG_WEATHER_FAILED, Value::U8(1));
    engine.handle_batch(&failed, now()).unwrap();
    assert!(!engine.scheduler(Dataset::Weather).timer().is_armed());

    let much_later = now() + Duration::days(3);
    assert!(!engine.fire_due(much_later).contains(&Dataset::Weather));
    assert!(!engine.start(much_later).contains(&Dataset::Weather));
  }

  #[test]
  fn test_interval_change_reevaluates() {
    let (mut engine, _) = started();
    engine.handle_batch(&weather_batch(), now()).unwrap();

    let later = now() + Duration::minutes(20);
    let batch = Batch::new().with(keys::CONFIG_WEATHER_REFRESH, Value::U16(15));
    let requests = engine.handle_batch(&batch, later).unwrap();

    assert_eq!(requests, vec![Dataset::Weather]);
    assert_eq!(
      engine.scheduler(Dataset::Weather).timer().fire_at(),
      Some(later + Duration::minutes(15))
    );
  }

  #[test]
  fn test_client_ready_reevaluates_everything() {
    let (mut engine, _) = started();
    assert!(!engine.client_ready());

    let ready = Batch::new().with(keys::MSG_CLIENT_READY, Value::U8(1));
    let requests = engine.handle_batch(&ready, now() + Duration::seconds(2)).unwrap();

    assert!(engine.client_ready());
    assert_eq!(requests, vec![Dataset::Weather, Dataset::PhoneBattery]);
  }

  #[test]
  fn test_timezone_cycle() {
    let (mut engine, _) = started();

    let configure = Batch::new().with(keys::CONFIG_TZ_1_FORMAT, Value::Str("NYC %H:%M".to_string()));
    let requests = engine.handle_batch(&configure, now()).unwrap();
    assert_eq!(requests, vec![Dataset::TimeZone(1)]);

    let until = (now() + Duration::days(60)).timestamp() as i32;
    let data = Batch::new().with(keys::MSG_TZ[1], tz_payload(until, -300));
    let requests = engine.handle_batch(&data, now()).unwrap();

    assert!(requests.is_empty());
    assert_eq!(engine.timezones().slots[1].offset_at(now()), Some(-300));
    assert_eq!(
      engine.scheduler(Dataset::TimeZone(1)).timer().fire_at(),
      DateTime::from_timestamp(i64::from(until), 0)
    );

    // Pointing the slot at another zone drops the old schedule
    let reconfigure = Batch::new().with(keys::CONFIG_TZ_1_FORMAT, Value::Str("LON %H:%M".to_string()));
    let requests = engine.handle_batch(&reconfigure, now()).unwrap();
    assert_eq!(requests, vec![Dataset::TimeZone(1)]);
    assert!(!engine.timezones().slots[1].valid);
  }

  #[test]
  fn test_timezone_failure_retries_later() {
    let (mut engine, _) = started();
    let configure = Batch::new().with(keys::CONFIG_TZ_0_FORMAT, Value::Str("%H".to_string()));
    engine.handle_batch(&configure, now()).unwrap();

    let empty = Batch::new().with(keys::MSG_TZ[0], Value::Bytes(Vec::new()));
    let requests = engine.handle_batch(&empty, now()).unwrap();

    assert!(requests.is_empty());
    assert_eq!(engine.scheduler(Dataset::TimeZone(0)).state(), RefreshState::FailedPending);
    assert!(engine
      .fire_due(now() + Duration::minutes(60))
      .contains(&Dataset::TimeZone(0)));
  }

  #[test]
  fn test_outdated_timezone_schedule_is_not_requested_again() {
    let (mut engine, _) = started();
    let configure = Batch::new().with(keys::CONFIG_TZ_0_FORMAT, Value::Str("%H".to_string()));
    assert_eq!(engine.handle_batch(&configure, now()).unwrap(), vec![Dataset::TimeZone(0)]);

    let until = (now() - Duration::days(1)).timestamp() as i32;
    let outdated = Batch::new().with(keys::MSG_TZ[0], tz_payload(until, 60));
    for _ in 0..3 {
      let requests = engine.handle_batch(&outdated, now()).unwrap();
      assert!(requests.is_empty());
    }

    assert_eq!(engine.scheduler(Dataset::TimeZone(0)).state(), RefreshState::FailedPending);
    assert_eq!(
      engine.scheduler(Dataset::TimeZone(0)).timer().fire_at(),
      Some(now() + Duration::minutes(60))
    );
  }

  #[test]
  fn test_shake_forces_phone_battery_fetch() {
    let (mut engine, _) = started();
    let battery = Batch::new().with(keys::MSG_PHONEBAT, Value::U8(80));
    engine.handle_batch(&battery, now()).unwrap();

    assert!(engine.handle_shake(now()).is_empty());

    let enable = Batch::new().with(keys::CONFIG_UPDATE_PHONEBAT_ON_SHAKE, Value::U8(1));
    engine.handle_batch(&enable, now()).unwrap();

    let later = now() + Duration::minutes(2);
    assert_eq!(engine.handle_shake(later), vec![Dataset::PhoneBattery]);
    assert_eq!(
      engine.scheduler(Dataset::PhoneBattery).timer().fire_at(),
      Some(later + Duration::minutes(30))
    );
  }

  #[test]
  fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
      let mut engine = Engine::open(SqliteStore::open(&path).unwrap()).unwrap();
      engine.start(now());
      let batch = weather_batch()
        .with(keys::MSG_PHONEBAT, Value::U8(55))
        .with(keys::CONFIG_WEATHER_REFRESH, Value::U16(60));
      engine.handle_batch(&batch, now()).unwrap();
    }

    let mut engine = Engine::open(SqliteStore::open(&path).unwrap()).unwrap();
    assert_eq!(engine.settings().weather_refresh(), 60);
    assert_eq!(engine.weather().temp_high, 25);
    assert_eq!(engine.phone_battery().level, 55);

    let later = now() + Duration::minutes(10);
    assert!(engine.start(later).is_empty());
    assert_eq!(
      engine.scheduler(Dataset::Weather).timer().fire_at(),
      Some(now() + Duration::minutes(60))
    );
  }
}
