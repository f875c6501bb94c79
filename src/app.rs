use chrono::Utc;
use color_eyre::Result;
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::{Dataset, Engine};
use crate::event::{Event, EventHandler};
use crate::store::RecordStore;
use crate::transport::Transport;

/// Host loop: feeds inbound events and timer deadlines to the engine and
/// sends whatever fetch requests it produces.
pub struct App<S: RecordStore, T: Transport> {
  engine: Engine<S>,
  transport: T,
}

impl<S: RecordStore, T: Transport> App<S, T> {
  pub fn new(store: S, transport: T) -> Result<Self> {
    Ok(Self {
      engine: Engine::open(store)?,
      transport,
    })
  }

  /// Run until the inbound stream closes.
  pub async fn run(&mut self, mut events: EventHandler) -> Result<()> {
    let requests = self.engine.start(Utc::now());
    self.dispatch(requests)?;

    loop {
      let sleep = tokio::time::sleep(self.until_next_deadline());
      tokio::pin!(sleep);

      let event = tokio::select! {
        event = events.next() => event,
        _ = &mut sleep => Some(Event::Tick),
      };

      match event {
        Some(Event::Closed) | None => break,
        Some(event) => self.handle_event(event)?,
      }
    }

    info!("Inbound stream closed, shutting down");
    Ok(())
  }

  fn handle_event(&mut self, event: Event) -> Result<()> {
    let now = Utc::now();
    let requests = match event {
      Event::Batch(batch) => {
        let mut requests = self.engine.handle_batch(&batch, now)?;
        // Timers that came due while the batch was in flight
        requests.extend(self.engine.fire_due(now));
        requests
      }
      Event::Shake => self.engine.handle_shake(now),
      Event::Tick => self.engine.fire_due(now),
      Event::Closed => Vec::new(),
    };
    self.dispatch(requests)
  }

  fn dispatch(&mut self, requests: Vec<Dataset>) -> Result<()> {
    let mut sent = Vec::with_capacity(requests.len());
    for dataset in requests {
      if !sent.contains(&dataset) {
        self.transport.request_fetch(dataset)?;
        sent.push(dataset);
      }
    }
    if self.engine.take_dirty() {
      self.redraw();
    }
    Ok(())
  }

  fn redraw(&self) {
    let now = Utc::now();
    let settings = self.engine.settings();
    let weather = self.engine.weather();
    let phone_battery = self.engine.phone_battery();
    let tz_offsets: Vec<Option<i16>> = self
      .engine
      .timezones()
      .slots
      .iter()
      .map(|slot| slot.offset_at(now))
      .collect();

    info!(
      temp = weather.temp_cur,
      low = weather.temp_low,
      high = weather.temp_high,
      icon = weather.icon,
      weather_failed = weather.failed,
      weather_expired = weather.is_expired(now, settings.weather_expiration()),
      sun_expired = weather.is_sunrise_expired(now, settings.weather_sunrise_expiration()),
      precipitation = !weather.precipitation.is_empty(),
      phone_battery = phone_battery.level,
      phone_battery_expired = phone_battery.is_expired(now, settings.phone_battery_expiration()),
      ?tz_offsets,
      "Redraw"
    );
  }

  fn until_next_deadline(&self) -> Duration {
    match self.engine.next_deadline() {
      Some(at) => {
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(?wait, "Next refresh deadline");
        wait
      }
      // Nothing armed; wake up on the next event
      None => Duration::from_secs(24 * 60 * 60),
    }
  }

  #[cfg(test)]
  fn transport(&self) -> &T {
    &self.transport
  }
}
