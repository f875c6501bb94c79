//! Staleness detection and refresh timers for cached datasets.
//!
//! Each dataset owns one `RefreshScheduler`, which tracks where the dataset is
//! in its fetch cycle and holds its single `RefreshTimer`. The scheduler never
//! talks to the companion itself: `evaluate` tells the caller whether a fetch
//! request must go out now.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Where a dataset is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
  NeverFetched,
  Fresh,
  /// A request was sent and no response has arrived yet.
  StalePending,
  /// The companion reported a failed fetch; a fast retry is scheduled.
  FailedPending,
}

/// Single-shot alarm. Arming an armed timer moves its deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshTimer {
  fire_at: Option<DateTime<Utc>>,
}

impl RefreshTimer {
  /// Arm the timer to fire at `at`. Returns `true` if an earlier deadline was
  /// replaced.
  pub fn arm(&mut self, at: DateTime<Utc>) -> bool {
    self.fire_at.replace(at).is_some()
  }

  pub fn cancel(&mut self) {
    self.fire_at = None;
  }

  pub fn is_armed(&self) -> bool {
    self.fire_at.is_some()
  }

  pub fn fire_at(&self) -> Option<DateTime<Utc>> {
    self.fire_at
  }

  /// Disarm and return `true` if the deadline has been reached at `now`.
  pub fn take_if_due(&mut self, now: DateTime<Utc>) -> bool {
    match self.fire_at {
      Some(at) if at <= now => {
        self.fire_at = None;
        true
      }
      _ => false,
    }
  }
}

/// How current a dataset is, as seen by its refresh policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Refreshing is turned off for this dataset.
  Disabled,
  /// The data must be fetched now; if no response arrives, retry after the
  /// given delay.
  Stale { retry_after: Duration },
  /// The data is good until the given instant.
  FreshUntil(DateTime<Utc>),
}

impl Freshness {
  /// Interval policy: data captured at `timestamp` goes stale after
  /// `interval_minutes`. An interval of zero disables refreshing.
  pub fn from_interval(
    timestamp: Option<DateTime<Utc>>,
    interval_minutes: u16,
    now: DateTime<Utc>,
  ) -> Self {
    if interval_minutes == 0 {
      return Freshness::Disabled;
    }
    let interval = minutes(interval_minutes);

    match timestamp {
      Some(ts) if now - ts < interval => Freshness::FreshUntil(ts + interval),
      _ => Freshness::Stale {
        retry_after: interval,
      },
    }
  }
}

pub fn minutes(m: u16) -> Duration {
  Duration::minutes(i64::from(m))
}

/// Refresh state machine and timer for one dataset.
#[derive(Debug, Clone)]
pub struct RefreshScheduler {
  name: String,
  state: RefreshState,
  timer: RefreshTimer,
}

impl RefreshScheduler {
  pub fn new(name: impl Into<String>, has_data: bool) -> Self {
    Self {
      name: name.into(),
      state: if has_data {
        RefreshState::Fresh
      } else {
        RefreshState::NeverFetched
      },
      timer: RefreshTimer::default(),
    }
  }

  pub fn state(&self) -> RefreshState {
    self.state
  }

  pub fn timer(&self) -> &RefreshTimer {
    &self.timer
  }

  /// Decide whether a fetch request must be sent now, and arm the timer for
  /// the next evaluation. Returns `true` if the caller must send a request.
  pub fn evaluate(&mut self, freshness: Freshness, now: DateTime<Utc>) -> bool {
    match freshness {
      Freshness::Disabled => {
        if self.timer.is_armed() {
          debug!(dataset = %self.name, "Refresh disabled, cancelling timer");
        }
        self.timer.cancel();
        false
      }
      Freshness::Stale { retry_after } => {
        self.state = RefreshState::StalePending;
        self.arm(now + retry_after);
        debug!(dataset = %self.name, "Data stale, requesting fetch");
        true
      }
      Freshness::FreshUntil(until) => {
        self.state = RefreshState::Fresh;
        self.arm(until);
        false
      }
    }
  }

  /// New data arrived; the caller re-evaluates afterwards.
  pub fn on_updated(&mut self) {
    self.state = RefreshState::Fresh;
  }

  /// The companion reported a failed fetch. Retry after `retry_after`
  /// without going through the normal interval.
  pub fn on_failed(&mut self, retry_after: Duration, now: DateTime<Utc>) {
    self.state = RefreshState::FailedPending;
    self.arm(now + retry_after);
  }

  /// Disarm the timer if it is due. Returns `true` if the caller must
  /// re-evaluate now.
  pub fn take_due(&mut self, now: DateTime<Utc>) -> bool {
    self.timer.take_if_due(now)
  }

  fn arm(&mut self, at: DateTime<Utc>) {
    let rescheduled = self.timer.arm(at);
    debug!(dataset = %self.name, fire_at = %at, rescheduled, "Refresh timer armed");
  }
}
