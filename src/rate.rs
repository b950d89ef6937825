// src/rate.rs

//! Sliding-window call counter: "at most N calls in any window of length T".
//!
//! A `Rate` only does arithmetic over its call history. It holds no lock and
//! never reads a clock; the owning policy passes `now` in and serializes every
//! `call_time` + `add_call` pair.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::options::{format_duration, parse_rate_parts};
use crate::ThrottleError;

#[derive(Debug)]
pub struct Rate {
  number_calls: usize,
  window: Duration,
  window_ms: u64,
  /// Admitted call timestamps (ms), ascending. May contain future entries.
  history: VecDeque<u64>,
}

impl Rate {
  /// Creates a rate of `number_calls` per `window`.
  ///
  /// # Errors
  ///
  /// Returns `ThrottleError::InvalidRate` if `number_calls` is zero or the
  /// window is shorter than one millisecond or longer than `u64::MAX`
  /// milliseconds.
  pub fn new(number_calls: usize, window: Duration) -> Result<Self, ThrottleError> {
    if number_calls == 0 {
      return Err(ThrottleError::InvalidRate(
        "number of calls must be greater than zero".to_string(),
      ));
    }
    let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
      ThrottleError::InvalidRate(format!("window {:?} does not fit in u64 milliseconds", window))
    })?;
    if window_ms == 0 {
      return Err(ThrottleError::InvalidRate(format!(
        "window must be at least 1ms, got {:?}",
        window
      )));
    }
    Ok(Self {
      number_calls,
      window,
      window_ms,
      history: VecDeque::with_capacity(number_calls + 1),
    })
  }

  pub fn per_second(number_calls: usize) -> Result<Self, ThrottleError> {
    Self::new(number_calls, Duration::from_secs(1))
  }

  pub fn per_minute(number_calls: usize) -> Result<Self, ThrottleError> {
    Self::new(number_calls, Duration::from_secs(60))
  }

  pub fn number_calls(&self) -> usize {
    self.number_calls
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  /// Number of calls currently held in the history, including purgeable ones.
  pub fn len(&self) -> usize {
    self.history.len()
  }

  pub fn is_empty(&self) -> bool {
    self.history.is_empty()
  }

  /// Returns the earliest timestamp at or after `now` at which one more call
  /// fits the budget.
  ///
  /// Entries older than `now - window` are purged first. With fewer than
  /// `number_calls` entries left the call is legal immediately. Otherwise the
  /// history is walked from the newest entry backwards; the `number_calls`-th
  /// entry visited is the oldest call that would share a window with the new
  /// one, so the new call must land strictly more than one window after it.
  ///
  /// Every timestamp after the returned one is legal as well, even when the
  /// history holds future slots granted through another rate. Policies rely on
  /// this to compose rates with `max`.
  pub fn call_time(&mut self, now: u64) -> u64 {
    self.clean_old(now);
    if self.history.len() < self.number_calls {
      return now;
    }
    let bounding_call = self
      .history
      .iter()
      .rev()
      .nth(self.number_calls - 1)
      .copied()
      .unwrap_or(0);
    now.max(bounding_call.saturating_add(self.window_ms).saturating_add(1))
  }

  /// Records a call at `timestamp`, keeping the history ordered.
  ///
  /// Pass the value returned by the preceding `call_time` (or a later one
  /// chosen by a composing policy), never a freshly sampled clock.
  pub fn add_call(&mut self, timestamp: u64) {
    match self.history.back() {
      Some(&newest) if newest > timestamp => {
        let idx = self.history.partition_point(|&t| t <= timestamp);
        self.history.insert(idx, timestamp);
      }
      _ => self.history.push_back(timestamp),
    }
  }

  /// Drops history entries that fell out of the window ending at `now`.
  fn clean_old(&mut self, now: u64) {
    let cutoff = now.saturating_sub(self.window_ms);
    while let Some(&oldest) = self.history.front() {
      if oldest >= cutoff {
        break;
      }
      self.history.pop_front();
    }
  }
}

impl FromStr for Rate {
  type Err = ThrottleError;

  /// Parses `N/duration`, e.g. `20/1m`, `1/1s` or `5/250ms`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (calls, window) = parse_rate_parts(s)?;
    Rate::new(calls, window)
  }
}

impl fmt::Display for Rate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.number_calls, format_duration(self.window))
  }
}
