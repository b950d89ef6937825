// src/clock.rs

//! Millisecond time sources used for admission decisions.
//!
//! Every policy takes its clock as an injected `Arc<dyn Clock>`, so tests can
//! substitute a deterministic source without any process-wide state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of the current time in integer milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
  fn now(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
  fn now(&self) -> u64 {
    (**self).now()
  }
}

/// Milliseconds elapsed since the clock was created, read from Tokio's clock.
///
/// Because it follows `tokio::time::Instant`, it also follows a paused test
/// runtime, which keeps computed delays and timer expiry on the same timeline.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
  origin: tokio::time::Instant,
}

impl MonotonicClock {
  pub fn new() -> Self {
    Self {
      origin: tokio::time::Instant::now(),
    }
  }
}

impl Default for MonotonicClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for MonotonicClock {
  fn now(&self) -> u64 {
    saturating_millis(self.origin.elapsed())
  }
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> u64 {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(saturating_millis)
      .unwrap_or(0)
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  millis: AtomicU64,
}

impl ManualClock {
  pub fn new(start_millis: u64) -> Self {
    Self {
      millis: AtomicU64::new(start_millis),
    }
  }

  pub fn set(&self, millis: u64) {
    self.millis.store(millis, Ordering::Release);
  }

  pub fn advance(&self, by: Duration) {
    let by = saturating_millis(by);
    let _ = self
      .millis
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |m| Some(m.saturating_add(by)));
  }
}

impl Clock for ManualClock {
  fn now(&self) -> u64 {
    self.millis.load(Ordering::Acquire)
  }
}

/// Whole milliseconds in `d`, clamped to `u64::MAX`.
pub(crate) fn saturating_millis(d: Duration) -> u64 {
  u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// The clock used when none is configured.
pub fn default_clock() -> Arc<dyn Clock> {
  Arc::new(MonotonicClock::new())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_moves_only_when_told() {
    let clock = ManualClock::new(40);
    assert_eq!(clock.now(), 40);
    clock.advance(Duration::from_millis(60));
    assert_eq!(clock.now(), 100);
    clock.set(7);
    assert_eq!(clock.now(), 7);
  }

  #[test]
  fn manual_clock_saturates_at_the_top() {
    let clock = ManualClock::new(10);
    clock.advance(Duration::MAX);
    assert_eq!(clock.now(), u64::MAX);
    clock.advance(Duration::from_millis(1));
    assert_eq!(clock.now(), u64::MAX);
  }

  #[tokio::test(start_paused = true)]
  async fn monotonic_clock_follows_paused_tokio_time() {
    let clock = MonotonicClock::new();
    assert_eq!(clock.now(), 0);
    tokio::time::advance(Duration::from_millis(1500)).await;
    assert_eq!(clock.now(), 1500);
  }

  #[test]
  fn system_clock_is_past_2020() {
    // 2020-01-01T00:00:00Z
    assert!(SystemClock.now() > 1_577_836_800_000);
  }
}
