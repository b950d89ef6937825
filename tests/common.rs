// tests/common.rs
#![allow(dead_code)] // Each test binary uses a subset of the helpers

use rthrottle::{Clock, ManualClock, Rate};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

// Setup function to initialize tracing
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "rthrottle=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer() // Write to test output capture
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

pub fn rate(number_calls: usize, window_ms: u64) -> Rate {
  Rate::new(number_calls, Duration::from_millis(window_ms)).expect("valid test rate")
}

pub fn manual_clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::new(0))
}

pub fn as_clock(clock: &Arc<ManualClock>) -> Arc<dyn Clock> {
  clock.clone()
}

/// Shared log of which task ran, in execution order.
#[derive(Clone, Default)]
pub struct RunLog {
  entries: Arc<Mutex<Vec<&'static str>>>,
}

impl RunLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns a task body that appends `name` when it runs.
  pub fn record(&self, name: &'static str) -> impl std::future::Future<Output = ()> + Send + 'static {
    let entries = self.entries.clone();
    async move {
      entries.lock().push(name);
    }
  }

  pub fn entries(&self) -> Vec<&'static str> {
    self.entries.lock().clone()
  }
}

/// Largest number of timestamps inside any half-open window `[x, x + window_ms)`.
pub fn max_in_any_window(timestamps: &[u64], window_ms: u64) -> usize {
  let mut sorted = timestamps.to_vec();
  sorted.sort_unstable();
  let mut best = 0;
  let mut start = 0;
  for end in 0..sorted.len() {
    while sorted[end] - sorted[start] >= window_ms {
      start += 1;
    }
    best = best.max(end - start + 1);
  }
  best
}
