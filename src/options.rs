// src/options.rs

use std::time::Duration;

use crate::ThrottleError;

/// Default capacity of the queued dispatcher's FIFO.
pub const DEFAULT_QUEUE_CAPACITY: usize = 150;

/// How admitted tasks reach execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
  /// Each task gets its own timer; tasks may run out of submission order.
  #[default]
  Scheduled,
  /// Tasks pass through a bounded FIFO and run strictly in enqueue order.
  Queued,
}

/// Options for the queued dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
  /// Maximum number of tasks waiting in the FIFO.
  pub capacity: usize,
  /// How long `submit` waits for a free slot before dropping the task.
  /// `None` waits for one window of the policy's primary global rate.
  pub enqueue_timeout: Option<Duration>,
}

impl Default for QueueOptions {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_QUEUE_CAPACITY,
      enqueue_timeout: None,
    }
  }
}

impl QueueOptions {
  pub(crate) fn validate(&self) -> Result<(), ThrottleError> {
    if self.capacity == 0 {
      return Err(ThrottleError::InvalidArgument(
        "queue capacity must be at least 1".to_string(),
      ));
    }
    Ok(())
  }
}

// --- Helper functions for parsing textual configuration ---

/// Parses a duration such as `250ms`, `1s`, `10m` or `1h 30m`.
/// A bare integer is taken as milliseconds.
pub fn parse_duration(value: &str) -> Result<Duration, ThrottleError> {
  let value = value.trim();
  if let Ok(millis) = value.parse::<u64>() {
    return Ok(Duration::from_millis(millis));
  }
  humantime::parse_duration(value)
    .map_err(|e| ThrottleError::InvalidRate(format!("bad duration '{}': {}", value, e)))
}

/// Splits `N/duration` (e.g. `20/1m`) into its call count and window.
pub fn parse_rate_parts(value: &str) -> Result<(usize, Duration), ThrottleError> {
  let (calls, window) = value
    .split_once('/')
    .ok_or_else(|| ThrottleError::InvalidRate(format!("expected 'N/duration', got '{}'", value)))?;
  let calls: usize = calls
    .trim()
    .parse()
    .map_err(|_| ThrottleError::InvalidRate(format!("bad call count in '{}'", value)))?;
  Ok((calls, parse_duration(window)?))
}

/// Formats a duration with the largest unit that divides it evenly.
pub(crate) fn format_duration(window: Duration) -> String {
  let ms = window.as_millis();
  match ms {
    ms if ms != 0 && ms % 3_600_000 == 0 => format!("{}h", ms / 3_600_000),
    ms if ms != 0 && ms % 60_000 == 0 => format!("{}m", ms / 60_000),
    ms if ms != 0 && ms % 1_000 == 0 => format!("{}s", ms / 1_000),
    ms => format!("{}ms", ms),
  }
}
