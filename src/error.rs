use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum ThrottleError {
  // --- Configuration Errors ---
  #[error("Invalid rate: {0}")]
  InvalidRate(String), // Zero calls, zero window, or unparsable "N/duration"

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Admission Errors ---
  #[error("Queue full (capacity {capacity}), task dropped after waiting {waited:?}")]
  QueueFull { capacity: usize, waited: Duration },

  // --- State Errors ---
  #[error("Dispatcher has been shut down")]
  Shutdown,
  #[error("Task was cancelled before it started")]
  Cancelled,
  #[error("Operation not supported by this policy: {0}")]
  UnsupportedOperation(&'static str),

  // --- Runtime Errors ---
  #[error("No Tokio runtime available: {0}")]
  NoRuntime(String),
}

impl ThrottleError {
  /// True for the errors that mean "the task was shed" rather than a misuse of the API.
  pub fn is_drop(&self) -> bool {
    matches!(self, ThrottleError::QueueFull { .. } | ThrottleError::Shutdown)
  }
}
