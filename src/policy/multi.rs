// src/policy/multi.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Admission, ChannelKey, ThrottlePolicy};
use crate::clock::Clock;
use crate::rate::Rate;
use crate::ThrottleError;

struct MultiRateState<K> {
  globals: Vec<Rate>,
  channels: HashMap<K, Rate>,
}

/// Several global rates that must all hold at once (e.g. 1/s and 60/min),
/// composed with an optional rate per channel.
pub struct MultiRatePolicy<K: ChannelKey> {
  state: Mutex<MultiRateState<K>>,
  clock: Arc<dyn Clock>,
  window: Duration,
}

impl<K: ChannelKey> MultiRatePolicy<K> {
  /// # Errors
  ///
  /// Returns `ThrottleError::InvalidArgument` if `globals` is empty.
  pub fn new(
    globals: Vec<Rate>,
    channels: HashMap<K, Rate>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self, ThrottleError> {
    let window = match globals.first() {
      Some(primary) => primary.window(),
      None => {
        return Err(ThrottleError::InvalidArgument(
          "at least one global rate is required".to_string(),
        ))
      }
    };
    tracing::debug!(
      globals = globals.len(),
      channels = channels.len(),
      "Created multi-rate policy"
    );
    Ok(Self {
      state: Mutex::new(MultiRateState { globals, channels }),
      clock,
      window,
    })
  }

  /// Overlays another global rate.
  ///
  /// The new rate starts with an empty history: calls admitted before this
  /// point are not counted against it, it only constrains later admissions.
  pub fn add_rate(&self, rate: Rate) {
    tracing::debug!(rate = %rate, "Adding global rate");
    self.state.lock().globals.push(rate);
  }

  pub fn global_rate_count(&self) -> usize {
    self.state.lock().globals.len()
  }
}

impl<K: ChannelKey> ThrottlePolicy for MultiRatePolicy<K> {
  type Key = K;

  fn admit(&self, channel: Option<&K>) -> Admission {
    let mut state = self.state.lock();
    let now = self.clock.now();
    let MultiRateState { globals, channels } = &mut *state;

    let mut at = globals
      .iter_mut()
      .map(|rate| rate.call_time(now))
      .fold(now, u64::max);
    if let Some(key) = channel {
      if let Some(rate) = channels.get_mut(key) {
        at = at.max(rate.call_time(now));
        rate.add_call(at);
      } else {
        tracing::trace!(channel = ?key, "No rate for channel, using global rates only");
      }
    }
    // Every overlaid rate records the chosen slot, not only the binding one.
    for rate in globals.iter_mut() {
      rate.add_call(at);
    }

    tracing::trace!(channel = ?channel, now, at, "Admitted call");
    Admission { now, at }
  }

  fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  fn primary_window(&self) -> Duration {
    self.window
  }

  fn has_channel(&self, channel: &K) -> bool {
    self.state.lock().channels.contains_key(channel)
  }
}

impl<K: ChannelKey> fmt::Debug for MultiRatePolicy<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("MultiRatePolicy")
      .field("globals", &state.globals)
      .field("channels", &state.channels.len())
      .field("clock", &self.clock)
      .finish()
  }
}
