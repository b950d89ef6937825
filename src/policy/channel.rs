// src/policy/channel.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Admission, ChannelKey, ThrottlePolicy};
use crate::clock::Clock;
use crate::rate::Rate;

struct ChannelState<K> {
  global: Rate,
  channels: HashMap<K, Rate>,
}

/// One global rate composed with an optional rate per channel.
pub struct ChannelRatePolicy<K: ChannelKey> {
  state: Mutex<ChannelState<K>>,
  clock: Arc<dyn Clock>,
  window: Duration,
}

impl<K: ChannelKey> ChannelRatePolicy<K> {
  pub fn new(global: Rate, channels: HashMap<K, Rate>, clock: Arc<dyn Clock>) -> Self {
    tracing::debug!(
      global = %global,
      channels = channels.len(),
      "Created channel rate policy"
    );
    let window = global.window();
    Self {
      state: Mutex::new(ChannelState { global, channels }),
      clock,
      window,
    }
  }
}

impl<K: ChannelKey> ThrottlePolicy for ChannelRatePolicy<K> {
  type Key = K;

  fn admit(&self, channel: Option<&K>) -> Admission {
    let mut state = self.state.lock();
    let now = self.clock.now();
    let ChannelState { global, channels } = &mut *state;

    let mut at = global.call_time(now);
    if let Some(key) = channel {
      match channels.get_mut(key) {
        Some(rate) => {
          at = at.max(rate.call_time(now));
          rate.add_call(at);
        }
        None => tracing::trace!(channel = ?key, "No rate for channel, using global rate only"),
      }
    }
    global.add_call(at);

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

impl<K: ChannelKey> fmt::Debug for ChannelRatePolicy<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("ChannelRatePolicy")
      .field("global", &state.global)
      .field("channels", &state.channels.len())
      .field("clock", &self.clock)
      .finish()
  }
}
