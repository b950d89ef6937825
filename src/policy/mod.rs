// src/policy/mod.rs

//! Throttle policies: how global and per-channel rates combine into one
//! admission decision.
//!
//! A policy owns its `Rate`s and the single lock that serializes admissions.
//! `ChannelRatePolicy` composes one global rate with per-channel rates,
//! `MultiRatePolicy` composes any number of overlaid global rates with
//! per-channel rates. `Policy` is the tagged union of the two that the
//! `Throttler` is built on.

pub mod channel;
pub mod multi;

pub use channel::ChannelRatePolicy;
pub use multi::MultiRatePolicy;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::rate::Rate;
use crate::ThrottleError;

/// Anything usable as a channel identifier.
pub trait ChannelKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ChannelKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// The outcome of one admission: when it was decided and when the call may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
  /// Clock reading taken under the policy lock.
  pub now: u64,
  /// Earliest legal execution time, never before `now`.
  pub at: u64,
}

impl Admission {
  pub fn delay(&self) -> Duration {
    Duration::from_millis(self.at.saturating_sub(self.now))
  }

  pub fn is_immediate(&self) -> bool {
    self.at <= self.now
  }
}

/// Computes legal call times and records them against every relevant rate.
pub trait ThrottlePolicy: Send + Sync + 'static {
  type Key: ChannelKey;

  /// Admits one call on `channel` (or on the global rates only for `None`).
  ///
  /// Implementations must take the clock reading, every `call_time` and every
  /// `add_call` under one lock, so concurrent callers see a strictly
  /// serialized sequence of admissions.
  fn admit(&self, channel: Option<&Self::Key>) -> Admission;

  /// The clock admissions are measured against.
  fn clock(&self) -> &Arc<dyn Clock>;

  /// Window of the first global rate; bounds the queued dispatcher's enqueue wait.
  fn primary_window(&self) -> Duration;

  fn has_channel(&self, channel: &Self::Key) -> bool;
}

impl<P: ThrottlePolicy + ?Sized> ThrottlePolicy for Arc<P> {
  type Key = P::Key;

  fn admit(&self, channel: Option<&Self::Key>) -> Admission {
    (**self).admit(channel)
  }

  fn clock(&self) -> &Arc<dyn Clock> {
    (**self).clock()
  }

  fn primary_window(&self) -> Duration {
    (**self).primary_window()
  }

  fn has_channel(&self, channel: &Self::Key) -> bool {
    (**self).has_channel(channel)
  }
}

/// Either policy flavor behind one type.
#[derive(Debug)]
pub enum Policy<K: ChannelKey> {
  Channel(ChannelRatePolicy<K>),
  MultiRate(MultiRatePolicy<K>),
}

impl<K: ChannelKey> Policy<K> {
  /// Builds the single-global flavor for one rate and the overlaid flavor otherwise.
  pub fn from_rates(
    mut globals: Vec<Rate>,
    channels: HashMap<K, Rate>,
    clock: Arc<dyn Clock>,
    force_multi: bool,
  ) -> Result<Self, ThrottleError> {
    if globals.len() == 1 && !force_multi {
      let global = globals.remove(0);
      return Ok(Policy::Channel(ChannelRatePolicy::new(global, channels, clock)));
    }
    MultiRatePolicy::new(globals, channels, clock).map(Policy::MultiRate)
  }

  /// Adds an overlaid global rate. Only the multi-rate flavor supports this.
  pub fn add_rate(&self, rate: Rate) -> Result<(), ThrottleError> {
    match self {
      Policy::MultiRate(p) => {
        p.add_rate(rate);
        Ok(())
      }
      Policy::Channel(_) => Err(ThrottleError::UnsupportedOperation(
        "add_rate requires a multi-rate policy",
      )),
    }
  }
}

impl<K: ChannelKey> ThrottlePolicy for Policy<K> {
  type Key = K;

  fn admit(&self, channel: Option<&K>) -> Admission {
    match self {
      Policy::Channel(p) => p.admit(channel),
      Policy::MultiRate(p) => p.admit(channel),
    }
  }

  fn clock(&self) -> &Arc<dyn Clock> {
    match self {
      Policy::Channel(p) => p.clock(),
      Policy::MultiRate(p) => p.clock(),
    }
  }

  fn primary_window(&self) -> Duration {
    match self {
      Policy::Channel(p) => p.primary_window(),
      Policy::MultiRate(p) => p.primary_window(),
    }
  }

  fn has_channel(&self, channel: &K) -> bool {
    match self {
      Policy::Channel(p) => p.has_channel(channel),
      Policy::MultiRate(p) => p.has_channel(channel),
    }
  }
}
