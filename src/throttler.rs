// src/throttler.rs

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;

use crate::clock::{default_clock, Clock};
use crate::dispatch::{current_runtime, DispatchStats, Dispatcher, QueuedDispatcher, ScheduledDispatcher, Task, TaskHandle};
use crate::error::ThrottleError;
use crate::options::{DispatchMode, QueueOptions};
use crate::policy::{ChannelKey, Policy};
use crate::rate::Rate;

/// A configured throttle: one policy plus one dispatcher flavor.
///
/// Built with [`Throttler::builder`]. Share it behind an `Arc` to share its budget.
pub enum Throttler<K: ChannelKey> {
  Scheduled(ScheduledDispatcher<Policy<K>>),
  Queued(QueuedDispatcher<Policy<K>>),
}

impl<K: ChannelKey> Throttler<K> {
  pub fn builder() -> ThrottlerBuilder<K> {
    ThrottlerBuilder::new()
  }

  pub fn mode(&self) -> DispatchMode {
    match self {
      Throttler::Scheduled(_) => DispatchMode::Scheduled,
      Throttler::Queued(_) => DispatchMode::Queued,
    }
  }

  pub fn policy(&self) -> &Policy<K> {
    match self {
      Throttler::Scheduled(d) => d.policy(),
      Throttler::Queued(d) => d.policy(),
    }
  }

  /// Submits a task subject to the global rates only.
  pub async fn submit<F>(&self, fut: F) -> Result<TaskHandle, ThrottleError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match self {
      Throttler::Scheduled(d) => d.submit(fut),
      Throttler::Queued(d) => d.submit(fut).await,
    }
  }

  /// Submits a task on `channel`, subject to its rate (if configured) and the
  /// global rates.
  pub async fn submit_to<F>(&self, channel: K, fut: F) -> Result<TaskHandle, ThrottleError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match self {
      Throttler::Scheduled(d) => d.submit_to(channel, fut),
      Throttler::Queued(d) => d.submit_to(channel, fut).await,
    }
  }

  /// Overlays another global rate on a multi-rate throttle.
  ///
  /// # Errors
  ///
  /// `ThrottleError::UnsupportedOperation` when the throttle was built with a
  /// single global rate and without [`ThrottlerBuilder::multi_rate`].
  pub fn add_rate(&self, rate: Rate) -> Result<(), ThrottleError> {
    self.policy().add_rate(rate)
  }
}

#[async_trait]
impl<K: ChannelKey> Dispatcher for Throttler<K> {
  type Key = K;

  async fn dispatch(&self, channel: Option<K>, task: Task) -> Result<TaskHandle, ThrottleError> {
    match self {
      Throttler::Scheduled(d) => d.dispatch(channel, task).await,
      Throttler::Queued(d) => d.dispatch(channel, task).await,
    }
  }

  fn stats(&self) -> DispatchStats {
    match self {
      Throttler::Scheduled(d) => d.stats(),
      Throttler::Queued(d) => d.stats(),
    }
  }

  fn shutdown(&self) {
    match self {
      Throttler::Scheduled(d) => d.shutdown(),
      Throttler::Queued(d) => d.shutdown(),
    }
  }

  fn is_shutdown(&self) -> bool {
    match self {
      Throttler::Scheduled(d) => d.is_shutdown(),
      Throttler::Queued(d) => d.is_shutdown(),
    }
  }
}

impl<K: ChannelKey> fmt::Debug for Throttler<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Throttler::Scheduled(d) => d.fmt(f),
      Throttler::Queued(d) => d.fmt(f),
    }
  }
}

/// Collects rates and dispatch options for a [`Throttler`].
pub struct ThrottlerBuilder<K: ChannelKey> {
  globals: Vec<Rate>,
  channels: HashMap<K, Rate>,
  clock: Option<Arc<dyn Clock>>,
  mode: DispatchMode,
  queue_options: QueueOptions,
  multi_rate: bool,
  runtime: Option<Handle>,
}

impl<K: ChannelKey> ThrottlerBuilder<K> {
  pub fn new() -> Self {
    Self {
      globals: Vec::new(),
      channels: HashMap::new(),
      clock: None,
      mode: DispatchMode::default(),
      queue_options: QueueOptions::default(),
      multi_rate: false,
      runtime: None,
    }
  }

  /// Adds a global rate. The first one added is the primary rate.
  pub fn global_rate(mut self, rate: Rate) -> Self {
    self.globals.push(rate);
    self
  }

  /// Sets the rate for `channel`, replacing any earlier one.
  pub fn channel_rate(mut self, channel: K, rate: Rate) -> Self {
    self.channels.insert(channel, rate);
    self
  }

  pub fn channel_rates(mut self, rates: impl IntoIterator<Item = (K, Rate)>) -> Self {
    self.channels.extend(rates);
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  pub fn mode(mut self, mode: DispatchMode) -> Self {
    self.mode = mode;
    self
  }

  /// Selects the queued dispatcher with these options.
  pub fn queue_options(mut self, options: QueueOptions) -> Self {
    self.mode = DispatchMode::Queued;
    self.queue_options = options;
    self
  }

  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_options.capacity = capacity;
    self
  }

  pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
    self.queue_options.enqueue_timeout = Some(timeout);
    self
  }

  /// Uses the multi-rate policy even with a single global rate, so that
  /// [`Throttler::add_rate`] is available later.
  pub fn multi_rate(mut self) -> Self {
    self.multi_rate = true;
    self
  }

  pub fn runtime(mut self, handle: Handle) -> Self {
    self.runtime = Some(handle);
    self
  }

  /// # Errors
  ///
  /// - `ThrottleError::InvalidArgument` if no global rate was added or the
  ///   queue options are invalid.
  /// - `ThrottleError::NoRuntime` if no handle was given and the caller is not
  ///   inside a Tokio runtime.
  pub fn build(self) -> Result<Throttler<K>, ThrottleError> {
    if self.globals.is_empty() {
      return Err(ThrottleError::InvalidArgument(
        "a throttler needs at least one global rate".to_string(),
      ));
    }
    let runtime = match self.runtime {
      Some(handle) => handle,
      None => current_runtime()?,
    };
    let clock = self.clock.unwrap_or_else(default_clock);
    let policy = Policy::from_rates(self.globals, self.channels, clock, self.multi_rate)?;

    tracing::debug!(mode = ?self.mode, "Building throttler");
    match self.mode {
      DispatchMode::Scheduled => {
        Ok(Throttler::Scheduled(ScheduledDispatcher::with_handle(policy, runtime)))
      }
      DispatchMode::Queued => {
        QueuedDispatcher::with_handle(policy, self.queue_options, runtime).map(Throttler::Queued)
      }
    }
  }
}

impl<K: ChannelKey> Default for ThrottlerBuilder<K> {
  fn default() -> Self {
    Self::new()
  }
}
