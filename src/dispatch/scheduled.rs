// src/dispatch/scheduled.rs

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::handle::TaskShared;
use super::{current_runtime, discard, execute, next_task_id, DispatchStats, Dispatcher, StatsInner, Task, TaskHandle};
use crate::error::ThrottleError;
use crate::policy::ThrottlePolicy;

/// Runs each task on its own timer at the admitted time.
///
/// There is no ordering across tasks: a task admitted on an idle channel may
/// run before one submitted earlier on a saturated channel.
pub struct ScheduledDispatcher<P: ThrottlePolicy> {
  policy: P,
  runtime: Handle,
  shutdown: CancellationToken,
  stats: Arc<StatsInner>,
  next_id: AtomicU64,
}

impl<P: ThrottlePolicy> ScheduledDispatcher<P> {
  /// Creates a dispatcher that spawns onto the current Tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns `ThrottleError::NoRuntime` when called outside a runtime.
  pub fn new(policy: P) -> Result<Self, ThrottleError> {
    Ok(Self::with_handle(policy, current_runtime()?))
  }

  pub fn with_handle(policy: P, runtime: Handle) -> Self {
    Self {
      policy,
      runtime,
      shutdown: CancellationToken::new(),
      stats: Arc::new(StatsInner::default()),
      next_id: AtomicU64::new(0),
    }
  }

  pub fn policy(&self) -> &P {
    &self.policy
  }

  /// Submits a task subject to the global rates only.
  pub fn submit<F>(&self, fut: F) -> Result<TaskHandle, ThrottleError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.schedule(None, Box::pin(fut))
  }

  /// Submits a task on `channel`, subject to its rate and the global rates.
  pub fn submit_to<F>(&self, channel: P::Key, fut: F) -> Result<TaskHandle, ThrottleError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.schedule(Some(channel), Box::pin(fut))
  }

  /// Blocks the calling thread until the admitted time, then runs `f` inline.
  ///
  /// Must not be called from inside an async task; use [`run`](Self::run) there.
  pub fn submit_blocking<R>(&self, channel: Option<P::Key>, f: impl FnOnce() -> R) -> Result<R, ThrottleError> {
    self.ensure_running()?;
    let admission = self.policy.admit(channel.as_ref());
    self.stats.record_submitted();
    if !admission.is_immediate() {
      tracing::trace!(channel = ?channel, delay_ms = admission.at - admission.now, "Blocking until admitted");
      std::thread::sleep(admission.delay());
    }
    let out = f();
    self.stats.record_executed();
    Ok(out)
  }

  /// Awaits the admitted time on the caller's task, then awaits `fut`.
  ///
  /// # Errors
  ///
  /// `ThrottleError::Cancelled` if the dispatcher shuts down during the wait.
  pub async fn run<F, T>(&self, channel: Option<P::Key>, fut: F) -> Result<T, ThrottleError>
  where
    F: Future<Output = T>,
  {
    self.ensure_running()?;
    let admission = self.policy.admit(channel.as_ref());
    self.stats.record_submitted();
    if !admission.is_immediate() {
      tokio::select! {
        biased;
        _ = self.shutdown.cancelled() => {
          self.stats.record_cancelled();
          return Err(ThrottleError::Cancelled);
        }
        _ = tokio::time::sleep(admission.delay()) => {}
      }
    }
    let out = fut.await;
    self.stats.record_executed();
    Ok(out)
  }

  fn ensure_running(&self) -> Result<(), ThrottleError> {
    if self.shutdown.is_cancelled() {
      self.stats.record_dropped();
      return Err(ThrottleError::Shutdown);
    }
    Ok(())
  }

  fn schedule(&self, channel: Option<P::Key>, task: Task) -> Result<TaskHandle, ThrottleError> {
    self.ensure_running()?;
    let admission = self.policy.admit(channel.as_ref());
    let shared = TaskShared::new(
      next_task_id(&self.next_id),
      admission.now,
      self.shutdown.child_token(),
    );
    shared.set_scheduled_at(admission.at);
    self.stats.record_submitted();
    tracing::debug!(
      task_id = shared.id(),
      channel = ?channel,
      now = admission.now,
      at = admission.at,
      "Scheduled task"
    );

    let delay = admission.delay();
    let stats = self.stats.clone();
    let timer_shared = shared.clone();
    self.runtime.spawn(async move {
      tokio::select! {
        biased;
        _ = timer_shared.cancel_token().cancelled() => {
          discard(&timer_shared, &stats);
          return;
        }
        _ = tokio::time::sleep(delay) => {}
      }
      execute(&timer_shared, task, &stats).await;
    });

    Ok(TaskHandle::new(shared))
  }
}

#[async_trait]
impl<P: ThrottlePolicy> Dispatcher for ScheduledDispatcher<P> {
  type Key = P::Key;

  async fn dispatch(&self, channel: Option<P::Key>, task: Task) -> Result<TaskHandle, ThrottleError> {
    self.schedule(channel, task)
  }

  fn stats(&self) -> DispatchStats {
    self.stats.snapshot()
  }

  fn shutdown(&self) {
    if self.shutdown.is_cancelled() {
      return;
    }
    tracing::info!("Shutting down scheduled dispatcher");
    self.shutdown.cancel();
  }

  fn is_shutdown(&self) -> bool {
    self.shutdown.is_cancelled()
  }
}

impl<P: ThrottlePolicy + fmt::Debug> fmt::Debug for ScheduledDispatcher<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ScheduledDispatcher")
      .field("policy", &self.policy)
      .field("shutdown", &self.shutdown.is_cancelled())
      .field("stats", &self.stats.snapshot())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::policy::ChannelRatePolicy;
  use crate::rate::Rate;
  use std::collections::HashMap;
  use std::time::Duration;

  fn dispatcher(n: usize, ms: u64) -> ScheduledDispatcher<ChannelRatePolicy<u8>> {
    let clock = Arc::new(ManualClock::new(0));
    let rate = Rate::new(n, Duration::from_millis(ms)).unwrap();
    ScheduledDispatcher::new(ChannelRatePolicy::new(rate, HashMap::new(), clock)).unwrap()
  }

  #[test]
  fn new_requires_a_runtime() {
    let clock = Arc::new(ManualClock::new(0));
    let rate = Rate::per_second(1).unwrap();
    let res = ScheduledDispatcher::new(ChannelRatePolicy::<u8>::new(rate, HashMap::new(), clock));
    assert!(matches!(res, Err(ThrottleError::NoRuntime(_))));
  }

  #[tokio::test(start_paused = true)]
  async fn submissions_after_shutdown_are_refused() {
    let d = dispatcher(1, 1000);
    d.shutdown();
    d.shutdown();
    assert!(d.is_shutdown());
    assert_eq!(d.submit(async {}).unwrap_err(), ThrottleError::Shutdown);
    assert_eq!(d.submit_blocking(None, || ()).unwrap_err(), ThrottleError::Shutdown);
    assert_eq!(d.stats().dropped, 2);
    assert_eq!(d.stats().submitted, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn run_is_cancelled_by_shutdown() {
    let d = Arc::new(dispatcher(1, 60_000));
    assert_eq!(d.run(None, async { 7 }).await, Ok(7));

    let waiting = {
      let d = d.clone();
      tokio::spawn(async move { d.run(None, async { 8 }).await })
    };
    while d.stats().submitted < 2 {
      tokio::task::yield_now().await;
    }
    d.shutdown();
    assert_eq!(waiting.await.unwrap(), Err(ThrottleError::Cancelled));
    assert_eq!(d.stats().cancelled, 1);
    assert_eq!(d.stats().executed, 1);
  }
}
