// src/dispatch/queued.rs

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use super::handle::TaskShared;
use super::{current_runtime, discard, execute, next_task_id, DispatchStats, Dispatcher, StatsInner, Task, TaskHandle};
use crate::clock::{saturating_millis, Clock};
use crate::error::ThrottleError;
use crate::options::QueueOptions;
use crate::policy::ThrottlePolicy;

struct QueueEntry {
  task: Task,
  shared: Arc<TaskShared>,
}

/// Runs tasks strictly in the order they were enqueued.
///
/// Every successful enqueue is admitted against the policy and arms one drain
/// at the admitted time. A drain takes the head of the FIFO, so the policy
/// bounds how often tasks start while the FIFO decides which task starts.
/// Drains pop under a fair lock, so tasks start in enqueue order. A long task
/// does not hold back the next one; each start stays on its admitted slot.
///
/// When the FIFO is full, `submit` waits up to the enqueue timeout for room and
/// then drops the task with `ThrottleError::QueueFull`.
pub struct QueuedDispatcher<P: ThrottlePolicy> {
  policy: P,
  runtime: Handle,
  queue_tx: Sender<QueueEntry>,
  queue_rx: Receiver<QueueEntry>,
  drain_lock: Arc<AsyncMutex<()>>,
  capacity: usize,
  enqueue_timeout: Duration,
  shutdown: CancellationToken,
  stats: Arc<StatsInner>,
  next_id: AtomicU64,
}

impl<P: ThrottlePolicy> QueuedDispatcher<P> {
  /// Creates a dispatcher that spawns onto the current Tokio runtime.
  pub fn new(policy: P, options: QueueOptions) -> Result<Self, ThrottleError> {
    Self::with_handle(policy, options, current_runtime()?)
  }

  pub fn with_handle(policy: P, options: QueueOptions, runtime: Handle) -> Result<Self, ThrottleError> {
    options.validate()?;
    let enqueue_timeout = options
      .enqueue_timeout
      .unwrap_or_else(|| policy.primary_window());
    let (queue_tx, queue_rx) = async_channel::bounded(options.capacity);
    tracing::debug!(
      capacity = options.capacity,
      enqueue_timeout_ms = saturating_millis(enqueue_timeout),
      "Created queued dispatcher"
    );
    Ok(Self {
      policy,
      runtime,
      queue_tx,
      queue_rx,
      drain_lock: Arc::new(AsyncMutex::new(())),
      capacity: options.capacity,
      enqueue_timeout,
      shutdown: CancellationToken::new(),
      stats: Arc::new(StatsInner::default()),
      next_id: AtomicU64::new(0),
    })
  }

  pub fn policy(&self) -> &P {
    &self.policy
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn enqueue_timeout(&self) -> Duration {
    self.enqueue_timeout
  }

  /// Number of tasks waiting in the FIFO.
  pub fn queued(&self) -> usize {
    self.queue_rx.len()
  }

  pub async fn submit<F>(&self, fut: F) -> Result<TaskHandle, ThrottleError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.enqueue(None, Box::pin(fut)).await
  }

  pub async fn submit_to<F>(&self, channel: P::Key, fut: F) -> Result<TaskHandle, ThrottleError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.enqueue(Some(channel), Box::pin(fut)).await
  }

  async fn enqueue(&self, channel: Option<P::Key>, task: Task) -> Result<TaskHandle, ThrottleError> {
    if self.shutdown.is_cancelled() {
      self.stats.record_dropped();
      return Err(ThrottleError::Shutdown);
    }

    let shared = TaskShared::new(
      next_task_id(&self.next_id),
      self.policy.clock().now(),
      self.shutdown.child_token(),
    );
    let entry = QueueEntry {
      task,
      shared: shared.clone(),
    };
    match self.queue_tx.try_send(entry) {
      Ok(()) => {}
      Err(TrySendError::Full(entry)) => self.wait_for_room(shared.id(), entry).await?,
      Err(TrySendError::Closed(_)) => {
        self.stats.record_dropped();
        return Err(ThrottleError::Shutdown);
      }
    }

    let admission = self.policy.admit(channel.as_ref());
    shared.set_scheduled_at(admission.at);
    self.stats.record_submitted();
    tracing::debug!(
      task_id = shared.id(),
      channel = ?channel,
      now = admission.now,
      at = admission.at,
      queued = self.queue_rx.len(),
      "Enqueued task"
    );
    self.spawn_drain(admission.delay());
    Ok(TaskHandle::new(shared))
  }

  async fn wait_for_room(&self, task_id: u64, entry: QueueEntry) -> Result<(), ThrottleError> {
    tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => {
        tracing::warn!(task_id, "Dispatcher shut down while waiting for queue room, dropping task");
        self.stats.record_dropped();
        Err(ThrottleError::Shutdown)
      }
      sent = tokio::time::timeout(self.enqueue_timeout, self.queue_tx.send(entry)) => match sent {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_closed)) => {
          self.stats.record_dropped();
          Err(ThrottleError::Shutdown)
        }
        Err(_elapsed) => {
          tracing::warn!(
            task_id,
            capacity = self.capacity,
            waited_ms = saturating_millis(self.enqueue_timeout),
            "Task queue full, dropping task"
          );
          self.stats.record_dropped();
          Err(ThrottleError::QueueFull {
            capacity: self.capacity,
            waited: self.enqueue_timeout,
          })
        }
      }
    }
  }

  fn spawn_drain(&self, delay: Duration) {
    let queue_rx = self.queue_rx.clone();
    let drain_lock = self.drain_lock.clone();
    let shutdown = self.shutdown.clone();
    let stats = self.stats.clone();
    self.runtime.spawn(async move {
      tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
      }
      let entry = {
        let _guard = drain_lock.lock().await;
        if shutdown.is_cancelled() {
          return;
        }
        queue_rx.try_recv()
      };
      // The lock only orders pops; the task runs on its own admitted slot.
      match entry {
        Ok(entry) => execute(&entry.shared, entry.task, &stats).await,
        Err(_) => tracing::trace!("Drain found the queue empty"),
      }
    });
  }
}

#[async_trait]
impl<P: ThrottlePolicy> Dispatcher for QueuedDispatcher<P> {
  type Key = P::Key;

  async fn dispatch(&self, channel: Option<P::Key>, task: Task) -> Result<TaskHandle, ThrottleError> {
    self.enqueue(channel, task).await
  }

  fn stats(&self) -> DispatchStats {
    self.stats.snapshot()
  }

  fn shutdown(&self) {
    if self.shutdown.is_cancelled() {
      return;
    }
    tracing::info!(queued = self.queue_rx.len(), "Shutting down queued dispatcher");
    self.shutdown.cancel();
    self.queue_tx.close();
    while let Ok(entry) = self.queue_rx.try_recv() {
      discard(&entry.shared, &self.stats);
    }
  }

  fn is_shutdown(&self) -> bool {
    self.shutdown.is_cancelled()
  }
}

impl<P: ThrottlePolicy + fmt::Debug> fmt::Debug for QueuedDispatcher<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueuedDispatcher")
      .field("policy", &self.policy)
      .field("capacity", &self.capacity)
      .field("queued", &self.queue_rx.len())
      .field("enqueue_timeout", &self.enqueue_timeout)
      .field("shutdown", &self.shutdown.is_cancelled())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::dispatch::TaskState;
  use crate::policy::MultiRatePolicy;
  use crate::rate::Rate;
  use std::collections::HashMap;

  fn policy(rates: &[(usize, u64)]) -> MultiRatePolicy<u8> {
    let clock = Arc::new(ManualClock::new(0));
    let rates = rates
      .iter()
      .map(|&(n, ms)| Rate::new(n, Duration::from_millis(ms)).unwrap())
      .collect();
    MultiRatePolicy::new(rates, HashMap::new(), clock).unwrap()
  }

  #[tokio::test]
  async fn zero_capacity_is_rejected() {
    let options = QueueOptions {
      capacity: 0,
      ..Default::default()
    };
    let res = QueuedDispatcher::new(policy(&[(1, 1000)]), options);
    assert!(matches!(res, Err(ThrottleError::InvalidArgument(_))));
  }

  #[tokio::test]
  async fn enqueue_timeout_defaults_to_primary_window() {
    let d = QueuedDispatcher::new(policy(&[(20, 60_000), (200, 600_000)]), QueueOptions::default()).unwrap();
    assert_eq!(d.enqueue_timeout(), Duration::from_secs(60));
    assert_eq!(d.capacity(), 150);

    let options = QueueOptions {
      enqueue_timeout: Some(Duration::from_millis(5)),
      ..Default::default()
    };
    let d = QueuedDispatcher::new(policy(&[(20, 60_000)]), options).unwrap();
    assert_eq!(d.enqueue_timeout(), Duration::from_millis(5));
  }

  #[tokio::test(start_paused = true)]
  async fn shutdown_cancels_everything_still_queued() {
    let d = QueuedDispatcher::new(policy(&[(1, 10_000)]), QueueOptions::default()).unwrap();
    let first = d.submit(async {}).await.unwrap();
    let second = d.submit(async {}).await.unwrap();
    first.cancel();

    d.shutdown();
    assert_eq!(first.state(), TaskState::Cancelled);
    assert_eq!(second.state(), TaskState::Cancelled);
    assert_eq!(d.queued(), 0);
    assert_eq!(d.stats().cancelled, 2);
    assert_eq!(d.submit(async {}).await.unwrap_err(), ThrottleError::Shutdown);
    assert_eq!(d.stats().dropped, 1);
  }
}
