// src/dispatch/mod.rs

//! Dispatchers decide how an admitted task reaches execution.
//!
//! Both flavors are generic over any `ThrottlePolicy`:
//! - `ScheduledDispatcher` arms one timer per task at its admitted time. Tasks
//!   on independent channels may overtake each other.
//! - `QueuedDispatcher` puts tasks through a bounded FIFO first and drains it
//!   one task per admitted slot, so tasks start in enqueue order.

pub mod handle;
pub mod queued;
pub mod scheduled;

pub use handle::{TaskHandle, TaskState};
pub use queued::QueuedDispatcher;
pub use scheduled::ScheduledDispatcher;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::ThrottleError;
use crate::policy::ChannelKey;
use handle::TaskShared;

/// A unit of throttled work.
pub type Task = BoxFuture<'static, ()>;

/// Boxes a future into a `Task`.
pub fn task<F>(fut: F) -> Task
where
  F: Future<Output = ()> + Send + 'static,
{
  fut.boxed()
}

/// The runtime surface shared by every dispatcher flavor.
#[async_trait]
pub trait Dispatcher: Send + Sync {
  type Key: ChannelKey;

  /// Admits `task` on `channel` (global rates only for `None`) and arranges
  /// for it to run at or after its admitted time.
  async fn dispatch(&self, channel: Option<Self::Key>, task: Task) -> Result<TaskHandle, ThrottleError>;

  fn stats(&self) -> DispatchStats;

  /// Cancels every pending task and rejects further submissions. Running
  /// tasks are left alone. Idempotent.
  fn shutdown(&self);

  fn is_shutdown(&self) -> bool;
}

/// Point-in-time counters of a dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
  /// Tasks accepted (handle returned).
  pub submitted: u64,
  /// Tasks refused because the queue stayed full or the dispatcher shut down.
  pub dropped: u64,
  /// Tasks whose body ran to completion.
  pub executed: u64,
  /// Accepted tasks discarded before they started.
  pub cancelled: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsInner {
  submitted: AtomicU64,
  dropped: AtomicU64,
  executed: AtomicU64,
  cancelled: AtomicU64,
}

impl StatsInner {
  pub(crate) fn record_submitted(&self) {
    self.submitted.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_dropped(&self) {
    self.dropped.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_executed(&self) {
    self.executed.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_cancelled(&self) {
    self.cancelled.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn snapshot(&self) -> DispatchStats {
    DispatchStats {
      submitted: self.submitted.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      executed: self.executed.load(Ordering::Relaxed),
      cancelled: self.cancelled.load(Ordering::Relaxed),
    }
  }
}

/// Runs `task` if it can still be claimed, otherwise discards it.
pub(crate) async fn execute(shared: &TaskShared, task: Task, stats: &StatsInner) {
  if !shared.try_start() {
    tracing::trace!(task_id = shared.id(), "Discarding cancelled task");
    stats.record_cancelled();
    return;
  }
  tracing::trace!(task_id = shared.id(), "Running task");
  task.await;
  stats.record_executed();
  shared.complete();
}

/// Marks a task cancelled from the dispatcher side (timer woken by a cancel
/// or by shutdown) and counts it once.
pub(crate) fn discard(shared: &TaskShared, stats: &StatsInner) {
  // A handle-side cancel may already have moved the state.
  if shared.state() == TaskState::Cancelled || shared.mark_cancelled() {
    stats.record_cancelled();
  }
}

pub(crate) fn next_task_id(counter: &AtomicU64) -> u64 {
  counter.fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) fn current_runtime() -> Result<tokio::runtime::Handle, ThrottleError> {
  tokio::runtime::Handle::try_current().map_err(|e| ThrottleError::NoRuntime(e.to_string()))
}
