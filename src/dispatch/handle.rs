// src/dispatch/handle.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Lifecycle of a submitted task.
///
/// `Pending -> Running -> Done`, or `Pending -> Cancelled`. `Done` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
  /// Waiting for its admitted time (scheduled) or its drain (queued).
  Pending = 0,
  Running = 1,
  Done = 2,
  Cancelled = 3,
}

impl TaskState {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => TaskState::Pending,
      1 => TaskState::Running,
      2 => TaskState::Done,
      _ => TaskState::Cancelled,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, TaskState::Done | TaskState::Cancelled)
  }
}

/// State shared between a `TaskHandle` and the dispatcher that runs the task.
pub(crate) struct TaskShared {
  id: u64,
  state: AtomicU8,
  enqueued_at: u64,
  scheduled_at: AtomicU64,
  /// Fired by `cancel()`; wakes a pending timer early. Child of the dispatcher's
  /// shutdown token.
  cancel: CancellationToken,
  /// Fired once the task reaches a terminal state.
  finished: CancellationToken,
}

impl TaskShared {
  pub(crate) fn new(id: u64, enqueued_at: u64, cancel: CancellationToken) -> Arc<Self> {
    Arc::new(Self {
      id,
      state: AtomicU8::new(TaskState::Pending as u8),
      enqueued_at,
      scheduled_at: AtomicU64::new(enqueued_at),
      cancel,
      finished: CancellationToken::new(),
    })
  }

  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  pub(crate) fn state(&self) -> TaskState {
    TaskState::from_u8(self.state.load(Ordering::Acquire))
  }

  pub(crate) fn set_scheduled_at(&self, at: u64) {
    self.scheduled_at.store(at, Ordering::Release);
  }

  pub(crate) fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  fn transition(&self, from: TaskState, to: TaskState) -> bool {
    self
      .state
      .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// Claims the task for execution. Fails if it was cancelled first.
  pub(crate) fn try_start(&self) -> bool {
    self.transition(TaskState::Pending, TaskState::Running)
  }

  pub(crate) fn complete(&self) {
    if self.transition(TaskState::Running, TaskState::Done) {
      self.finished.cancel();
    }
  }

  /// Moves a still-pending task to `Cancelled`. Returns false if it had
  /// already started or finished.
  pub(crate) fn mark_cancelled(&self) -> bool {
    if self.transition(TaskState::Pending, TaskState::Cancelled) {
      self.cancel.cancel();
      self.finished.cancel();
      true
    } else {
      false
    }
  }
}

/// Handle to a submitted task.
///
/// Dropping the handle does not cancel the task.
#[derive(Clone)]
pub struct TaskHandle {
  shared: Arc<TaskShared>,
}

impl TaskHandle {
  pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
    Self { shared }
  }

  pub fn id(&self) -> u64 {
    self.shared.id
  }

  pub fn state(&self) -> TaskState {
    self.shared.state()
  }

  /// Clock reading when the task was submitted.
  pub fn enqueued_at(&self) -> u64 {
    self.shared.enqueued_at
  }

  /// Admitted execution time on the policy's clock.
  pub fn scheduled_at(&self) -> u64 {
    self.shared.scheduled_at.load(Ordering::Acquire)
  }

  /// Prevents the task from running if it has not started yet.
  ///
  /// Returns `true` if this call cancelled the task. Once the task is running
  /// this is a no-op that returns `false`; the task body is never interrupted.
  pub fn cancel(&self) -> bool {
    let cancelled = self.shared.mark_cancelled();
    if cancelled {
      tracing::debug!(task_id = self.shared.id, "Task cancelled before start");
    }
    cancelled
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == TaskState::Cancelled
  }

  pub fn is_finished(&self) -> bool {
    self.state().is_terminal()
  }

  /// Waits until the task ran to completion or was cancelled.
  pub async fn finished(&self) -> TaskState {
    self.shared.finished.cancelled().await;
    self.state()
  }
}

impl fmt::Debug for TaskHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("id", &self.id())
      .field("state", &self.state())
      .field("enqueued_at", &self.enqueued_at())
      .field("scheduled_at", &self.scheduled_at())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pending_task_can_be_cancelled_once() {
    let shared = TaskShared::new(1, 10, CancellationToken::new());
    let handle = TaskHandle::new(shared.clone());
    assert_eq!(handle.state(), TaskState::Pending);
    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(handle.is_cancelled());
    assert!(shared.cancel_token().is_cancelled());
    assert!(!shared.try_start());
  }

  #[test]
  fn running_task_ignores_cancel() {
    let shared = TaskShared::new(2, 0, CancellationToken::new());
    let handle = TaskHandle::new(shared.clone());
    assert!(shared.try_start());
    assert!(!handle.cancel());
    assert_eq!(handle.state(), TaskState::Running);
    shared.complete();
    assert_eq!(handle.state(), TaskState::Done);
    assert!(handle.is_finished());
  }

  #[test]
  fn scheduled_time_defaults_to_enqueue_time() {
    let shared = TaskShared::new(3, 42, CancellationToken::new());
    let handle = TaskHandle::new(shared.clone());
    assert_eq!(handle.scheduled_at(), 42);
    shared.set_scheduled_at(1042);
    assert_eq!(handle.scheduled_at(), 1042);
    assert_eq!(handle.enqueued_at(), 42);
  }

  #[tokio::test]
  async fn finished_resolves_on_either_terminal_state() {
    let done = TaskShared::new(4, 0, CancellationToken::new());
    assert!(done.try_start());
    done.complete();
    assert_eq!(TaskHandle::new(done).finished().await, TaskState::Done);

    let cancelled = TaskHandle::new(TaskShared::new(5, 0, CancellationToken::new()));
    cancelled.cancel();
    assert_eq!(cancelled.finished().await, TaskState::Cancelled);
  }
}
