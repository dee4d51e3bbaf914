// src/fiber/task.rs

//! The fiber's task record: its resumable future, wake state, interrupt
//! flag and termination event.

use super::SchedShared;
use crate::error::Cause;
use crate::internal::wake::WakeHandle;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::Wake;

// Fiber lifecycle. Transitions are monotone except the
// runnable <-> running <-> parked cycle; TERMINATED is terminal.
pub(crate) const NEW: u8 = 0;
pub(crate) const RUNNABLE: u8 = 1;
pub(crate) const RUNNING: u8 = 2;
pub(crate) const PARKED: u8 = 3;
pub(crate) const TERMINATED: u8 = 4;

pub(crate) type StoredFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) struct Task {
  pub(crate) id: u64,
  pub(crate) name: Option<String>,
  pub(crate) sched: Weak<SchedShared>,
  /// The fiber's continuation. Checked out by the polling worker; `None`
  /// while running or after termination.
  pub(crate) future: Mutex<Option<StoredFuture>>,
  state: AtomicU8,
  /// Wake edge: set by the first wake after (or during) a poll, cleared
  /// when a worker picks the task up. Guarantees one enqueue per edge.
  notified: AtomicBool,
  /// Set by a worker that popped the task while its future was checked
  /// out; the polling worker re-enqueues after restoring the future.
  missed: AtomicBool,
  /// Edge-triggered interrupt, consumed at the next suspension point.
  interrupted: AtomicBool,
  cause: Mutex<Option<Cause>>,
  join_waiters: Mutex<Vec<WakeHandle>>,
}

impl Task {
  pub(crate) fn new(
    id: u64,
    name: Option<String>,
    sched: Weak<SchedShared>,
    future: StoredFuture,
  ) -> Self {
    Task {
      id,
      name,
      sched,
      future: Mutex::new(Some(future)),
      state: AtomicU8::new(NEW),
      notified: AtomicBool::new(false),
      missed: AtomicBool::new(false),
      interrupted: AtomicBool::new(false),
      cause: Mutex::new(None),
      join_waiters: Mutex::new(Vec::new()),
    }
  }

  #[inline]
  pub(crate) fn state(&self) -> u8 {
    self.state.load(Ordering::Acquire)
  }

  pub(crate) fn set_state(&self, state: u8) {
    self.state.store(state, Ordering::Release);
  }

  #[inline]
  pub(crate) fn is_terminated(&self) -> bool {
    self.state() == TERMINATED
  }

  /// Makes the fiber runnable; no-op if a wake is already pending or the
  /// fiber terminated.
  pub(crate) fn schedule(self: &Arc<Self>) {
    if self.is_terminated() {
      return;
    }
    if self
      .notified
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      if let Some(sched) = self.sched.upgrade() {
        if self.state() != RUNNING {
          self.set_state(RUNNABLE);
        }
        sched.enqueue(Arc::clone(self));
      }
    }
  }

  /// Worker side: clear the wake edge before polling.
  pub(crate) fn clear_notified(&self) {
    self.notified.store(false, Ordering::Release);
  }

  pub(crate) fn mark_missed(&self) {
    self.missed.store(true, Ordering::Release);
  }

  pub(crate) fn take_missed(&self) -> bool {
    self.missed.swap(false, Ordering::AcqRel)
  }

  pub(crate) fn interrupt(self: &Arc<Self>) {
    self.interrupted.store(true, Ordering::Release);
    self.schedule();
  }

  #[inline]
  pub(crate) fn interrupt_flag(&self) -> bool {
    self.interrupted.load(Ordering::Acquire)
  }

  pub(crate) fn clear_interrupt(&self) -> bool {
    self.interrupted.swap(false, Ordering::AcqRel)
  }

  /// Marks the fiber terminated and wakes every joiner.
  pub(crate) fn terminate(&self, cause: Option<Cause>) {
    {
      let mut slot = self.cause.lock();
      if cause.is_some() {
        *slot = cause;
      }
    }
    self.set_state(TERMINATED);
    let waiters = std::mem::take(&mut *self.join_waiters.lock());
    for waiter in waiters {
      waiter.wake();
    }
  }

  pub(crate) fn termination_cause(&self) -> Option<Cause> {
    self.cause.lock().clone()
  }

  /// Registers a joiner. The caller must re-check `is_terminated` after
  /// registering; termination drains this list exactly once.
  pub(crate) fn add_join_waiter(&self, waiter: WakeHandle) {
    self.join_waiters.lock().push(waiter);
  }
}

impl Wake for Task {
  fn wake(self: Arc<Self>) {
    self.schedule();
  }

  fn wake_by_ref(self: &Arc<Self>) {
    self.schedule();
  }
}

thread_local! {
  static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// Scoped marker for "this worker thread is polling this fiber".
pub(crate) struct CurrentTaskGuard {
  previous: Option<Arc<Task>>,
}

impl CurrentTaskGuard {
  pub(crate) fn enter(task: Arc<Task>) -> Self {
    let previous = CURRENT_TASK.with(|cell| cell.borrow_mut().replace(task));
    CurrentTaskGuard { previous }
  }
}

impl Drop for CurrentTaskGuard {
  fn drop(&mut self) {
    CURRENT_TASK.with(|cell| {
      *cell.borrow_mut() = self.previous.take();
    });
  }
}

pub(crate) fn current_task() -> Option<Arc<Task>> {
  CURRENT_TASK.with(|cell| cell.borrow().clone())
}

/// Whether the current fiber has a pending interrupt. Always false on a
/// plain OS thread.
pub(crate) fn interrupt_pending() -> bool {
  current_task().map_or(false, |t| t.interrupt_flag())
}

/// Consumes the current fiber's interrupt edge.
pub(crate) fn consume_interrupt() -> bool {
  current_task().map_or(false, |t| t.clear_interrupt())
}
