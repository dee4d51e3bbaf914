// src/internal/wake.rs

use std::task::Waker;
use std::thread::Thread;

/// How to resume a parked strand: unpark an OS thread or wake a fiber.
///
/// Every wait queue in the crate (channel waiters, val observers, join
/// waiters, ticker waiters) stores these, so the completing peer never has
/// to care which flavor of strand it is waking.
#[derive(Debug)]
pub(crate) enum WakeHandle {
  Thread(Thread),
  Task(Waker),
}

impl WakeHandle {
  pub(crate) fn current_thread() -> Self {
    WakeHandle::Thread(std::thread::current())
  }

  pub(crate) fn wake(self) {
    match self {
      WakeHandle::Thread(t) => t.unpark(),
      WakeHandle::Task(w) => w.wake(),
    }
  }
}
