// src/select/token.rs

use crate::async_util::AtomicWaker;
use crate::error::Cause;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::Thread;

/// Token state while the selector is parked and no descriptor has won.
pub(crate) const OPEN: usize = usize::MAX;
/// Claimed by the selector itself when its deadline fired.
pub(crate) const TIMED_OUT: usize = usize::MAX - 1;
/// Claimed by the selector itself when it was interrupted.
pub(crate) const INTERRUPTED: usize = usize::MAX - 2;
/// Claimed by the drop glue of an abandoned select future.
pub(crate) const ABANDONED: usize = usize::MAX - 3;

/// Largest descriptor index a select call may carry.
pub(crate) const MAX_OPS: usize = usize::MAX - 4;

/// The failure recorded by a channel that claimed the token for an
/// operation that cannot complete normally.
#[derive(Debug, Clone)]
pub(crate) enum SelectFailure {
  Closed,
  Cause(Cause),
}

/// The shared state of one select call.
///
/// The `state` word starts [`OPEN`] and is claimed exactly once by a single
/// CAS: either by the first channel whose peer matches one of the select's
/// wait nodes (with the descriptor index), or by the selecting strand
/// itself (with a sentinel). Everything a claimant publishes (the failure
/// here, the received message in the per-call slot) is written under its
/// mutex *around* the CAS, so a reader that observed the claim and then
/// takes the mutex sees the payload.
#[derive(Debug)]
pub(crate) struct SelectToken {
  state: AtomicUsize,
  failure: Mutex<Option<SelectFailure>>,
  waker: AtomicWaker,
  thread: Option<Thread>,
}

impl SelectToken {
  /// A token for a blocking select; `thread` is unparked on claim.
  pub(crate) fn for_thread(thread: Thread) -> Self {
    SelectToken {
      state: AtomicUsize::new(OPEN),
      failure: Mutex::new(None),
      waker: AtomicWaker::new(),
      thread: Some(thread),
    }
  }

  /// A token for an async select; the waker is registered per poll.
  pub(crate) fn for_task() -> Self {
    SelectToken {
      state: AtomicUsize::new(OPEN),
      failure: Mutex::new(None),
      waker: AtomicWaker::new(),
      thread: None,
    }
  }

  #[inline]
  pub(crate) fn state(&self) -> usize {
    self.state.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn is_open(&self) -> bool {
    self.state() == OPEN
  }

  /// Claims the token with a plain outcome (a completed send, or a receive
  /// that observed an uncaused close).
  pub(crate) fn try_claim(&self, value: usize) -> bool {
    self
      .state
      .compare_exchange(OPEN, value, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// Claims the token for descriptor `index` with a failure outcome.
  pub(crate) fn try_claim_failure(&self, index: usize, failure: SelectFailure) -> bool {
    let mut slot = self.failure.lock();
    if self.try_claim(index) {
      *slot = Some(failure);
      true
    } else {
      false
    }
  }

  /// Takes the published failure, if the claimant recorded one.
  pub(crate) fn take_failure(&self) -> Option<SelectFailure> {
    self.failure.lock().take()
  }

  pub(crate) fn register_waker(&self, waker: &std::task::Waker) {
    self.waker.register(waker);
  }

  /// Wakes the selecting strand. Called by the claimant after the CAS.
  pub(crate) fn notify(&self) {
    if let Some(thread) = &self.thread {
      thread.unpark();
    }
    self.waker.wake();
  }
}
