// src/val.rs

//! The single-assignment dataflow cell.
//!
//! A [`Val`] starts undelivered; the first `deliver` (or
//! `deliver_failure`) wins and every later attempt is a silent no-op.
//! Observers park — thread or fiber — until delivery and then all see the
//! same value (or the same cause). A deferred val wraps a computation
//! that runs on a fresh fiber of the global scheduler when the val is
//! first observed.

use crate::error::{Cause, ObserveError, ObserveTimeoutError};
use crate::fiber;
use crate::fiber::timer::{timeout, Elapsed};
use crate::internal::wake::WakeHandle;
use crate::sync_util;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

type Thunk<T> = Box<dyn FnOnce() -> T + Send + 'static>;

enum ValState<T> {
  Pending(Vec<WakeHandle>),
  Done(Result<T, Cause>),
}

struct ValShared<T> {
  /// Fast-path flag; the authoritative state is behind the mutex.
  delivered: AtomicBool,
  state: Mutex<ValState<T>>,
  thunk: Mutex<Option<Thunk<T>>>,
  triggered: AtomicBool,
}

/// A single-assignment cell shared by cloning.
pub struct Val<T> {
  shared: Arc<ValShared<T>>,
}

impl<T> Clone for Val<T> {
  fn clone(&self) -> Self {
    Val {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> fmt::Debug for Val<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Val")
      .field("delivered", &self.is_delivered())
      .finish_non_exhaustive()
  }
}

impl<T> Default for Val<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Val<T> {
  /// An undelivered val.
  pub fn new() -> Self {
    Val {
      shared: Arc::new(ValShared {
        delivered: AtomicBool::new(false),
        state: Mutex::new(ValState::Pending(Vec::new())),
        thunk: Mutex::new(None),
        triggered: AtomicBool::new(false),
      }),
    }
  }

  /// `true` once a value or a failure has been delivered.
  pub fn is_delivered(&self) -> bool {
    self.shared.delivered.load(Ordering::Acquire)
  }

  fn complete(&self, outcome: Result<T, Cause>) -> bool {
    let waiters = {
      let mut state = self.shared.state.lock();
      match &mut *state {
        ValState::Done(_) => return false,
        ValState::Pending(waiters) => {
          let waiters = std::mem::take(waiters);
          *state = ValState::Done(outcome);
          self.shared.delivered.store(true, Ordering::Release);
          waiters
        }
      }
    };
    for waiter in waiters {
      waiter.wake();
    }
    true
  }

  /// Delivers the value. Returns `false` — a silent no-op — if the val
  /// was already delivered.
  pub fn deliver(&self, value: T) -> bool {
    self.complete(Ok(value))
  }

  /// Delivers a failure cause instead of a value.
  pub fn deliver_failure(&self, cause: Cause) -> bool {
    self.complete(Err(cause))
  }
}

impl<T: Clone> Val<T> {
  /// A val wrapping a deferred computation, run on a fresh fiber of the
  /// global scheduler at first observation. The computation's value (or
  /// panic cause) becomes the val's content.
  pub fn deferred(thunk: impl FnOnce() -> T + Send + 'static) -> Self
  where
    T: Send + 'static,
  {
    let val = Val::new();
    *val.shared.thunk.lock() = Some(Box::new(thunk));
    val
  }

  fn trigger(&self)
  where
    T: Send + 'static,
  {
    if self.shared.triggered.swap(true, Ordering::AcqRel) {
      return;
    }
    let Some(thunk) = self.shared.thunk.lock().take() else {
      return;
    };
    let val = self.clone();
    fiber::spawn(async move {
      match catch_unwind(AssertUnwindSafe(thunk)) {
        Ok(value) => val.deliver(value),
        Err(payload) => val.deliver_failure(Cause::from_panic(payload)),
      };
    });
  }

  fn read(&self) -> Option<Result<T, Cause>> {
    if !self.is_delivered() {
      return None;
    }
    match &*self.shared.state.lock() {
      ValState::Done(Ok(value)) => Some(Ok(value.clone())),
      ValState::Done(Err(cause)) => Some(Err(cause.clone())),
      ValState::Pending(_) => None,
    }
  }

  /// The delivered content, without parking.
  pub fn try_get(&self) -> Option<Result<T, Cause>> {
    self.read()
  }

  /// Parks the calling thread until delivery, then returns the value or
  /// re-raises the cause.
  pub fn observe(&self) -> Result<T, ObserveError>
  where
    T: Send + 'static,
  {
    self.trigger();
    loop {
      if let Some(outcome) = self.read() {
        return outcome.map_err(ObserveError::Failed);
      }
      {
        let mut state = self.shared.state.lock();
        match &mut *state {
          ValState::Done(_) => continue,
          ValState::Pending(waiters) => waiters.push(WakeHandle::current_thread()),
        }
      }
      sync_util::adaptive_wait(|| self.is_delivered());
    }
  }

  /// Like [`Val::observe`], bounded by a timeout.
  pub fn observe_timeout(&self, dur: Duration) -> Result<T, ObserveTimeoutError>
  where
    T: Send + 'static,
  {
    self.trigger();
    let deadline = std::time::Instant::now() + dur;
    loop {
      if let Some(outcome) = self.read() {
        return outcome.map_err(ObserveTimeoutError::Failed);
      }
      {
        let mut state = self.shared.state.lock();
        match &mut *state {
          ValState::Done(_) => continue,
          ValState::Pending(waiters) => waiters.push(WakeHandle::current_thread()),
        }
      }
      if !sync_util::adaptive_wait_deadline(|| self.is_delivered(), deadline) {
        return Err(ObserveTimeoutError::Timeout);
      }
    }
  }

  /// The fiber flavor of [`Val::observe`].
  pub fn observe_async(&self) -> ObserveFuture<'_, T>
  where
    T: Send + 'static,
  {
    self.trigger();
    ObserveFuture { val: self }
  }

  /// The fiber flavor of [`Val::observe_timeout`].
  pub async fn observe_timeout_async(&self, dur: Duration) -> Result<T, ObserveTimeoutError>
  where
    T: Send + 'static,
  {
    match timeout(dur, self.observe_async()).await {
      Ok(result) => result.map_err(ObserveTimeoutError::from),
      Err(Elapsed) => Err(ObserveTimeoutError::Timeout),
    }
  }
}

/// Future returned by [`Val::observe_async`].
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct ObserveFuture<'a, T> {
  val: &'a Val<T>,
}

impl<'a, T> fmt::Debug for ObserveFuture<'a, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ObserveFuture").field("val", self.val).finish()
  }
}

impl<'a, T: Clone> Future for ObserveFuture<'a, T> {
  type Output = Result<T, ObserveError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    if fiber::interrupt_pending() {
      fiber::consume_interrupt();
      return Poll::Ready(Err(ObserveError::Interrupted));
    }
    loop {
      if let Some(outcome) = self.val.read() {
        return Poll::Ready(outcome.map_err(ObserveError::Failed));
      }
      let mut state = self.val.shared.state.lock();
      match &mut *state {
        ValState::Done(_) => continue,
        ValState::Pending(waiters) => {
          waiters.push(WakeHandle::Task(cx.waker().clone()));
          return Poll::Pending;
        }
      }
    }
  }
}
