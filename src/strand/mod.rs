// src/strand/mod.rs

//! The strand abstraction: one join/liveness/sleep surface over OS
//! threads and fibers.
//!
//! A strand is anything schedulable that terminates with a value or a
//! cause. [`FiberHandle`] is the fiber side; [`ThreadStrand`] wraps a
//! `std::thread::JoinHandle`. Joining re-raises a failed strand's cause
//! (unwrap it with [`Cause::root`]); the collection join spends one
//! deadline budget across all strands in order.

use crate::error::{Cause, JoinError};
use crate::fiber::FiberHandle;
use parking_lot::Mutex;
use std::fmt;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// An abstract schedulable entity: an OS thread or a fiber.
pub trait Strand {
  type Output;

  /// The strand's name, if it has one.
  fn name(&self) -> Option<String>;

  /// `true` until the strand has terminated.
  fn is_alive(&self) -> bool;

  /// Parks the caller until the strand terminates; returns its value or
  /// re-raises its cause.
  fn join(self) -> Result<Self::Output, JoinError>
  where
    Self: Sized;

  /// Like `join`, bounded by an absolute deadline. The strand keeps
  /// running on timeout.
  fn join_deadline(&self, deadline: Instant) -> Result<Self::Output, JoinError>;

  /// Like `join`, bounded by a duration from now.
  fn join_timeout(&self, timeout: Duration) -> Result<Self::Output, JoinError> {
    self.join_deadline(Instant::now() + timeout)
  }
}

impl<T> Strand for FiberHandle<T> {
  type Output = T;

  fn name(&self) -> Option<String> {
    self.fiber().name().map(str::to_string)
  }

  fn is_alive(&self) -> bool {
    self.fiber().is_alive()
  }

  fn join(self) -> Result<T, JoinError> {
    FiberHandle::join(self)
  }

  fn join_deadline(&self, deadline: Instant) -> Result<T, JoinError> {
    FiberHandle::join_deadline(self, deadline)
  }
}

/// An OS thread as a strand. Liveness and join delegate to the underlying
/// handle; a thread's terminal result is its closure's return value, and
/// a panicking thread joins as a failure cause.
pub struct ThreadStrand<T> {
  handle: Mutex<Option<JoinHandle<T>>>,
  name: Option<String>,
}

impl<T> fmt::Debug for ThreadStrand<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadStrand")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}

impl<T> From<JoinHandle<T>> for ThreadStrand<T> {
  fn from(handle: JoinHandle<T>) -> Self {
    let name = handle.thread().name().map(str::to_string);
    ThreadStrand {
      handle: Mutex::new(Some(handle)),
      name,
    }
  }
}

impl<T> ThreadStrand<T> {
  /// Spawns a thread and wraps it as a strand.
  pub fn spawn<F>(f: F) -> ThreadStrand<T>
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    std::thread::spawn(f).into()
  }

  /// Spawns a named thread and wraps it as a strand.
  pub fn spawn_named<F>(name: impl Into<String>, f: F) -> std::io::Result<ThreadStrand<T>>
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    Ok(
      std::thread::Builder::new()
        .name(name.into())
        .spawn(f)?
        .into(),
    )
  }

  fn take_finished(&self) -> Result<T, JoinError> {
    let handle = self.handle.lock().take();
    match handle {
      Some(handle) => handle
        .join()
        .map_err(|payload| JoinError::Failed(Cause::from_panic(payload))),
      None => Err(JoinError::Failed(Cause::msg("thread result already taken"))),
    }
  }
}

impl<T> Strand for ThreadStrand<T> {
  type Output = T;

  fn name(&self) -> Option<String> {
    self.name.clone()
  }

  fn is_alive(&self) -> bool {
    self
      .handle
      .lock()
      .as_ref()
      .map_or(false, |h| !h.is_finished())
  }

  fn join(self) -> Result<T, JoinError> {
    self.take_finished()
  }

  fn join_deadline(&self, deadline: Instant) -> Result<T, JoinError> {
    // `std` offers no timed thread join; poll `is_finished` in short
    // park steps bounded by the deadline.
    loop {
      {
        let guard = self.handle.lock();
        match guard.as_ref() {
          None => {
            return Err(JoinError::Failed(Cause::msg("thread result already taken")));
          }
          Some(handle) if handle.is_finished() => {}
          Some(_) => {
            let now = Instant::now();
            if now >= deadline {
              return Err(JoinError::Timeout);
            }
            drop(guard);
            std::thread::park_timeout(POLL_STEP.min(deadline.saturating_duration_since(now)));
            continue;
          }
        }
      }
      return self.take_finished();
    }
  }
}

const POLL_STEP: Duration = Duration::from_millis(1);

/// Blocking sleep for the calling OS thread. Fibers use
/// [`crate::fiber::sleep`] instead, which parks the fiber, not its worker.
pub fn sleep(dur: Duration) {
  std::thread::sleep(dur);
}

/// Identity of the strand executing the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StrandId {
  /// A fiber, by scheduler-assigned id.
  Fiber(u64),
  /// A plain OS thread.
  Thread(std::thread::ThreadId),
}

/// The identity of the current strand: the running fiber if the caller is
/// one, otherwise the OS thread.
pub fn current() -> StrandId {
  match crate::fiber::current() {
    Some(fiber) => StrandId::Fiber(fiber.id()),
    None => StrandId::Thread(std::thread::current().id()),
  }
}

/// Joins every strand in order under one total deadline. The budget is
/// decremented by the time each join actually takes; exhausting it raises
/// [`JoinError::Timeout`]. Results of strands joined before the timeout
/// are discarded with the error.
pub fn join_all<S: Strand>(strands: Vec<S>, timeout: Duration) -> Result<Vec<S::Output>, JoinError> {
  let deadline = Instant::now() + timeout;
  let mut results = Vec::with_capacity(strands.len());
  for strand in &strands {
    results.push(strand.join_deadline(deadline)?);
  }
  Ok(results)
}
