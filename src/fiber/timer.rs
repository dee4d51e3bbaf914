// src/fiber/timer.rs

//! The process-global timer: a min-heap of deadlines driven by one
//! dedicated thread. Sleeps, timed receives, timed observes and select
//! deadlines all register here; the thread pops expired entries and fires
//! their wakers.

use crate::error::Interrupted;
use crate::fiber;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct TimerEntry {
  deadline: Instant,
  generation: u64,
  cancelled: Arc<AtomicBool>,
  waker: Waker,
}

impl PartialEq for TimerEntry {
  fn eq(&self, other: &Self) -> bool {
    self.generation == other.generation
  }
}
impl Eq for TimerEntry {}

impl Ord for TimerEntry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    // Reverse ordering for a min-heap: earliest deadline first, insertion
    // order as the tie-break.
    other
      .deadline
      .cmp(&self.deadline)
      .then_with(|| other.generation.cmp(&self.generation))
  }
}

impl PartialOrd for TimerEntry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

/// Handle to one registered deadline. Cancellation flips a flag shared
/// with the heap entry, so it needs no bookkeeping outside the entry
/// itself: the entry frees its slot (fired or not) when its deadline
/// pops.
#[derive(Debug)]
pub(crate) struct TimerKey {
  cancelled: Arc<AtomicBool>,
}

impl TimerKey {
  /// Prevents the entry from firing; its heap slot expires silently.
  pub(crate) fn cancel(self) {
    self.cancelled.store(true, Ordering::Release);
  }
}

struct TimerState {
  heap: BinaryHeap<TimerEntry>,
  next_generation: u64,
}

pub(crate) struct Timer {
  state: Mutex<TimerState>,
  cond: Condvar,
}

static GLOBAL_TIMER: Lazy<&'static Timer> = Lazy::new(|| {
  let timer: &'static Timer = Box::leak(Box::new(Timer {
    state: Mutex::new(TimerState {
      heap: BinaryHeap::new(),
      next_generation: 0,
    }),
    cond: Condvar::new(),
  }));
  std::thread::Builder::new()
    .name("strand-timer".to_string())
    .spawn(move || timer.run())
    .expect("failed to spawn the timer thread");
  log::debug!("timer thread started");
  timer
});

impl Timer {
  pub(crate) fn global() -> &'static Timer {
    *GLOBAL_TIMER
  }

  /// Registers a wake at `deadline`; the key cancels it.
  pub(crate) fn register(&self, deadline: Instant, waker: Waker) -> TimerKey {
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut state = self.state.lock();
    let generation = state.next_generation;
    state.next_generation += 1;
    let earliest = state.heap.peek().map(|e| e.deadline);
    state.heap.push(TimerEntry {
      deadline,
      generation,
      cancelled: Arc::clone(&cancelled),
      waker,
    });
    // Only a new earliest deadline moves the thread's wake-up forward.
    if earliest.map_or(true, |e| deadline < e) {
      self.cond.notify_one();
    }
    TimerKey { cancelled }
  }

  fn run(&self) {
    loop {
      let due = {
        let mut state = self.state.lock();
        let now = Instant::now();
        let mut due = Vec::new();
        while let Some(entry) = state.heap.peek() {
          if entry.deadline > now {
            break;
          }
          let entry = state.heap.pop().expect("peeked entry pops");
          if !entry.cancelled.load(Ordering::Acquire) {
            due.push(entry.waker);
          }
        }
        if due.is_empty() {
          match state.heap.peek().map(|e| e.deadline) {
            Some(deadline) => {
              self.cond.wait_until(&mut state, deadline);
            }
            None => self.cond.wait(&mut state),
          }
        }
        due
      };
      // Wakers run outside the lock; a waker may re-register immediately.
      for waker in due {
        waker.wake();
      }
    }
  }
}

/// Future returned by [`sleep`]; parks the fiber until the deadline.
///
/// Sleep is a suspension point: a pending interrupt on the fiber resolves
/// it early with `Err(Interrupted)`.
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct Sleep {
  deadline: Instant,
  key: Option<TimerKey>,
}

/// Suspends the current fiber for `dur`.
pub fn sleep(dur: Duration) -> Sleep {
  sleep_until(Instant::now() + dur)
}

/// Suspends the current fiber until `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
  Sleep {
    deadline,
    key: None,
  }
}

impl Future for Sleep {
  type Output = Result<(), Interrupted>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    if fiber::interrupt_pending() {
      fiber::consume_interrupt();
      if let Some(key) = self.key.take() {
        key.cancel();
      }
      return Poll::Ready(Err(Interrupted));
    }
    if Instant::now() >= self.deadline {
      // The entry that woke us already left the heap; clearing the key
      // keeps drop from cancelling a gone entry.
      if let Some(key) = self.key.take() {
        key.cancel();
      }
      return Poll::Ready(Ok(()));
    }
    if let Some(key) = self.key.take() {
      key.cancel();
    }
    self.key = Some(Timer::global().register(self.deadline, cx.waker().clone()));
    // The deadline may have passed while registering.
    if Instant::now() >= self.deadline {
      if let Some(key) = self.key.take() {
        key.cancel();
      }
      return Poll::Ready(Ok(()));
    }
    Poll::Pending
  }
}

impl Drop for Sleep {
  fn drop(&mut self) {
    if let Some(key) = self.key.take() {
      key.cancel();
    }
  }
}

/// The deadline elapsed before the inner future completed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct Elapsed;

/// Bounds `fut` by a deadline computed once, now.
pub(crate) fn timeout<F: Future>(dur: Duration, fut: F) -> Timeout<F> {
  Timeout {
    fut,
    deadline: Instant::now() + dur,
    key: None,
  }
}

/// Future combinator bounding an operation by an absolute deadline.
#[must_use = "futures do nothing unless you .await or poll them"]
pub(crate) struct Timeout<F> {
  fut: F,
  deadline: Instant,
  key: Option<TimerKey>,
}

impl<F: Future> Future for Timeout<F> {
  type Output = Result<F::Output, Elapsed>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    // Safety: `fut` is structurally pinned; it is never moved out of
    // `this`, and `Timeout::drop` does not move it either.
    let this = unsafe { self.get_unchecked_mut() };
    let fut = unsafe { Pin::new_unchecked(&mut this.fut) };
    if let Poll::Ready(value) = fut.poll(cx) {
      if let Some(key) = this.key.take() {
        key.cancel();
      }
      return Poll::Ready(Ok(value));
    }
    if Instant::now() >= this.deadline {
      if let Some(key) = this.key.take() {
        key.cancel();
      }
      return Poll::Ready(Err(Elapsed));
    }
    if let Some(key) = this.key.take() {
      key.cancel();
    }
    this.key = Some(Timer::global().register(this.deadline, cx.waker().clone()));
    Poll::Pending
  }
}

impl<F> Drop for Timeout<F> {
  fn drop(&mut self) {
    if let Some(key) = self.key.take() {
      key.cancel();
    }
  }
}
