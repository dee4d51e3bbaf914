// src/sync_util.rs

use std::thread;
use std::time::Instant;

#[inline(always)]
fn spin_hint() {
  std::hint::spin_loop();
}

/// An adaptive wait strategy that starts with spinning, then yields, then
/// parks the thread until `cond` holds.
///
/// The waker must make `cond` true before unparking; spurious unparks are
/// absorbed by the loop.
pub(crate) fn adaptive_wait<F>(cond: F)
where
  F: Fn() -> bool,
{
  for _ in 0..10 {
    if cond() {
      return;
    }
    spin_hint();
  }

  for _ in 0..20 {
    if cond() {
      return;
    }
    thread::yield_now();
  }

  while !cond() {
    thread::park();
  }
}

/// The deadline-bounded variant of [`adaptive_wait`].
///
/// Returns `true` if `cond` became true, `false` if the deadline elapsed
/// first. The deadline is absolute and re-checked after every wake, so a
/// spurious unpark never shortens the wait.
pub(crate) fn adaptive_wait_deadline<F>(cond: F, deadline: Instant) -> bool
where
  F: Fn() -> bool,
{
  for _ in 0..10 {
    if cond() {
      return true;
    }
    spin_hint();
  }

  loop {
    if cond() {
      return true;
    }
    let now = Instant::now();
    if now >= deadline {
      return cond();
    }
    thread::park_timeout(deadline - now);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[test]
  fn wait_returns_once_condition_holds() {
    let flag = Arc::new(AtomicBool::new(false));
    let waiter = {
      let flag = flag.clone();
      let main = thread::current();
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        main.unpark();
      })
    };
    adaptive_wait(|| flag.load(Ordering::Acquire));
    waiter.join().unwrap();
  }

  #[test]
  fn deadline_wait_times_out() {
    let start = Instant::now();
    let hit = adaptive_wait_deadline(|| false, start + Duration::from_millis(30));
    assert!(!hit);
    assert!(start.elapsed() >= Duration::from_millis(30));
  }
}
