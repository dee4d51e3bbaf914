mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strand::error::{Cause, JoinError, ObserveError, ObserveTimeoutError};
use strand::strand::{current as current_strand, sleep as strand_sleep};
use strand::{fiber, join_all, Strand, StrandId, ThreadStrand, Val};

#[test]
fn deliver_wins_once() {
  let val = Val::new();
  assert!(!val.is_delivered());
  assert!(val.deliver(1));
  assert!(val.is_delivered());
  // Later attempts are silent no-ops.
  assert!(!val.deliver(2));
  assert!(!val.deliver_failure(Cause::msg("late")));
  assert_eq!(val.observe().unwrap(), 1);
  assert_eq!(val.observe().unwrap(), 1);
}

#[test]
fn observers_park_until_delivery() {
  let val = Val::new();
  let observers: Vec<_> = (0..4)
    .map(|_| {
      let val = val.clone();
      thread::spawn(move || val.observe().unwrap())
    })
    .collect();
  thread::sleep(SHORT_TIMEOUT);
  val.deliver("ready");
  for observer in observers {
    assert_eq!(observer.join().unwrap(), "ready");
  }
}

#[test]
fn failure_cause_reaches_every_observer() {
  let val: Val<i32> = Val::new();
  let observer = {
    let val = val.clone();
    thread::spawn(move || val.observe())
  };
  thread::sleep(Duration::from_millis(10));
  val.deliver_failure(Cause::msg("broken"));
  match observer.join().unwrap() {
    Err(ObserveError::Failed(c)) => assert_eq!(c.to_string(), "broken"),
    other => panic!("expected failure, got {other:?}"),
  }
  assert!(matches!(val.observe(), Err(ObserveError::Failed(_))));
}

#[test]
fn observe_timeout_elapses() {
  let val: Val<i32> = Val::new();
  let start = Instant::now();
  assert!(matches!(
    val.observe_timeout(SHORT_TIMEOUT),
    Err(ObserveTimeoutError::Timeout)
  ));
  assert!(start.elapsed() >= SHORT_TIMEOUT);
  val.deliver(3);
  assert_eq!(val.observe_timeout(SHORT_TIMEOUT).unwrap(), 3);
}

#[test]
fn fiber_observes_val() {
  let val = Val::new();
  let observed = {
    let val = val.clone();
    fiber::spawn(async move { val.observe_async().await.unwrap() })
  };
  thread::sleep(Duration::from_millis(10));
  val.deliver(99);
  assert_eq!(observed.join().unwrap(), 99);
}

#[test]
fn deferred_val_runs_once_on_first_observation() {
  let runs = Arc::new(AtomicUsize::new(0));
  let val = {
    let runs = runs.clone();
    Val::deferred(move || {
      runs.fetch_add(1, Ordering::SeqCst);
      123
    })
  };
  assert!(!val.is_delivered());
  assert_eq!(runs.load(Ordering::SeqCst), 0);
  let observers: Vec<_> = (0..3)
    .map(|_| {
      let val = val.clone();
      thread::spawn(move || val.observe().unwrap())
    })
    .collect();
  for observer in observers {
    assert_eq!(observer.join().unwrap(), 123);
  }
  assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn deferred_panic_becomes_failure_cause() {
  let val: Val<i32> = Val::deferred(|| panic!("thunk failed"));
  match val.observe() {
    Err(ObserveError::Failed(c)) => assert!(c.to_string().contains("thunk failed")),
    other => panic!("expected failure, got {other:?}"),
  }
}

#[test]
fn thread_strand_joins_with_value() {
  let strand = ThreadStrand::spawn(|| 5 * 5);
  assert_eq!(strand.join().unwrap(), 25);
}

#[test]
fn thread_strand_liveness_and_name() {
  let strand = ThreadStrand::spawn_named("lively", || {
    thread::sleep(SHORT_TIMEOUT);
    ()
  })
  .unwrap();
  assert_eq!(strand.name().as_deref(), Some("lively"));
  assert!(strand.is_alive());
  strand.join().unwrap();
}

#[test]
fn thread_panic_joins_as_cause() {
  let strand: ThreadStrand<()> = ThreadStrand::spawn(|| panic!("thread died"));
  match strand.join() {
    Err(JoinError::Failed(c)) => assert!(c.to_string().contains("thread died")),
    other => panic!("expected failure, got {other:?}"),
  }
}

#[test]
fn thread_strand_join_deadline() {
  let strand = ThreadStrand::spawn(|| {
    thread::sleep(Duration::from_millis(200));
    1
  });
  assert!(matches!(
    strand.join_timeout(Duration::from_millis(30)),
    Err(JoinError::Timeout)
  ));
  assert_eq!(strand.join_timeout(LONG_TIMEOUT).unwrap(), 1);
}

#[test]
fn join_all_shares_one_deadline_budget() {
  let quick_a = fiber::spawn(async {
    fiber::sleep(Duration::from_millis(100)).await.unwrap();
  });
  let quick_b = fiber::spawn(async {
    fiber::sleep(Duration::from_millis(100)).await.unwrap();
  });
  let slow = fiber::spawn(async {
    fiber::sleep(Duration::from_millis(500)).await.unwrap();
  });
  let started = Instant::now();
  let outcome = join_all(vec![quick_a, quick_b, slow], Duration::from_millis(300));
  assert!(matches!(outcome, Err(JoinError::Timeout)));
  // The budget covered the quick strands and ran out on the slow one.
  assert!(started.elapsed() >= Duration::from_millis(300));
  assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn join_all_returns_every_value_in_order() {
  let strands: Vec<_> = (0..4)
    .map(|i| fiber::spawn(async move { i * 10 }))
    .collect();
  let values = join_all(strands, LONG_TIMEOUT).unwrap();
  assert_eq!(values, vec![0, 10, 20, 30]);
}

#[test]
fn strand_identity_distinguishes_threads_and_fibers() {
  assert!(matches!(current_strand(), StrandId::Thread(_)));
  let handle = fiber::spawn(async { current_strand() });
  assert!(matches!(handle.join().unwrap(), StrandId::Fiber(_)));
}

#[test]
fn sleep_blocks_the_calling_thread() {
  let start = Instant::now();
  strand_sleep(Duration::from_millis(30));
  assert!(start.elapsed() >= Duration::from_millis(30));
}
