mod common;
use common::*;

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};
use strand::error::{Cause, SelectError};
use strand::{select, select_timeout, try_select, Channel, OverflowPolicy, SelectOp};

fn two_ready_channels() -> (Channel<i32>, Channel<i32>) {
  let a = Channel::bounded(1, OverflowPolicy::Block);
  let b = Channel::bounded(1, OverflowPolicy::Block);
  a.send(1).unwrap();
  b.send(2).unwrap();
  (a, b)
}

#[test]
fn priority_always_picks_first_ready() {
  for _ in 0..100 {
    let (a, b) = two_ready_channels();
    let ops = vec![SelectOp::recv(&a), SelectOp::recv(&b)];
    let selected = select(ops, true).unwrap();
    assert_eq!(selected.index, 0);
    assert_eq!(selected.message, Some(1));
  }
}

#[test]
fn random_choice_covers_both_ready_ops() {
  let mut outcomes = HashSet::new();
  for _ in 0..1000 {
    let (a, b) = two_ready_channels();
    let ops = vec![SelectOp::recv(&a), SelectOp::recv(&b)];
    let selected = select(ops, false).unwrap();
    outcomes.insert(selected.index);
  }
  // Coverage, not a fairness bound.
  assert_eq!(outcomes, HashSet::from([0, 1]));
}

#[test]
fn exactly_one_operation_takes_effect() {
  let (a, b) = two_ready_channels();
  let ops = vec![SelectOp::recv(&a), SelectOp::recv(&b)];
  let selected = select(ops, false).unwrap();
  // The losing channel still holds its message.
  if selected.index == 0 {
    assert_eq!(selected.message, Some(1));
    assert_eq!(b.len(), 1);
    assert_eq!(a.len(), 0);
  } else {
    assert_eq!(selected.message, Some(2));
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 0);
  }
}

#[test]
fn timeout_returns_sentinel_within_bounds() {
  let a = Channel::<u8>::rendezvous();
  let b = Channel::<u8>::rendezvous();
  let start = Instant::now();
  let outcome = select_timeout(
    vec![SelectOp::recv(&a), SelectOp::recv(&b)],
    false,
    Duration::from_millis(50),
  )
  .unwrap();
  let elapsed = start.elapsed();
  assert!(outcome.is_none());
  assert!(elapsed >= Duration::from_millis(50));
  assert!(elapsed < Duration::from_millis(500), "timeout overshot: {elapsed:?}");
  // No partial effects: both channels still accept a hand-off normally.
  assert_eq!(a.len(), 0);
  assert_eq!(b.len(), 0);
}

#[test]
fn parked_select_wakes_on_send() {
  let a = Channel::<i32>::rendezvous();
  let b = Channel::<i32>::rendezvous();
  let tx = b.clone();
  let producer = thread::spawn(move || {
    thread::sleep(SHORT_TIMEOUT);
    tx.send(9).unwrap();
  });
  let selected = select(vec![SelectOp::recv(&a), SelectOp::recv(&b)], false).unwrap();
  assert_eq!(selected.index, 1);
  assert_eq!(selected.message, Some(9));
  producer.join().unwrap();
}

#[test]
fn parked_select_send_completes_against_receiver() {
  let full = Channel::bounded(1, OverflowPolicy::Block);
  full.send(0).unwrap();
  let rx = full.clone();
  let consumer = thread::spawn(move || {
    thread::sleep(SHORT_TIMEOUT);
    (rx.recv().unwrap(), rx.recv().unwrap())
  });
  let selected = select(vec![SelectOp::send(&full, 5)], false).unwrap();
  assert_eq!(selected.index, 0);
  assert_eq!(selected.message, None);
  assert_eq!(consumer.join().unwrap(), (0, 5));
}

#[test]
fn mixed_send_and_recv_descriptors() {
  let empty = Channel::<i32>::rendezvous();
  let roomy = Channel::bounded(1, OverflowPolicy::Block);
  let selected = select(
    vec![SelectOp::recv(&empty), SelectOp::send(&roomy, 3)],
    false,
  )
  .unwrap();
  assert_eq!(selected.index, 1);
  assert_eq!(selected.message, None);
  assert_eq!(roomy.recv().unwrap(), 3);
}

#[test]
fn recv_on_closed_channel_is_ready_with_terminal() {
  let closed = Channel::<i32>::unbounded();
  closed.close(None);
  let open = Channel::<i32>::rendezvous();
  let selected = select(vec![SelectOp::recv(&open), SelectOp::recv(&closed)], false).unwrap();
  assert_eq!(selected.index, 1);
  assert_eq!(selected.message, None);
}

#[test]
fn close_cause_surfaces_through_select() {
  let ch = Channel::<i32>::unbounded();
  ch.close(Some(Cause::msg("torn")));
  match select(vec![SelectOp::recv(&ch)], true) {
    Err(SelectError::Cause(c)) => assert_eq!(c.to_string(), "torn"),
    other => panic!("expected cause, got {other:?}"),
  }
}

#[test]
fn close_wakes_parked_select() {
  let ch = Channel::<i32>::rendezvous();
  let closer = ch.clone();
  let handle = thread::spawn(move || {
    thread::sleep(SHORT_TIMEOUT);
    closer.close(None);
  });
  let selected = select(vec![SelectOp::recv(&ch)], true).unwrap();
  assert_eq!(selected.message, None);
  handle.join().unwrap();
}

#[test]
fn try_select_reports_nothing_ready() {
  let a = Channel::<i32>::rendezvous();
  let b = Channel::<i32>::rendezvous();
  assert!(try_select(vec![SelectOp::recv(&a), SelectOp::recv(&b)], false)
    .unwrap()
    .is_none());

  let (c, _d) = two_ready_channels();
  let selected = try_select(vec![SelectOp::recv(&c)], true).unwrap().unwrap();
  assert_eq!(selected.message, Some(1));
}

#[test]
fn select_send_to_displace_channel_is_always_ready() {
  let ch = Channel::bounded(1, OverflowPolicy::Displace);
  ch.send(1).unwrap();
  let selected = select(vec![SelectOp::send(&ch, 2)], true).unwrap();
  assert_eq!(selected.index, 0);
  assert_eq!(ch.recv().unwrap(), 2);
}

#[tokio::test]
async fn async_select_between_fibers() {
  let a = Channel::<i32>::rendezvous();
  let b = Channel::<i32>::rendezvous();
  let tx = a.clone();
  let producer = tokio::spawn(async move {
    tokio::time::sleep(SHORT_TIMEOUT).await;
    tx.send_async(11).await.unwrap();
  });
  let selected = strand::select::select_async(vec![SelectOp::recv(&a), SelectOp::recv(&b)], false)
    .await
    .unwrap();
  assert_eq!(selected.index, 0);
  assert_eq!(selected.message, Some(11));
  producer.await.unwrap();
}

#[tokio::test]
async fn async_select_timeout() {
  let a = Channel::<i32>::rendezvous();
  let start = Instant::now();
  let outcome = strand::select::select_timeout_async(
    vec![SelectOp::recv(&a)],
    false,
    Duration::from_millis(50),
  )
  .await
  .unwrap();
  assert!(outcome.is_none());
  assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn repeated_select_drains_interleaved_producers() {
  let a = Channel::<usize>::unbounded();
  let b = Channel::<usize>::unbounded();
  let producers: Vec<_> = [a.clone(), b.clone()]
    .into_iter()
    .map(|ch| {
      thread::spawn(move || {
        for i in 0..ITEMS_LOW {
          ch.send(i).unwrap();
        }
        ch.close(None);
      })
    })
    .collect();

  let mut open = 2;
  let mut received = 0;
  let mut closed_channels = HashSet::new();
  while open > 0 {
    let selected = select(vec![SelectOp::recv(&a), SelectOp::recv(&b)], false).unwrap();
    match selected.message {
      Some(_) => received += 1,
      None => {
        if closed_channels.insert(selected.index) {
          open -= 1;
        }
      }
    }
  }
  assert_eq!(received, 2 * ITEMS_LOW);
  for producer in producers {
    producer.join().unwrap();
  }
}
