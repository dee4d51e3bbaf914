mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strand::error::{Cause, RecvError, RecvTimeoutError, SendError, TryRecvError, TrySendError};
use strand::{Capacity, Channel, ChannelConfig, OverflowPolicy};

#[test]
fn rendezvous_hand_off() {
  let ch = Channel::rendezvous();
  let tx = ch.clone();
  let producer = thread::spawn(move || {
    tx.send("x").unwrap();
  });
  assert_eq!(ch.recv().unwrap(), "x");
  producer.join().unwrap();
}

#[test]
fn rendezvous_buffer_stays_empty() {
  let ch = Channel::rendezvous();
  let tx = ch.clone();
  let producer = thread::spawn(move || {
    for i in 0..ITEMS_LOW {
      tx.send(i).unwrap();
    }
  });
  for i in 0..ITEMS_LOW {
    assert_eq!(ch.len(), 0);
    assert_eq!(ch.recv().unwrap(), i);
  }
  assert_eq!(ch.len(), 0);
  producer.join().unwrap();
}

#[test]
fn rendezvous_try_send_without_consumer_fails() {
  let ch = Channel::rendezvous();
  assert!(matches!(ch.try_send(1), Err(TrySendError::Full(1))));
}

#[test]
fn displace_overflow_keeps_newest() {
  let ch = Channel::bounded(2, OverflowPolicy::Displace);
  ch.send(1).unwrap();
  ch.send(2).unwrap();
  ch.send(3).unwrap();
  assert_eq!(ch.recv().unwrap(), 2);
  assert_eq!(ch.recv().unwrap(), 3);
  assert!(matches!(ch.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn throw_overflow_errors() {
  let ch = Channel::bounded(1, OverflowPolicy::Throw);
  ch.send(1).unwrap();
  assert_eq!(ch.send(2), Err(SendError::Overflow));
  assert_eq!(ch.recv().unwrap(), 1);
}

#[test]
fn drop_overflow_discards_newest() {
  let ch = Channel::bounded(1, OverflowPolicy::Drop);
  ch.send(1).unwrap();
  ch.send(2).unwrap();
  assert_eq!(ch.recv().unwrap(), 1);
  assert!(matches!(ch.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn try_send_respects_policies() {
  let blocked = Channel::bounded(1, OverflowPolicy::Block);
  blocked.send(1).unwrap();
  assert!(matches!(blocked.try_send(2), Err(TrySendError::Full(2))));

  let dropping = Channel::bounded(1, OverflowPolicy::Drop);
  dropping.send(1).unwrap();
  assert!(matches!(dropping.try_send(2), Err(TrySendError::Full(2))));

  // Displace always accepts by evicting the oldest.
  let displacing = Channel::bounded(1, OverflowPolicy::Displace);
  displacing.send(1).unwrap();
  displacing.try_send(2).unwrap();
  assert_eq!(displacing.recv().unwrap(), 2);
}

#[test]
fn block_policy_parks_producer_until_space() {
  let ch = Channel::bounded(1, OverflowPolicy::Block);
  ch.send(1).unwrap();
  let tx = ch.clone();
  let parked = Arc::new(AtomicUsize::new(0));
  let parked_clone = parked.clone();
  let producer = thread::spawn(move || {
    parked_clone.store(1, Ordering::Release);
    tx.send(2).unwrap();
    parked_clone.store(2, Ordering::Release);
  });
  while parked.load(Ordering::Acquire) == 0 {
    thread::yield_now();
  }
  thread::sleep(SHORT_TIMEOUT);
  assert_eq!(parked.load(Ordering::Acquire), 1, "producer should be parked on a full buffer");
  assert_eq!(ch.recv().unwrap(), 1);
  producer.join().unwrap();
  assert_eq!(parked.load(Ordering::Acquire), 2);
  assert_eq!(ch.recv().unwrap(), 2);
}

#[test]
fn parked_producers_complete_in_fifo_order() {
  let ch = Channel::new(ChannelConfig {
    capacity: Capacity::Bounded(1),
    overflow: OverflowPolicy::Block,
    single_producer: false,
    single_consumer: true,
  });
  ch.send(0).unwrap();
  let mut producers = Vec::new();
  for i in 1..=3 {
    let tx = ch.clone();
    producers.push(thread::spawn(move || {
      tx.send(i).unwrap();
    }));
    // Give each producer time to park so their queue order is their
    // spawn order.
    thread::sleep(Duration::from_millis(20));
  }
  let mut seen = Vec::new();
  for _ in 0..4 {
    seen.push(ch.recv().unwrap());
  }
  assert_eq!(seen, vec![0, 1, 2, 3]);
  for producer in producers {
    producer.join().unwrap();
  }
}

#[test]
fn per_producer_order_is_preserved() {
  let ch = Channel::new(ChannelConfig {
    capacity: Capacity::Unbounded,
    overflow: OverflowPolicy::Block,
    single_producer: false,
    single_consumer: true,
  });
  let producers: Vec<_> = (0..4)
    .map(|p| {
      let tx = ch.clone();
      thread::spawn(move || {
        for i in 0..ITEMS_HIGH {
          tx.send((p, i)).unwrap();
        }
      })
    })
    .collect();

  let mut last_seen = [None::<usize>; 4];
  for _ in 0..4 * ITEMS_HIGH {
    let (p, i) = ch.recv().unwrap();
    if let Some(prev) = last_seen[p] {
      assert!(i > prev, "producer {p} reordered: {i} after {prev}");
    }
    last_seen[p] = Some(i);
  }
  for producer in producers {
    producer.join().unwrap();
  }
}

#[test]
fn close_terminal_signal_without_cause() {
  let ch = Channel::unbounded();
  ch.send(1).unwrap();
  assert!(ch.close(None));
  assert!(!ch.close(None));
  // The buffer drains before the terminal signal.
  assert_eq!(ch.recv().unwrap(), 1);
  assert!(matches!(ch.recv(), Err(RecvError::Closed)));
  assert!(matches!(ch.recv(), Err(RecvError::Closed)));
}

#[test]
fn close_with_cause_raises_cause() {
  let ch: Channel<i32> = Channel::rendezvous();
  let rx = ch.clone();
  let pending = thread::spawn(move || rx.recv());
  thread::sleep(SHORT_TIMEOUT);
  ch.close(Some(Cause::msg("boom")));

  // The parked receiver observes the cause...
  let err = pending.join().unwrap().unwrap_err();
  match err {
    RecvError::Cause(c) => assert_eq!(c.to_string(), "boom"),
    other => panic!("expected cause, got {other:?}"),
  }
  // ...and so does every receive after it.
  match ch.recv() {
    Err(RecvError::Cause(c)) => assert_eq!(c.to_string(), "boom"),
    other => panic!("expected cause, got {other:?}"),
  }
}

#[test]
fn close_wakes_parked_producers() {
  let ch = Channel::bounded(1, OverflowPolicy::Block);
  ch.send(1).unwrap();
  let tx = ch.clone();
  let producer = thread::spawn(move || tx.send(2));
  thread::sleep(SHORT_TIMEOUT);
  ch.close(None);
  assert_eq!(producer.join().unwrap(), Err(SendError::Closed));
}

#[test]
fn send_on_closed_channel_follows_policy() {
  let blocked = Channel::bounded(1, OverflowPolicy::Block);
  blocked.close(None);
  assert_eq!(blocked.send(1), Err(SendError::Closed));
  assert!(matches!(blocked.try_send(1), Err(TrySendError::Closed(1))));

  // Lossy policies discard silently.
  let dropping = Channel::bounded(1, OverflowPolicy::Drop);
  dropping.close(None);
  assert_eq!(dropping.send(1), Ok(()));
}

#[test]
fn recv_timeout_elapses_then_delivers() {
  let ch: Channel<u32> = Channel::rendezvous();
  let start = Instant::now();
  assert!(matches!(
    ch.recv_timeout(SHORT_TIMEOUT),
    Err(RecvTimeoutError::Timeout)
  ));
  assert!(start.elapsed() >= SHORT_TIMEOUT);

  let tx = ch.clone();
  let producer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(10));
    tx.send(7).unwrap();
  });
  assert_eq!(ch.recv_timeout(LONG_TIMEOUT).unwrap(), 7);
  producer.join().unwrap();
}

#[test]
fn unbounded_never_parks_producers() {
  let ch = Channel::unbounded();
  for i in 0..ITEMS_HIGH {
    ch.send(i).unwrap();
  }
  assert_eq!(ch.len(), ITEMS_HIGH);
  for i in 0..ITEMS_HIGH {
    assert_eq!(ch.recv().unwrap(), i);
  }
}

#[test]
fn dropped_channel_drops_buffered_items() {
  struct DropCounter(Arc<AtomicUsize>);
  impl Drop for DropCounter {
    fn drop(&mut self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  let drops = Arc::new(AtomicUsize::new(0));
  let ch = Channel::unbounded();
  ch.send(DropCounter(drops.clone())).unwrap();
  ch.send(DropCounter(drops.clone())).unwrap();
  drop(ch);
  assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn mpmc_stress_delivers_every_item() {
  let ch = Channel::new(ChannelConfig {
    capacity: Capacity::Bounded(8),
    overflow: OverflowPolicy::Block,
    single_producer: false,
    single_consumer: false,
  });
  let num_producers = 4;
  let num_consumers = 4;
  let per_producer = ITEMS_HIGH;
  let sum = Arc::new(AtomicUsize::new(0));

  let producers: Vec<_> = (0..num_producers)
    .map(|_| {
      let tx = ch.clone();
      thread::spawn(move || {
        for i in 1..=per_producer {
          tx.send(i).unwrap();
        }
      })
    })
    .collect();
  let consumers: Vec<_> = (0..num_consumers)
    .map(|_| {
      let rx = ch.clone();
      let sum = sum.clone();
      thread::spawn(move || {
        while let Ok(v) = rx.recv() {
          sum.fetch_add(v, Ordering::Relaxed);
        }
      })
    })
    .collect();

  for producer in producers {
    producer.join().unwrap();
  }
  ch.close(None);
  for consumer in consumers {
    consumer.join().unwrap();
  }
  let expected = num_producers * (per_producer * (per_producer + 1) / 2);
  assert_eq!(sum.load(Ordering::Relaxed), expected);
}
