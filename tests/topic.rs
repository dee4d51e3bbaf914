mod common;
use common::*;

use std::thread;
use strand::error::TopicSendError;
use strand::{Channel, OverflowPolicy, Topic};

#[test]
fn send_reaches_every_subscriber() {
  let topic = Topic::new();
  let a = Channel::unbounded();
  let b = Channel::unbounded();
  topic.subscribe(&a);
  topic.subscribe(&b);
  topic.send(1).unwrap();
  topic.send(2).unwrap();
  assert_eq!(a.recv().unwrap(), 1);
  assert_eq!(a.recv().unwrap(), 2);
  assert_eq!(b.recv().unwrap(), 1);
  assert_eq!(b.recv().unwrap(), 2);
}

#[test]
fn unsubscribed_port_stops_receiving() {
  let topic = Topic::new();
  let a = Channel::unbounded();
  let b = Channel::unbounded();
  topic.subscribe(&a);
  topic.subscribe(&b);
  topic.send(1).unwrap();
  assert!(topic.unsubscribe(&b));
  assert!(!topic.unsubscribe(&b));
  topic.send(2).unwrap();
  assert_eq!(a.recv().unwrap(), 1);
  assert_eq!(a.recv().unwrap(), 2);
  assert_eq!(b.recv().unwrap(), 1);
  assert_eq!(b.len(), 0);
}

#[test]
fn duplicate_subscription_is_ignored() {
  let topic = Topic::new();
  let a = Channel::unbounded();
  topic.subscribe(&a);
  topic.subscribe(&a);
  assert_eq!(topic.subscriber_count(), 1);
  topic.send(1).unwrap();
  assert_eq!(a.recv().unwrap(), 1);
  assert_eq!(a.len(), 0);
}

#[test]
fn empty_topic_accepts_and_discards() {
  let topic: Topic<i32> = Topic::new();
  assert_eq!(topic.send(1), Ok(()));
}

#[test]
fn one_failing_subscriber_does_not_block_the_rest() {
  let topic = Topic::new();
  let healthy = Channel::unbounded();
  let closed = Channel::unbounded();
  closed.close(None);
  topic.subscribe(&closed);
  topic.subscribe(&healthy);
  topic.send(5).unwrap();
  assert_eq!(healthy.recv().unwrap(), 5);
}

#[test]
fn all_subscribers_failing_surfaces_error() {
  let topic = Topic::new();
  let a = Channel::<i32>::unbounded();
  let b = Channel::<i32>::unbounded();
  a.close(None);
  b.close(None);
  topic.subscribe(&a);
  topic.subscribe(&b);
  assert_eq!(topic.send(1), Err(TopicSendError::AllFailed));
}

#[test]
fn delivery_honors_each_subscribers_policy() {
  let topic = Topic::new();
  let lossy = Channel::bounded(1, OverflowPolicy::Drop);
  let roomy = Channel::unbounded();
  topic.subscribe(&lossy);
  topic.subscribe(&roomy);
  topic.send(1).unwrap();
  topic.send(2).unwrap();
  // The lossy subscriber dropped the overflowing message; the roomy one
  // kept both.
  assert_eq!(lossy.recv().unwrap(), 1);
  assert_eq!(lossy.len(), 0);
  assert_eq!(roomy.recv().unwrap(), 1);
  assert_eq!(roomy.recv().unwrap(), 2);
}

#[test]
fn blocking_subscriber_parks_the_topic_send() {
  let topic = Topic::new();
  let tight = Channel::bounded(1, OverflowPolicy::Block);
  topic.subscribe(&tight);
  topic.send(1).unwrap();
  let publisher = thread::spawn(move || {
    topic.send(2).unwrap();
    topic
  });
  thread::sleep(SHORT_TIMEOUT);
  assert!(!publisher.is_finished(), "topic send should park on the full subscriber");
  assert_eq!(tight.recv().unwrap(), 1);
  let topic = publisher.join().unwrap();
  assert_eq!(tight.recv().unwrap(), 2);
  drop(topic);
}

#[test]
fn close_forwards_to_subscribers() {
  let topic = Topic::new();
  let a = Channel::<i32>::unbounded();
  topic.subscribe(&a);
  topic.close(None);
  assert!(topic.is_closed());
  assert!(a.is_closed());
  assert_eq!(topic.send(1), Err(TopicSendError::Closed));
}

#[test]
fn snapshot_excludes_later_subscribers() {
  let topic = Topic::new();
  let early = Channel::unbounded();
  topic.subscribe(&early);
  topic.send(1).unwrap();
  let late = Channel::unbounded();
  topic.subscribe(&late);
  topic.send(2).unwrap();
  assert_eq!(early.len(), 2);
  assert_eq!(late.len(), 1);
  assert_eq!(late.recv().unwrap(), 2);
}

#[tokio::test]
async fn async_send_awaits_each_subscriber() {
  let topic = Topic::new();
  let a = Channel::unbounded();
  topic.subscribe(&a);
  topic.send_async(10).await.unwrap();
  assert_eq!(a.recv_async().await.unwrap(), 10);
}
