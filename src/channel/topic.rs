// src/channel/topic.rs

//! Fan-out of one send onto a set of subscribed send ports.
//!
//! The subscriber set is copy-on-write: `send` grabs the current snapshot
//! without holding any lock while delivering, so a subscriber whose
//! overflow policy parks the sender never blocks subscribe/unsubscribe or
//! other topics. Subscribers added after the snapshot was taken see only
//! later sends.

use super::Channel;
use crate::error::{Cause, TopicSendError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A broadcast port: every send is forwarded to the subscribers present at
/// send time, each under its own channel's overflow policy.
pub struct Topic<T> {
  subscribers: RwLock<Arc<Vec<Channel<T>>>>,
  closed: AtomicBool,
}

impl<T> fmt::Debug for Topic<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Topic")
      .field("subscribers", &self.subscribers.read().len())
      .field("closed", &self.closed.load(Ordering::Relaxed))
      .finish()
  }
}

impl<T> Default for Topic<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Topic<T> {
  pub fn new() -> Self {
    Topic {
      subscribers: RwLock::new(Arc::new(Vec::new())),
      closed: AtomicBool::new(false),
    }
  }

  /// Adds a send port. A port may be subscribed once; re-subscribing the
  /// same channel is a no-op.
  pub fn subscribe(&self, port: &Channel<T>) {
    let mut guard = self.subscribers.write();
    if guard.iter().any(|p| p.same_channel(port)) {
      return;
    }
    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(port.clone());
    *guard = Arc::new(next);
  }

  /// Removes a send port; returns `false` if it was not subscribed.
  pub fn unsubscribe(&self, port: &Channel<T>) -> bool {
    let mut guard = self.subscribers.write();
    if !guard.iter().any(|p| p.same_channel(port)) {
      return false;
    }
    let next: Vec<_> = guard
      .iter()
      .filter(|p| !p.same_channel(port))
      .cloned()
      .collect();
    *guard = Arc::new(next);
    true
  }

  /// Number of current subscribers.
  pub fn subscriber_count(&self) -> usize {
    self.subscribers.read().len()
  }

  fn snapshot(&self) -> Arc<Vec<Channel<T>>> {
    Arc::clone(&self.subscribers.read())
  }

  /// Closes the topic and forwards the close to current subscribers.
  pub fn close(&self, cause: Option<Cause>) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    for port in self.snapshot().iter() {
      port.close(cause.clone());
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

impl<T: Clone> Topic<T> {
  /// Delivers `item` to every subscriber in the snapshot taken now.
  ///
  /// One subscriber failing (closed, overflow under `Throw`) does not stop
  /// delivery to the rest; the error surfaces only when every subscriber
  /// failed. An empty topic accepts and discards the message.
  pub fn send(&self, item: T) -> Result<(), TopicSendError> {
    if self.is_closed() {
      return Err(TopicSendError::Closed);
    }
    let ports = self.snapshot();
    if ports.is_empty() {
      return Ok(());
    }
    let mut failures = 0;
    for port in ports.iter() {
      if port.send(item.clone()).is_err() {
        failures += 1;
      }
    }
    if failures == ports.len() {
      Err(TopicSendError::AllFailed)
    } else {
      Ok(())
    }
  }

  /// The fiber flavor of [`Topic::send`]; parks on each subscriber under
  /// that subscriber's policy.
  pub async fn send_async(&self, item: T) -> Result<(), TopicSendError> {
    if self.is_closed() {
      return Err(TopicSendError::Closed);
    }
    let ports = self.snapshot();
    if ports.is_empty() {
      return Ok(());
    }
    let mut failures = 0;
    for port in ports.iter() {
      if port.send_async(item.clone()).await.is_err() {
        failures += 1;
      }
    }
    if failures == ports.len() {
      Err(TopicSendError::AllFailed)
    } else {
      Ok(())
    }
  }
}
