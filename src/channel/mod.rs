// src/channel/mod.rs

//! A typed FIFO conduit with configurable capacity and overflow semantics.
//!
//! A [`Channel`] is one shared object: every clone of the handle addresses
//! the same channel, and any strand may send or receive on it. Capacity 0
//! makes it a rendezvous channel (send and receive hand off directly),
//! capacity n > 0 a bounded buffer whose full-buffer behavior is chosen by
//! the [`OverflowPolicy`], and [`Capacity::Unbounded`] a buffer limited
//! only by memory.
//!
//! Each parking operation exists in two flavors that interoperate freely:
//! a blocking call that parks the OS thread (`send`, `recv`,
//! `recv_timeout`) and a future that parks the fiber (`send_async`,
//! `recv_async`). A channel closed with a cause re-raises that cause to
//! every subsequent receiver once the buffer is drained.

use crate::error::{
  Cause, RecvError, RecvTimeoutError, SendError, TryRecvError, TrySendError,
};
use crate::fiber::timer::{timeout, Elapsed};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use async_impl::{RecvFuture, SendFuture};
pub use ticker::{TickerConsumer, TickerRecvFuture};
pub use topic::Topic;

mod async_impl;
pub(crate) mod core;
pub mod primitive;
mod sync_impl;
mod ticker;
mod topic;

use self::core::ChannelShared;

/// Buffering mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
  /// No buffer; send and receive rendezvous directly.
  Rendezvous,
  /// A buffer of exactly `n` slots (n > 0).
  Bounded(usize),
  /// A buffer limited only by memory.
  Unbounded,
}

/// What a send does when the channel cannot accept the message right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
  /// Park the producer until space frees up; FIFO among parked producers.
  Block,
  /// Fail the send with [`SendError::Overflow`].
  Throw,
  /// Silently discard the new message.
  Drop,
  /// Evict the oldest buffered message to make room, then append.
  Displace,
}

/// Explicit configuration aggregate for channel creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
  /// Buffering mode; rendezvous by default.
  pub capacity: Capacity,
  /// Full-buffer behavior; `Block` by default.
  pub overflow: OverflowPolicy,
  /// At most one strand sends at a time. Advisory; the invariant that at
  /// most one producer parks is checked in debug builds.
  pub single_producer: bool,
  /// At most one strand receives at a time. Advisory, checked like
  /// `single_producer`.
  pub single_consumer: bool,
}

impl Default for ChannelConfig {
  fn default() -> Self {
    ChannelConfig {
      capacity: Capacity::Rendezvous,
      overflow: OverflowPolicy::Block,
      single_producer: false,
      single_consumer: true,
    }
  }
}

/// A cloneable handle to one shared channel.
pub struct Channel<T> {
  pub(crate) shared: Arc<ChannelShared<T>>,
}

impl<T> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Channel {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> fmt::Debug for Channel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let core = self.shared.core.lock();
    f.debug_struct("Channel")
      .field("config", &self.shared.config)
      .field("len", &core.len())
      .field("closed", &core.is_closed())
      .finish_non_exhaustive()
  }
}

impl<T> Channel<T> {
  /// Creates a channel from an explicit configuration.
  ///
  /// # Panics
  ///
  /// Panics if the configuration names a bounded capacity of 0; use
  /// [`Capacity::Rendezvous`] for hand-off channels.
  pub fn new(config: ChannelConfig) -> Self {
    if let Capacity::Bounded(n) = config.capacity {
      assert!(n > 0, "bounded capacity must be > 0; use Capacity::Rendezvous");
    }
    Channel {
      shared: Arc::new(ChannelShared::new(config)),
    }
  }

  /// A capacity-0 hand-off channel with the default `Block` policy.
  pub fn rendezvous() -> Self {
    Channel::new(ChannelConfig::default())
  }

  /// A bounded channel with the given overflow policy.
  pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
    Channel::new(ChannelConfig {
      capacity: Capacity::Bounded(capacity),
      overflow,
      ..ChannelConfig::default()
    })
  }

  /// An unbounded channel (sends never park).
  pub fn unbounded() -> Self {
    Channel::new(ChannelConfig {
      capacity: Capacity::Unbounded,
      overflow: OverflowPolicy::Block,
      ..ChannelConfig::default()
    })
  }

  /// A ticker channel: bounded with the `Displace` policy, consumed
  /// through independent [`TickerConsumer`]s.
  pub fn ticker(capacity: usize) -> Self {
    Channel::new(ChannelConfig {
      capacity: Capacity::Bounded(capacity),
      overflow: OverflowPolicy::Displace,
      single_consumer: false,
      ..ChannelConfig::default()
    })
  }

  /// `true` if both handles address the same channel.
  pub fn same_channel(&self, other: &Channel<T>) -> bool {
    Arc::ptr_eq(&self.shared, &other.shared)
  }

  /// Sends a message, parking the calling thread if the policy demands it.
  ///
  /// Under the lossy policies (`Drop`, `Displace`) a send on a closed or
  /// full channel succeeds by discarding; under `Block`/`Throw` a closed
  /// channel fails with [`SendError::Closed`].
  pub fn send(&self, item: T) -> Result<(), SendError> {
    sync_impl::send_blocking(&self.shared, item)
  }

  /// Attempts to send without parking. Fails with `Full` on exhausted
  /// capacity under every policy except `Displace`, which always succeeds.
  pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
    self.shared.try_send_inner(item)
  }

  /// Sends a message from a fiber; the returned future parks the fiber
  /// instead of the worker thread.
  pub fn send_async(&self, item: T) -> SendFuture<'_, T> {
    SendFuture::new(self, item)
  }

  /// Receives the oldest message, parking the calling thread while the
  /// channel is empty and open.
  pub fn recv(&self) -> Result<T, RecvError> {
    sync_impl::recv_blocking(&self.shared)
  }

  /// Attempts to receive without parking.
  pub fn try_recv(&self) -> Result<T, TryRecvError> {
    self.shared.try_recv_inner()
  }

  /// Receives with a deadline, parking the calling thread for at most
  /// `timeout`.
  pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
    sync_impl::recv_timeout_blocking(&self.shared, timeout)
  }

  /// Receives a message from a fiber.
  pub fn recv_async(&self) -> RecvFuture<'_, T> {
    RecvFuture::new(self)
  }

  /// Receives from a fiber with a deadline.
  pub async fn recv_timeout_async(&self, dur: Duration) -> Result<T, RecvTimeoutError> {
    match timeout(dur, self.recv_async()).await {
      Ok(result) => result.map_err(RecvTimeoutError::from),
      Err(Elapsed) => Err(RecvTimeoutError::Timeout),
    }
  }

  /// Closes the channel, optionally attaching a cause.
  ///
  /// Parked producers are woken with [`SendError::Closed`]; receivers keep
  /// draining the buffer and then observe the terminal signal (or the
  /// cause). Returns `false` if the channel was already closed.
  pub fn close(&self, cause: Option<Cause>) -> bool {
    self.shared.close_inner(cause)
  }

  /// `true` once [`Channel::close`] has run.
  pub fn is_closed(&self) -> bool {
    self.shared.core.lock().is_closed()
  }

  /// Number of buffered messages. Always 0 for rendezvous channels.
  pub fn len(&self) -> usize {
    self.shared.core.lock().len()
  }

  /// `true` if no messages are buffered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// `true` if a non-displacing send would not find buffer room.
  pub fn is_full(&self) -> bool {
    match self.shared.config.capacity {
      Capacity::Rendezvous => true,
      Capacity::Unbounded => false,
      Capacity::Bounded(n) => self.len() >= n,
    }
  }

  /// The configured capacity.
  pub fn capacity(&self) -> Capacity {
    self.shared.config.capacity
  }

  /// The configured overflow policy.
  pub fn overflow_policy(&self) -> OverflowPolicy {
    self.shared.config.overflow
  }
}
