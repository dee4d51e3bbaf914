// src/channel/core.rs

//! The shared, mutex-guarded state of a channel.
//!
//! One `ChannelCore` serves every surface of the channel: blocking and
//! async send/receive, ticker consumers, and registered selects. The design
//! principles:
//!
//! 1. **Central mutex**: a `parking_lot::Mutex` guards buffer, wait queues
//!    and the closed flag. Admission order under the mutex is the channel's
//!    ordering across producers.
//! 2. **One wait queue per side**: parked threads, parked fibers and
//!    registered selects share a single FIFO per side, so admission among
//!    parked producers (and consumers) is strictly first-come-first-served
//!    regardless of strand flavor.
//! 3. **Peer-completed transfers**: the active side finishes the parked
//!    side's operation — a sender fills a parked receiver's slot, a
//!    receiver takes a parked sender's item, a closer signals everyone.
//!    Each node is claimed by exactly one CAS; a node whose claim fails
//!    has already been cancelled or completed and is simply dropped.
//! 4. **Wakes fire outside the lock**: operations collect wake sources
//!    under the mutex and fire them after releasing it.

use crate::error::{Cause, TryRecvError, TrySendError};
use crate::internal::wake::WakeHandle;
use crate::select::token::{SelectFailure, SelectToken};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use super::{Capacity, ChannelConfig, OverflowPolicy};

// Wait-node states. WAITING is claimed exactly once, by CAS.
pub(crate) const WAITING: u8 = 0;
/// The peer completed the transfer (slot filled / item taken).
pub(crate) const CLAIMED: u8 = 1;
/// The channel closed under the node.
pub(crate) const CLOSED_SIG: u8 = 2;
/// The parked strand gave up (timeout, interrupt, dropped future).
pub(crate) const CANCELLED: u8 = 3;

/// A parked receiver. Shared (`Arc`) between the parked strand and the
/// channel's wait queue; the item travels through `slot`, never through
/// the buffer, so a rendezvous channel's buffer stays empty.
#[derive(Debug)]
pub(crate) struct RecvNode<T> {
  state: AtomicU8,
  slot: Mutex<Option<T>>,
  wake: Mutex<Option<WakeHandle>>,
}

impl<T> RecvNode<T> {
  pub(crate) fn new(wake: WakeHandle) -> Self {
    RecvNode {
      state: AtomicU8::new(WAITING),
      slot: Mutex::new(None),
      wake: Mutex::new(Some(wake)),
    }
  }

  #[inline]
  pub(crate) fn state(&self) -> u8 {
    self.state.load(Ordering::Acquire)
  }

  /// Peer side: hand `item` to this receiver. Returns the item if the node
  /// was already claimed or cancelled.
  pub(crate) fn try_fill(&self, item: T) -> Result<Option<WakeHandle>, T> {
    let mut slot = self.slot.lock();
    if self
      .state
      .compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      *slot = Some(item);
      drop(slot);
      Ok(self.wake.lock().take())
    } else {
      Err(item)
    }
  }

  /// Peer side: signal close.
  pub(crate) fn try_close(&self) -> Option<WakeHandle> {
    if self
      .state
      .compare_exchange(WAITING, CLOSED_SIG, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.wake.lock().take()
    } else {
      None
    }
  }

  /// Strand side: give up waiting. `false` means a peer claimed first and
  /// the outcome must be honored.
  pub(crate) fn cancel(&self) -> bool {
    self
      .state
      .compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// Strand side: take the delivered item after observing `CLAIMED`.
  pub(crate) fn take_item(&self) -> Option<T> {
    self.slot.lock().take()
  }

  pub(crate) fn set_wake(&self, wake: WakeHandle) {
    *self.wake.lock() = Some(wake);
  }
}

/// A parked sender, holding the item it wants to place. The peer takes the
/// item directly: on a rendezvous match, or when buffer space frees up and
/// the channel promotes parked senders in FIFO order.
#[derive(Debug)]
pub(crate) struct SendNode<T> {
  state: AtomicU8,
  item: Mutex<Option<T>>,
  wake: Mutex<Option<WakeHandle>>,
}

impl<T> SendNode<T> {
  pub(crate) fn new(item: T, wake: WakeHandle) -> Self {
    SendNode {
      state: AtomicU8::new(WAITING),
      item: Mutex::new(Some(item)),
      wake: Mutex::new(Some(wake)),
    }
  }

  #[inline]
  pub(crate) fn state(&self) -> u8 {
    self.state.load(Ordering::Acquire)
  }

  /// Peer side: take the parked item, completing the send.
  pub(crate) fn try_take(&self) -> Option<(T, Option<WakeHandle>)> {
    let mut item = self.item.lock();
    if self
      .state
      .compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      let taken = item.take().expect("waiting sender holds its item");
      drop(item);
      Some((taken, self.wake.lock().take()))
    } else {
      None
    }
  }

  /// Peer side: signal close. The undelivered item is dropped with the node.
  pub(crate) fn try_close(&self) -> Option<WakeHandle> {
    if self
      .state
      .compare_exchange(WAITING, CLOSED_SIG, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.wake.lock().take()
    } else {
      None
    }
  }

  /// Strand side: give up waiting, reclaiming the item if still unsent.
  pub(crate) fn cancel(&self) -> Option<T> {
    if self
      .state
      .compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.item.lock().take()
    } else {
      None
    }
  }

  pub(crate) fn set_wake(&self, wake: WakeHandle) {
    *self.wake.lock() = Some(wake);
  }
}

/// A select receive registered on this channel. Passive: a matching peer
/// claims the token, writes the message into the select call's slot and
/// wakes the selector.
#[derive(Debug)]
pub(crate) struct SelectRecvEntry<T> {
  pub(crate) token: Arc<SelectToken>,
  pub(crate) slot: Arc<Mutex<Option<T>>>,
  pub(crate) index: usize,
}

impl<T> SelectRecvEntry<T> {
  /// Peer side: complete this select's receive with `item`.
  fn try_complete(&self, item: T) -> Result<(), T> {
    let mut slot = self.slot.lock();
    if self.token.try_claim(self.index) {
      *slot = Some(item);
      Ok(())
    } else {
      Err(item)
    }
  }
}

/// A select send registered on this channel, holding the message it would
/// place. A receiver (or freed buffer space) claims the token and takes it.
#[derive(Debug)]
pub(crate) struct SelectSendEntry<T> {
  pub(crate) token: Arc<SelectToken>,
  pub(crate) index: usize,
  pub(crate) item: Option<T>,
}

pub(crate) enum SendWaiter<T> {
  Strand(Arc<SendNode<T>>),
  Select(SelectSendEntry<T>),
}

pub(crate) enum RecvWaiter<T> {
  Strand(Arc<RecvNode<T>>),
  Select(SelectRecvEntry<T>),
}

/// A parked ticker consumer: woken (and its flag set) on every append and
/// on close; it re-reads the buffer itself.
#[derive(Debug)]
pub(crate) struct TickerWaiter {
  pub(crate) fired: Arc<AtomicBool>,
  pub(crate) wake: WakeHandle,
}

/// A wake collected under the channel lock, fired after release.
pub(crate) enum WakeSource {
  Strand(WakeHandle),
  Token(Arc<SelectToken>),
}

impl WakeSource {
  pub(crate) fn fire(self) {
    match self {
      WakeSource::Strand(handle) => handle.wake(),
      WakeSource::Token(token) => token.notify(),
    }
  }
}

pub(crate) fn fire_all(wakes: Vec<WakeSource>) {
  for wake in wakes {
    wake.fire();
  }
}

/// Outcome of committing to park on the consumer side.
pub(crate) enum RecvRegister<T> {
  Parked(Arc<RecvNode<T>>),
  /// State changed under the lock; retry the fast path.
  Retry,
  Closed(Option<Cause>),
}

/// Outcome of committing to park on the producer side.
pub(crate) enum SendRegister<T> {
  Parked(Arc<SendNode<T>>),
  Retry(T),
  Closed(T),
}

/// Outcome of registering one select descriptor.
pub(crate) enum SelectRegister {
  Registered,
  /// The operation is ready right now; the selector should abort this
  /// registration pass and go back to its try phase.
  Ready,
}

pub(crate) struct ChannelCore<T> {
  buffer: VecDeque<(u64, T)>,
  /// Sequence the next appended element will carry.
  next_seq: u64,
  closed: bool,
  cause: Option<Cause>,
  senders: VecDeque<SendWaiter<T>>,
  receivers: VecDeque<RecvWaiter<T>>,
  ticker_waiters: Vec<TickerWaiter>,
}

impl<T> ChannelCore<T> {
  fn new(config: &ChannelConfig) -> Self {
    let reserve = match config.capacity {
      Capacity::Rendezvous => 0,
      Capacity::Bounded(n) => n,
      Capacity::Unbounded => 32,
    };
    ChannelCore {
      buffer: VecDeque::with_capacity(reserve),
      next_seq: 0,
      closed: false,
      cause: None,
      senders: VecDeque::new(),
      receivers: VecDeque::new(),
      ticker_waiters: Vec::new(),
    }
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.buffer.len()
  }

  #[inline]
  pub(crate) fn is_closed(&self) -> bool {
    self.closed
  }

  #[inline]
  pub(crate) fn close_cause(&self) -> Option<Cause> {
    self.cause.clone()
  }

  #[inline]
  pub(crate) fn next_seq(&self) -> u64 {
    self.next_seq
  }

  /// Sequence bounds of the buffered slots: `(oldest, newest)`.
  pub(crate) fn seq_bounds(&self) -> Option<(u64, u64)> {
    self.buffer.front().map(|(oldest, _)| (*oldest, *oldest + self.buffer.len() as u64 - 1))
  }

  pub(crate) fn slot_at(&self, seq: u64) -> Option<&T> {
    let (oldest, newest) = self.seq_bounds()?;
    if seq < oldest || seq > newest {
      return None;
    }
    self.buffer.get((seq - oldest) as usize).map(|(_, v)| v)
  }

  pub(crate) fn register_ticker_waiter(&mut self, waiter: TickerWaiter) {
    self.ticker_waiters.push(waiter);
  }

  fn wake_tickers(&mut self, wakes: &mut Vec<WakeSource>) {
    for waiter in self.ticker_waiters.drain(..) {
      waiter.fired.store(true, Ordering::Release);
      wakes.push(WakeSource::Strand(waiter.wake));
    }
  }

  /// Appends to the buffer, stamping the next sequence.
  fn push_item(&mut self, item: T, wakes: &mut Vec<WakeSource>) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.buffer.push_back((seq, item));
    self.wake_tickers(wakes);
  }

  /// Hands `item` to the first claimable parked receiver, if any.
  fn hand_off(&mut self, mut item: T, wakes: &mut Vec<WakeSource>) -> Result<(), T> {
    while let Some(waiter) = self.receivers.pop_front() {
      match waiter {
        RecvWaiter::Strand(node) => match node.try_fill(item) {
          Ok(wake) => {
            if let Some(w) = wake {
              wakes.push(WakeSource::Strand(w));
            }
            return Ok(());
          }
          Err(back) => item = back,
        },
        RecvWaiter::Select(entry) => match entry.try_complete(item) {
          Ok(()) => {
            wakes.push(WakeSource::Token(entry.token));
            return Ok(());
          }
          Err(back) => item = back,
        },
      }
    }
    Err(item)
  }

  /// The non-parking send path, policy-aware for `Displace` only. Returns
  /// `Full` for the caller to map through the channel's overflow policy.
  pub(crate) fn try_send(
    &mut self,
    config: &ChannelConfig,
    item: T,
    wakes: &mut Vec<WakeSource>,
  ) -> Result<(), TrySendError<T>> {
    if self.closed {
      return Err(TrySendError::Closed(item));
    }

    let mut item = item;
    if self.buffer.is_empty() {
      match self.hand_off(item, wakes) {
        Ok(()) => return Ok(()),
        Err(back) => item = back,
      }
    }

    match config.capacity {
      Capacity::Rendezvous => Err(TrySendError::Full(item)),
      Capacity::Unbounded => {
        self.push_item(item, wakes);
        Ok(())
      }
      Capacity::Bounded(n) => {
        if self.buffer.len() < n {
          self.push_item(item, wakes);
          Ok(())
        } else if config.overflow == OverflowPolicy::Displace {
          // Evict the oldest buffered message to make room.
          self.buffer.pop_front();
          self.push_item(item, wakes);
          Ok(())
        } else {
          Err(TrySendError::Full(item))
        }
      }
    }
  }

  /// The non-parking receive path.
  pub(crate) fn try_recv(
    &mut self,
    config: &ChannelConfig,
    wakes: &mut Vec<WakeSource>,
  ) -> Result<T, TryRecvError> {
    if let Some((_, item)) = self.buffer.pop_front() {
      self.promote_senders(config, wakes);
      return Ok(item);
    }

    // Rendezvous: take directly from a parked sender.
    while let Some(waiter) = self.senders.pop_front() {
      match waiter {
        SendWaiter::Strand(node) => {
          if let Some((item, wake)) = node.try_take() {
            if let Some(w) = wake {
              wakes.push(WakeSource::Strand(w));
            }
            return Ok(item);
          }
        }
        SendWaiter::Select(mut entry) => {
          if entry.token.try_claim(entry.index) {
            let item = entry.item.take().expect("registered select send holds its message");
            wakes.push(WakeSource::Token(entry.token));
            return Ok(item);
          }
          // Token already claimed elsewhere; the entry's message was
          // never sent and drops with it.
        }
      }
    }

    if self.closed {
      return Err(match &self.cause {
        Some(c) => TryRecvError::Cause(c.clone()),
        None => TryRecvError::Closed,
      });
    }
    Err(TryRecvError::Empty)
  }

  /// Moves items from parked senders into freed buffer space, FIFO.
  fn promote_senders(&mut self, config: &ChannelConfig, wakes: &mut Vec<WakeSource>) {
    let cap = match config.capacity {
      Capacity::Bounded(n) => n,
      _ => return,
    };
    while self.buffer.len() < cap {
      let Some(waiter) = self.senders.pop_front() else {
        return;
      };
      match waiter {
        SendWaiter::Strand(node) => {
          if let Some((item, wake)) = node.try_take() {
            self.push_item(item, wakes);
            if let Some(w) = wake {
              wakes.push(WakeSource::Strand(w));
            }
          }
        }
        SendWaiter::Select(mut entry) => {
          if entry.token.try_claim(entry.index) {
            let item = entry.item.take().expect("registered select send holds its message");
            self.push_item(item, wakes);
            wakes.push(WakeSource::Token(entry.token));
          }
        }
      }
    }
  }

  /// Marks the channel closed, waking every parked strand and registered
  /// select with the outcome it will observe.
  pub(crate) fn close(&mut self, cause: Option<Cause>, wakes: &mut Vec<WakeSource>) -> bool {
    if self.closed {
      return false;
    }
    self.closed = true;
    self.cause = cause;

    for waiter in self.senders.drain(..) {
      match waiter {
        SendWaiter::Strand(node) => {
          if let Some(wake) = node.try_close() {
            wakes.push(WakeSource::Strand(wake));
          }
        }
        SendWaiter::Select(entry) => {
          if entry.token.try_claim_failure(entry.index, SelectFailure::Closed) {
            wakes.push(WakeSource::Token(entry.token));
          }
        }
      }
    }

    for waiter in self.receivers.drain(..) {
      match waiter {
        RecvWaiter::Strand(node) => {
          if let Some(wake) = node.try_close() {
            wakes.push(WakeSource::Strand(wake));
          }
        }
        RecvWaiter::Select(entry) => {
          let claimed = match &self.cause {
            Some(c) => entry
              .token
              .try_claim_failure(entry.index, SelectFailure::Cause(c.clone())),
            // Terminal signal: the claim carries no message.
            None => entry.token.try_claim(entry.index),
          };
          if claimed {
            wakes.push(WakeSource::Token(entry.token));
          }
        }
      }
    }

    self.wake_tickers(wakes);
    true
  }

  fn has_waiting_sender(&self) -> bool {
    self.senders.iter().any(|w| match w {
      SendWaiter::Strand(node) => node.state() == WAITING,
      SendWaiter::Select(entry) => entry.token.is_open(),
    })
  }

  fn has_waiting_receiver(&self) -> bool {
    self.receivers.iter().any(|w| match w {
      RecvWaiter::Strand(node) => node.state() == WAITING,
      RecvWaiter::Select(entry) => entry.token.is_open(),
    })
  }

  fn strand_recv_waiters(&self) -> usize {
    self
      .receivers
      .iter()
      .filter(|w| matches!(w, RecvWaiter::Strand(n) if n.state() == WAITING))
      .count()
  }

  fn strand_send_waiters(&self) -> usize {
    self
      .senders
      .iter()
      .filter(|w| matches!(w, SendWaiter::Strand(n) if n.state() == WAITING))
      .count()
  }

  /// Whether a receive could complete without parking.
  fn recv_ready(&self, config: &ChannelConfig) -> bool {
    !self.buffer.is_empty()
      || self.closed
      || (config.capacity == Capacity::Rendezvous && self.has_waiting_sender())
  }

  /// Whether a send could complete without parking (under select rules:
  /// `Throw` parks instead of overflowing).
  fn send_ready(&self, config: &ChannelConfig) -> bool {
    if self.closed {
      return true;
    }
    if self.buffer.is_empty() && self.has_waiting_receiver() {
      return true;
    }
    match config.capacity {
      Capacity::Rendezvous => config.overflow == OverflowPolicy::Drop,
      Capacity::Unbounded => true,
      Capacity::Bounded(n) => {
        self.buffer.len() < n
          || matches!(config.overflow, OverflowPolicy::Displace | OverflowPolicy::Drop)
      }
    }
  }

  /// Commits the consumer side to parking, re-checking state under the lock.
  pub(crate) fn register_recv(
    &mut self,
    config: &ChannelConfig,
    wake: WakeHandle,
  ) -> RecvRegister<T> {
    if !self.buffer.is_empty()
      || (config.capacity == Capacity::Rendezvous && self.has_waiting_sender())
    {
      return RecvRegister::Retry;
    }
    if self.closed {
      return RecvRegister::Closed(self.cause.clone());
    }
    debug_assert!(
      !config.single_consumer || self.strand_recv_waiters() == 0,
      "single-consumer channel with a second parked consumer"
    );
    let node = Arc::new(RecvNode::new(wake));
    self.receivers.push_back(RecvWaiter::Strand(Arc::clone(&node)));
    RecvRegister::Parked(node)
  }

  /// Commits the producer side to parking, re-checking state under the lock.
  pub(crate) fn register_send(
    &mut self,
    config: &ChannelConfig,
    item: T,
    wake: WakeHandle,
  ) -> SendRegister<T> {
    if self.closed {
      return SendRegister::Closed(item);
    }
    let space = match config.capacity {
      Capacity::Rendezvous => false,
      Capacity::Unbounded => true,
      Capacity::Bounded(n) => self.buffer.len() < n,
    };
    if space || (self.buffer.is_empty() && self.has_waiting_receiver()) {
      return SendRegister::Retry(item);
    }
    debug_assert!(
      !config.single_producer || self.strand_send_waiters() == 0,
      "single-producer channel with a second parked producer"
    );
    let node = Arc::new(SendNode::new(item, wake));
    self.senders.push_back(SendWaiter::Strand(Arc::clone(&node)));
    SendRegister::Parked(node)
  }

  /// Registers a select receive, unless the operation is ready right now.
  pub(crate) fn register_select_recv(
    &mut self,
    config: &ChannelConfig,
    token: &Arc<SelectToken>,
    slot: &Arc<Mutex<Option<T>>>,
    index: usize,
  ) -> SelectRegister {
    if self.recv_ready(config) {
      return SelectRegister::Ready;
    }
    self.receivers.push_back(RecvWaiter::Select(SelectRecvEntry {
      token: Arc::clone(token),
      slot: Arc::clone(slot),
      index,
    }));
    SelectRegister::Registered
  }

  /// Registers a select send, unless the operation is ready right now.
  /// On `Ready` the item is handed back.
  pub(crate) fn register_select_send(
    &mut self,
    config: &ChannelConfig,
    token: &Arc<SelectToken>,
    index: usize,
    item: T,
  ) -> (SelectRegister, Option<T>) {
    if self.send_ready(config) {
      return (SelectRegister::Ready, Some(item));
    }
    self.senders.push_back(SendWaiter::Select(SelectSendEntry {
      token: Arc::clone(token),
      index,
      item: Some(item),
    }));
    (SelectRegister::Registered, None)
  }

  /// Removes a parked receiver node that cancelled itself.
  pub(crate) fn remove_recv_waiter(&mut self, node: &Arc<RecvNode<T>>) {
    self
      .receivers
      .retain(|w| !matches!(w, RecvWaiter::Strand(n) if Arc::ptr_eq(n, node)));
  }

  /// Removes a parked sender node that cancelled itself.
  pub(crate) fn remove_send_waiter(&mut self, node: &Arc<SendNode<T>>) {
    self
      .senders
      .retain(|w| !matches!(w, SendWaiter::Strand(n) if Arc::ptr_eq(n, node)));
  }

  /// Removes every entry of `token`, returning recovered unsent messages
  /// as `(descriptor index, message)`.
  pub(crate) fn remove_select(&mut self, token: &Arc<SelectToken>) -> Vec<(usize, T)> {
    self
      .receivers
      .retain(|w| !matches!(w, RecvWaiter::Select(e) if Arc::ptr_eq(&e.token, token)));
    let mut recovered = Vec::new();
    let mut keep = VecDeque::with_capacity(self.senders.len());
    for waiter in self.senders.drain(..) {
      match waiter {
        SendWaiter::Select(mut entry) if Arc::ptr_eq(&entry.token, token) => {
          if let Some(item) = entry.item.take() {
            recovered.push((entry.index, item));
          }
        }
        other => keep.push_back(other),
      }
    }
    self.senders = keep;
    recovered
  }
}

/// The shared owner of a channel's state, held in an `Arc` by every handle.
pub(crate) struct ChannelShared<T> {
  pub(crate) config: ChannelConfig,
  pub(crate) core: Mutex<ChannelCore<T>>,
}

impl<T> ChannelShared<T> {
  pub(crate) fn new(config: ChannelConfig) -> Self {
    ChannelShared {
      core: Mutex::new(ChannelCore::new(&config)),
      config,
    }
  }

  pub(crate) fn try_send_inner(&self, item: T) -> Result<(), TrySendError<T>> {
    let mut wakes = Vec::new();
    let result = self.core.lock().try_send(&self.config, item, &mut wakes);
    fire_all(wakes);
    result
  }

  pub(crate) fn try_recv_inner(&self) -> Result<T, TryRecvError> {
    let mut wakes = Vec::new();
    let result = self.core.lock().try_recv(&self.config, &mut wakes);
    fire_all(wakes);
    result
  }

  pub(crate) fn close_inner(&self, cause: Option<Cause>) -> bool {
    let mut wakes = Vec::new();
    let closed = self.core.lock().close(cause, &mut wakes);
    fire_all(wakes);
    closed
  }
}
