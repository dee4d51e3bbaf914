// src/select/mod.rs

//! Atomic multi-way choice among channel operations.
//!
//! A select call runs in phases:
//!
//! 1. **Try**: attempt every descriptor without parking, in list order
//!    (`priority`) or in a fresh uniform-random permutation (taking the
//!    first ready descriptor of a random permutation picks uniformly
//!    among the ready ones).
//! 2. **Register**: with nothing ready, put a wait node carrying the
//!    call's shared token on every channel. Registration re-checks
//!    readiness under each channel's lock; if an operation became ready
//!    meanwhile, the pass aborts, unregisters and loops back to the try
//!    phase, so no wakeup is lost.
//! 3. **Park / wake**: the first peer that matches a node claims the
//!    token by CAS with the descriptor index and completes the transfer
//!    (a receive's message lands in the call's slot; a registered send's
//!    message is taken from its node). Timeout and interrupt claim the
//!    token with sentinels from the selector's own side. All other nodes
//!    are removed cooperatively after the wake, and lazily by channels
//!    that visit a node whose token is no longer open.
//!
//! Exactly one descriptor takes effect, or none on timeout/interrupt:
//! only the claimant completes a transfer, and unchosen registered sends
//! get their message back on unregistration (or, once the call returns,
//! dropped with it).

use crate::channel::{Channel, OverflowPolicy};
use crate::error::{SelectError, TryRecvError, TrySendError};
use crate::fiber;
use crate::fiber::timer::{timeout, Elapsed};
use crate::internal::rng::FastRng;
use crate::select::token::{SelectFailure, SelectToken};
use crate::sync_util;
use crate::telemetry;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

pub(crate) mod token;

static SELECT_RNG: Lazy<FastRng> = Lazy::new(FastRng::from_entropy);

/// One descriptor of a select call: a receive on a channel, or a send of
/// a specific message.
pub struct SelectOp<T> {
  channel: Channel<T>,
  kind: OpKind<T>,
}

enum OpKind<T> {
  Recv,
  Send(Option<T>),
}

impl<T> SelectOp<T> {
  /// Describes receiving from `channel`.
  pub fn recv(channel: &Channel<T>) -> Self {
    SelectOp {
      channel: channel.clone(),
      kind: OpKind::Recv,
    }
  }

  /// Describes sending `message` on `channel`. Ownership of the message
  /// passes to the select call; if another descriptor wins, the message
  /// is dropped with the call.
  pub fn send(channel: &Channel<T>, message: T) -> Self {
    SelectOp {
      channel: channel.clone(),
      kind: OpKind::Send(Some(message)),
    }
  }

  /// The channel this descriptor operates on.
  pub fn channel(&self) -> &Channel<T> {
    &self.channel
  }

  /// `true` for a send descriptor.
  pub fn is_send(&self) -> bool {
    matches!(self.kind, OpKind::Send(_))
  }
}

impl<T> std::fmt::Debug for SelectOp<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.kind {
      OpKind::Recv => write!(f, "SelectOp::Recv"),
      OpKind::Send(_) => write!(f, "SelectOp::Send(..)"),
    }
  }
}

/// The resolved outcome of a select call.
#[derive(Debug, PartialEq, Eq)]
pub struct Selected<T> {
  /// Index of the winning descriptor.
  pub index: usize,
  /// The received message for a receive win; `None` for a completed send
  /// or a receive that observed an uncaused close.
  pub message: Option<T>,
}

enum Attempt<T> {
  Done(Selected<T>),
  Fail(SelectError),
  NotReady,
}

/// Attempts descriptor `index` without parking.
fn attempt_op<T>(op: &mut SelectOp<T>, index: usize) -> Attempt<T> {
  match &mut op.kind {
    OpKind::Recv => match op.channel.try_recv() {
      Ok(item) => Attempt::Done(Selected {
        index,
        message: Some(item),
      }),
      Err(TryRecvError::Empty) => Attempt::NotReady,
      Err(TryRecvError::Closed) => Attempt::Done(Selected {
        index,
        message: None,
      }),
      Err(TryRecvError::Cause(c)) => Attempt::Fail(SelectError::Cause(c)),
    },
    OpKind::Send(slot) => {
      let Some(item) = slot.take() else {
        return Attempt::NotReady;
      };
      match op.channel.try_send(item) {
        Ok(()) => Attempt::Done(Selected {
          index,
          message: None,
        }),
        Err(TrySendError::Full(back)) => match op.channel.overflow_policy() {
          // Lossy policies complete immediately by discarding.
          OverflowPolicy::Drop | OverflowPolicy::Displace => Attempt::Done(Selected {
            index,
            message: None,
          }),
          OverflowPolicy::Block | OverflowPolicy::Throw => {
            *slot = Some(back);
            Attempt::NotReady
          }
        },
        Err(TrySendError::Closed(_)) => match op.channel.overflow_policy() {
          OverflowPolicy::Drop | OverflowPolicy::Displace => Attempt::Done(Selected {
            index,
            message: None,
          }),
          OverflowPolicy::Block | OverflowPolicy::Throw => Attempt::Fail(SelectError::Closed),
        },
      }
    }
  }
}

fn shuffle(indices: &mut [usize], rng: &FastRng) {
  for i in (1..indices.len()).rev() {
    let j = rng.gen_below(i + 1);
    indices.swap(i, j);
  }
}

/// One pass over all descriptors; `None` means nothing was ready.
fn try_phase<T>(
  ops: &mut [SelectOp<T>],
  priority: bool,
  rng: &FastRng,
) -> Option<Result<Selected<T>, SelectError>> {
  let mut order: Vec<usize> = (0..ops.len()).collect();
  if !priority {
    shuffle(&mut order, rng);
  }
  for &index in &order {
    match attempt_op(&mut ops[index], index) {
      Attempt::Done(selected) => return Some(Ok(selected)),
      Attempt::Fail(err) => return Some(Err(err)),
      Attempt::NotReady => {}
    }
  }
  None
}

/// Registers every descriptor. `false` means an operation became ready
/// under some channel's lock; the caller unregisters and retries.
fn register_phase<T>(
  ops: &mut [SelectOp<T>],
  token: &Arc<SelectToken>,
  slot: &Arc<Mutex<Option<T>>>,
) -> bool {
  use crate::channel::core::SelectRegister;
  for (index, op) in ops.iter_mut().enumerate() {
    let shared = &op.channel.shared;
    match &mut op.kind {
      OpKind::Recv => {
        let registered = shared
          .core
          .lock()
          .register_select_recv(&shared.config, token, slot, index);
        if matches!(registered, SelectRegister::Ready) {
          return false;
        }
      }
      OpKind::Send(item_slot) => {
        let Some(item) = item_slot.take() else {
          continue;
        };
        let (registered, back) =
          shared
            .core
            .lock()
            .register_select_send(&shared.config, token, index, item);
        if matches!(registered, SelectRegister::Ready) {
          *item_slot = back;
          return false;
        }
      }
    }
  }
  true
}

/// Removes every node of `token` and restores recovered unsent messages
/// to their descriptors.
fn unregister<T>(ops: &mut [SelectOp<T>], token: &Arc<SelectToken>) {
  let mut recovered = Vec::new();
  for op in ops.iter() {
    recovered.extend(op.channel.shared.core.lock().remove_select(token));
  }
  for (index, item) in recovered {
    if let OpKind::Send(slot) = &mut ops[index].kind {
      *slot = Some(item);
    }
  }
}

/// Builds the outcome after a peer claimed the token with `state`.
fn consume_outcome<T>(
  token: &SelectToken,
  slot: &Arc<Mutex<Option<T>>>,
  state: usize,
) -> Result<Selected<T>, SelectError> {
  if let Some(failure) = token.take_failure() {
    return Err(match failure {
      SelectFailure::Closed => SelectError::Closed,
      SelectFailure::Cause(c) => SelectError::Cause(c),
    });
  }
  Ok(Selected {
    index: state,
    message: slot.lock().take(),
  })
}

fn select_inner<T>(
  mut ops: Vec<SelectOp<T>>,
  priority: bool,
  deadline: Option<Instant>,
) -> Result<Option<Selected<T>>, SelectError> {
  assert!(!ops.is_empty(), "select requires at least one descriptor");
  assert!(ops.len() <= token::MAX_OPS, "too many select descriptors");
  let rng = &*SELECT_RNG;

  loop {
    // --- Try phase ---
    if let Some(result) = try_phase(&mut ops, priority, rng) {
      return result.map(Some);
    }
    if let Some(d) = deadline {
      if Instant::now() >= d {
        return Ok(None);
      }
    }

    // --- Register phase ---
    let token = Arc::new(SelectToken::for_thread(std::thread::current()));
    let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    if !register_phase(&mut ops, &token, &slot) {
      unregister(&mut ops, &token);
      // A transfer may have completed in the gap before unregistration.
      let state = token.state();
      if state < token::MAX_OPS {
        return consume_outcome(&token, &slot, state).map(Some);
      }
      continue;
    }

    // --- Park ---
    telemetry::increment_counter("select", "ParkCommits");
    let claimed = match deadline {
      None => {
        sync_util::adaptive_wait(|| !token.is_open());
        true
      }
      Some(d) => sync_util::adaptive_wait_deadline(|| !token.is_open(), d),
    };
    if !claimed && token.try_claim(token::TIMED_OUT) {
      unregister(&mut ops, &token);
      return Ok(None);
    }
    // Either a peer claimed in time or it won the race against the
    // timeout; honor the transfer in both cases.
    unregister(&mut ops, &token);
    let state = token.state();
    if state < token::MAX_OPS {
      return consume_outcome(&token, &slot, state).map(Some);
    }
    unreachable!("select token claimed with sentinel {state}");
  }
}

/// Performs exactly one of the described operations, parking the calling
/// thread until one can complete.
///
/// With `priority`, the first ready descriptor in list order wins;
/// otherwise the winner is drawn uniformly among the ready descriptors.
pub fn select<T>(ops: Vec<SelectOp<T>>, priority: bool) -> Result<Selected<T>, SelectError> {
  select_inner(ops, priority, None).map(|r| r.expect("unbounded select resolves an operation"))
}

/// Like [`select`], bounded by a deadline; `Ok(None)` reports the timeout
/// with no operation performed.
pub fn select_timeout<T>(
  ops: Vec<SelectOp<T>>,
  priority: bool,
  dur: Duration,
) -> Result<Option<Selected<T>>, SelectError> {
  select_inner(ops, priority, Some(Instant::now() + dur))
}

/// The non-parking variant: `Ok(None)` if no descriptor is ready.
pub fn try_select<T>(
  mut ops: Vec<SelectOp<T>>,
  priority: bool,
) -> Result<Option<Selected<T>>, SelectError> {
  match try_phase(&mut ops, priority, &SELECT_RNG) {
    Some(result) => result.map(Some),
    None => Ok(None),
  }
}

/// The fiber flavor of [`select`].
pub fn select_async<T>(ops: Vec<SelectOp<T>>, priority: bool) -> SelectFuture<T> {
  assert!(!ops.is_empty(), "select requires at least one descriptor");
  assert!(ops.len() <= token::MAX_OPS, "too many select descriptors");
  SelectFuture {
    ops,
    priority,
    token: None,
    slot: Arc::new(Mutex::new(None)),
  }
}

/// The fiber flavor of [`select_timeout`].
pub async fn select_timeout_async<T>(
  ops: Vec<SelectOp<T>>,
  priority: bool,
  dur: Duration,
) -> Result<Option<Selected<T>>, SelectError> {
  match timeout(dur, select_async(ops, priority)).await {
    Ok(result) => result.map(Some),
    Err(Elapsed) => Ok(None),
  }
}

/// Future returned by [`select_async`].
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct SelectFuture<T> {
  ops: Vec<SelectOp<T>>,
  priority: bool,
  token: Option<Arc<SelectToken>>,
  slot: Arc<Mutex<Option<T>>>,
}

impl<T> std::fmt::Debug for SelectFuture<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SelectFuture")
      .field("ops", &self.ops.len())
      .field("priority", &self.priority)
      .field("registered", &self.token.is_some())
      .finish()
  }
}

impl<T> Unpin for SelectFuture<T> {}

impl<T> Future for SelectFuture<T> {
  type Output = Result<Selected<T>, SelectError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    'poll_loop: loop {
      if let Some(token) = &this.token {
        let state = token.state();
        if state < token::MAX_OPS {
          let token = this.token.take().expect("token present in this branch");
          unregister(&mut this.ops, &token);
          return Poll::Ready(consume_outcome(&token, &this.slot, state));
        }
        if fiber::interrupt_pending() {
          if token.try_claim(token::INTERRUPTED) {
            let token = this.token.take().expect("token present in this branch");
            unregister(&mut this.ops, &token);
            fiber::consume_interrupt();
            return Poll::Ready(Err(SelectError::Interrupted));
          }
          // A peer won the race; honor its transfer and leave the
          // interrupt pending for the next suspension point.
          continue 'poll_loop;
        }
        token.register_waker(cx.waker());
        if token.is_open() {
          return Poll::Pending;
        }
        continue 'poll_loop;
      }

      if fiber::interrupt_pending() {
        fiber::consume_interrupt();
        return Poll::Ready(Err(SelectError::Interrupted));
      }
      if let Some(result) = try_phase(&mut this.ops, this.priority, &SELECT_RNG) {
        return Poll::Ready(result);
      }
      let token = Arc::new(SelectToken::for_task());
      if !register_phase(&mut this.ops, &token, &this.slot) {
        unregister(&mut this.ops, &token);
        let state = token.state();
        if state < token::MAX_OPS {
          return Poll::Ready(consume_outcome(&token, &this.slot, state));
        }
        continue 'poll_loop;
      }
      this.token = Some(token);
    }
  }
}

impl<T> Drop for SelectFuture<T> {
  fn drop(&mut self) {
    if let Some(token) = self.token.take() {
      // Claiming the abandoned sentinel keeps late peers away; if a peer
      // already won, its transfer is consumed with this future.
      let _ = token.try_claim(token::ABANDONED);
      unregister(&mut self.ops, &token);
    }
  }
}
