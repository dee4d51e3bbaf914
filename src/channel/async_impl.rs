// src/channel/async_impl.rs

//! Future-based send and receive for the channel.
//!
//! The futures mirror the blocking protocol: non-parking attempt, then
//! lock/re-check/park on a wait node. A parked future holds its node and
//! re-arms the node's waker on every poll; dropping a parked future cancels
//! the node and removes it from the wait queue. Every poll is a suspension
//! point, so a pending interrupt on the current fiber fails the operation
//! with the `Interrupted` variant.

use super::core::{
  ChannelShared, RecvNode, RecvRegister, SendNode, SendRegister, CLAIMED, CLOSED_SIG, WAITING,
};
use super::{Channel, OverflowPolicy};
use crate::error::{RecvError, SendError, TryRecvError, TrySendError};
use crate::fiber;
use crate::internal::wake::WakeHandle;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A future that completes when the value has been accepted by the channel.
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct SendFuture<'a, T> {
  channel: &'a Channel<T>,
  item: Option<T>,
  node: Option<Arc<SendNode<T>>>,
}

impl<'a, T> SendFuture<'a, T> {
  pub(super) fn new(channel: &'a Channel<T>, item: T) -> Self {
    SendFuture {
      channel,
      item: Some(item),
      node: None,
    }
  }
}

impl<'a, T> Unpin for SendFuture<'a, T> {}

impl<'a, T> Future for SendFuture<'a, T> {
  type Output = Result<(), SendError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let shared = &this.channel.shared;
    'poll_loop: loop {
      // --- Parked: inspect our node first ---
      if let Some(node) = &this.node {
        match node.state() {
          CLAIMED => {
            this.node = None;
            return Poll::Ready(Ok(()));
          }
          CLOSED_SIG => {
            this.node = None;
            return Poll::Ready(match shared.config.overflow {
              OverflowPolicy::Drop | OverflowPolicy::Displace => Ok(()),
              _ => Err(SendError::Closed),
            });
          }
          _ => {
            if fiber::interrupt_pending() {
              if node.cancel().is_some() {
                shared.core.lock().remove_send_waiter(node);
                this.node = None;
                fiber::consume_interrupt();
                return Poll::Ready(Err(SendError::Interrupted));
              }
              // A peer claimed first; honor its outcome and leave the
              // interrupt pending for the next suspension point.
              continue 'poll_loop;
            }
            node.set_wake(WakeHandle::Task(cx.waker().clone()));
            // Re-check: a claim that raced our waker update already took
            // the stale handle and will never fire the new one.
            if node.state() == WAITING {
              return Poll::Pending;
            }
            continue 'poll_loop;
          }
        }
      }

      // --- Fresh attempt ---
      if fiber::interrupt_pending() {
        fiber::consume_interrupt();
        return Poll::Ready(Err(SendError::Interrupted));
      }
      let item = match this.item.take() {
        Some(item) => item,
        // Polled again after completion.
        None => return Poll::Ready(Ok(())),
      };
      match shared.try_send_inner(item) {
        Ok(()) => return Poll::Ready(Ok(())),
        Err(TrySendError::Closed(_)) => {
          return Poll::Ready(match shared.config.overflow {
            OverflowPolicy::Drop | OverflowPolicy::Displace => Ok(()),
            _ => Err(SendError::Closed),
          });
        }
        Err(TrySendError::Full(back)) => match shared.config.overflow {
          OverflowPolicy::Block => {
            let registered = shared.core.lock().register_send(
              &shared.config,
              back,
              WakeHandle::Task(cx.waker().clone()),
            );
            match registered {
              SendRegister::Retry(back) => {
                this.item = Some(back);
                continue 'poll_loop;
              }
              SendRegister::Closed(_) => return Poll::Ready(Err(SendError::Closed)),
              SendRegister::Parked(node) => {
                this.node = Some(node);
                return Poll::Pending;
              }
            }
          }
          OverflowPolicy::Throw => return Poll::Ready(Err(SendError::Overflow)),
          OverflowPolicy::Drop | OverflowPolicy::Displace => return Poll::Ready(Ok(())),
        },
      }
    }
  }
}

impl<'a, T> Drop for SendFuture<'a, T> {
  fn drop(&mut self) {
    if let Some(node) = self.node.take() {
      if node.cancel().is_some() {
        self.channel.shared.core.lock().remove_send_waiter(&node);
      }
    }
  }
}

/// A future that completes when a value (or the terminal signal) has been
/// received from the channel.
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct RecvFuture<'a, T> {
  channel: &'a Channel<T>,
  node: Option<Arc<RecvNode<T>>>,
}

impl<'a, T> RecvFuture<'a, T> {
  pub(super) fn new(channel: &'a Channel<T>) -> Self {
    RecvFuture {
      channel,
      node: None,
    }
  }
}

impl<'a, T> Unpin for RecvFuture<'a, T> {}

impl<'a, T> Future for RecvFuture<'a, T> {
  type Output = Result<T, RecvError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let shared = &this.channel.shared;
    'poll_loop: loop {
      if let Some(node) = &this.node {
        match node.state() {
          CLAIMED => {
            let item = node.take_item().expect("claimed receive delivers its item");
            this.node = None;
            return Poll::Ready(Ok(item));
          }
          CLOSED_SIG => {
            this.node = None;
            let cause = shared.core.lock().close_cause();
            return Poll::Ready(Err(match cause {
              Some(c) => RecvError::Cause(c),
              None => RecvError::Closed,
            }));
          }
          _ => {
            if fiber::interrupt_pending() {
              if node.cancel() {
                shared.core.lock().remove_recv_waiter(node);
                this.node = None;
                fiber::consume_interrupt();
                return Poll::Ready(Err(RecvError::Interrupted));
              }
              continue 'poll_loop;
            }
            node.set_wake(WakeHandle::Task(cx.waker().clone()));
            if node.state() == WAITING {
              return Poll::Pending;
            }
            continue 'poll_loop;
          }
        }
      }

      if fiber::interrupt_pending() {
        fiber::consume_interrupt();
        return Poll::Ready(Err(RecvError::Interrupted));
      }
      match shared.try_recv_inner() {
        Ok(item) => return Poll::Ready(Ok(item)),
        Err(TryRecvError::Closed) => return Poll::Ready(Err(RecvError::Closed)),
        Err(TryRecvError::Cause(c)) => return Poll::Ready(Err(RecvError::Cause(c))),
        Err(TryRecvError::Empty) => {}
      }
      let registered = shared
        .core
        .lock()
        .register_recv(&shared.config, WakeHandle::Task(cx.waker().clone()));
      match registered {
        RecvRegister::Retry => continue 'poll_loop,
        RecvRegister::Closed(None) => return Poll::Ready(Err(RecvError::Closed)),
        RecvRegister::Closed(Some(c)) => return Poll::Ready(Err(RecvError::Cause(c))),
        RecvRegister::Parked(node) => {
          this.node = Some(node);
          return Poll::Pending;
        }
      }
    }
  }
}

impl<'a, T> Drop for RecvFuture<'a, T> {
  fn drop(&mut self) {
    if let Some(node) = self.node.take() {
      if node.cancel() {
        self.channel.shared.core.lock().remove_recv_waiter(&node);
      } else {
        // A peer completed the transfer after we stopped polling; the
        // message is consumed with the node.
        let _ = node.take_item();
      }
    }
  }
}
