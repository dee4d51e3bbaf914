// src/channel/ticker.rs

//! Independent consumers over a displace channel.
//!
//! A ticker channel keeps the newest `n` messages, displacing the oldest
//! on overflow. A [`TickerConsumer`] walks the channel's sequence-stamped
//! buffer with its own cursor: a consumer the producer has lapped skips
//! forward to the oldest retained slot (the jump is visible through
//! [`TickerConsumer::cursor`]), a consumer that has drained everything
//! parks until the next append, and no element is ever delivered twice to
//! the same consumer. Consumers never affect the buffer or each other.

use super::core::TickerWaiter;
use super::Channel;
use crate::error::{RecvError, TryRecvError};
use crate::fiber;
use crate::internal::wake::WakeHandle;
use crate::sync_util;
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// An independent, monotone cursor over a ticker channel.
#[derive(Debug)]
pub struct TickerConsumer<T> {
  channel: Channel<T>,
  cursor: u64,
}

impl<T: Clone> TickerConsumer<T> {
  /// Creates a consumer positioned at the next message the channel will
  /// accept; it observes nothing sent before its construction.
  ///
  /// # Panics
  ///
  /// Panics if the channel's overflow policy is not `Displace`.
  pub fn new(channel: &Channel<T>) -> Self {
    assert!(
      channel.overflow_policy() == super::OverflowPolicy::Displace,
      "ticker consumers require a displace-policy channel"
    );
    let cursor = channel.shared.core.lock().next_seq();
    TickerConsumer {
      channel: channel.clone(),
      cursor,
    }
  }

  /// The sequence of the next message this consumer expects. Jumps past
  /// displaced messages when the producer laps this consumer.
  pub fn cursor(&self) -> u64 {
    self.cursor
  }

  /// Attempts to take the next message without parking.
  pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
    let core = self.channel.shared.core.lock();
    if let Some((oldest, newest)) = core.seq_bounds() {
      if self.cursor < oldest {
        // Lapped: skip to the oldest retained slot.
        self.cursor = oldest;
      }
      if self.cursor <= newest {
        let item = core
          .slot_at(self.cursor)
          .cloned()
          .expect("cursor within buffered sequence bounds");
        self.cursor += 1;
        return Ok(item);
      }
    }
    if core.is_closed() {
      return Err(match core.close_cause() {
        Some(c) => TryRecvError::Cause(c),
        None => TryRecvError::Closed,
      });
    }
    Err(TryRecvError::Empty)
  }

  /// Takes the next message, parking the calling thread until the producer
  /// appends one with a sequence at or past the cursor.
  pub fn recv(&mut self) -> Result<T, RecvError> {
    loop {
      let fired = {
        let mut core = self.channel.shared.core.lock();
        if let Some((oldest, newest)) = core.seq_bounds() {
          if self.cursor < oldest {
            self.cursor = oldest;
          }
          if self.cursor <= newest {
            let item = core
              .slot_at(self.cursor)
              .cloned()
              .expect("cursor within buffered sequence bounds");
            self.cursor += 1;
            return Ok(item);
          }
        }
        if core.is_closed() {
          return Err(match core.close_cause() {
            Some(c) => RecvError::Cause(c),
            None => RecvError::Closed,
          });
        }
        let fired = Arc::new(AtomicBool::new(false));
        core.register_ticker_waiter(TickerWaiter {
          fired: Arc::clone(&fired),
          wake: WakeHandle::current_thread(),
        });
        fired
      };
      sync_util::adaptive_wait(|| fired.load(Ordering::Acquire));
    }
  }

  /// Takes the next message from a fiber.
  pub fn recv_async(&mut self) -> TickerRecvFuture<'_, T> {
    TickerRecvFuture { consumer: self }
  }

  fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<T, RecvError>> {
    let mut core = self.channel.shared.core.lock();
    if let Some((oldest, newest)) = core.seq_bounds() {
      if self.cursor < oldest {
        self.cursor = oldest;
      }
      if self.cursor <= newest {
        let item = core
          .slot_at(self.cursor)
          .cloned()
          .expect("cursor within buffered sequence bounds");
        self.cursor += 1;
        return Poll::Ready(Ok(item));
      }
    }
    if core.is_closed() {
      return Poll::Ready(Err(match core.close_cause() {
        Some(c) => RecvError::Cause(c),
        None => RecvError::Closed,
      }));
    }
    core.register_ticker_waiter(TickerWaiter {
      fired: Arc::new(AtomicBool::new(false)),
      wake: WakeHandle::Task(cx.waker().clone()),
    });
    Poll::Pending
  }
}

/// Future returned by [`TickerConsumer::recv_async`].
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct TickerRecvFuture<'a, T> {
  consumer: &'a mut TickerConsumer<T>,
}

impl<'a, T: Clone> Future for TickerRecvFuture<'a, T> {
  type Output = Result<T, RecvError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    if fiber::interrupt_pending() {
      fiber::consume_interrupt();
      return Poll::Ready(Err(RecvError::Interrupted));
    }
    self.consumer.poll_recv(cx)
  }
}

impl<T: Clone> Stream for TickerConsumer<T> {
  type Item = T;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    match self.poll_recv(cx) {
      Poll::Ready(Ok(item)) => Poll::Ready(Some(item)),
      Poll::Ready(Err(_)) => Poll::Ready(None),
      Poll::Pending => Poll::Pending,
    }
  }
}
