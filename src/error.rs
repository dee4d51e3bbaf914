// src/error.rs

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A shared, cloneable failure value.
///
/// Causes travel across strand boundaries: a panicking fiber stores one for
/// its joiners, `close` can attach one to a channel, and a val can be
/// delivered one instead of a value. Internally this is an `Arc` over a
/// boxed error so that every observer sees the same cause.
#[derive(Clone)]
pub struct Cause(Arc<dyn Error + Send + Sync + 'static>);

impl Cause {
  /// Wraps any error value.
  pub fn new<E>(err: E) -> Self
  where
    E: Error + Send + Sync + 'static,
  {
    Cause(Arc::new(err))
  }

  /// Creates a cause from a plain message.
  pub fn msg(message: impl Into<String>) -> Self {
    Cause(Arc::new(Message(message.into())))
  }

  /// Builds a cause from a caught panic payload, preserving `&str` and
  /// `String` payloads verbatim.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let text = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "fiber panicked".to_string()
    };
    Cause(Arc::new(Panicked(text)))
  }

  /// The outermost error.
  pub fn get(&self) -> &(dyn Error + 'static) {
    &*self.0
  }

  /// The innermost cause, unwrapping at most two wrapper layers.
  ///
  /// Joining a failed strand re-raises the original failure, not the
  /// execution/runtime wrappers it may have been packed into along the way.
  pub fn root(&self) -> &(dyn Error + 'static) {
    let mut current: &(dyn Error + 'static) = &*self.0;
    for _ in 0..2 {
      match current.source() {
        Some(inner) => current = inner,
        None => break,
      }
    }
    current
  }
}

impl fmt::Display for Cause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl fmt::Debug for Cause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Cause({})", self.0)
  }
}

#[derive(Debug)]
struct Message(String);
impl fmt::Display for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
impl Error for Message {}

#[derive(Debug)]
struct Panicked(String);
impl fmt::Display for Panicked {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "panic: {}", self.0)
  }
}
impl Error for Panicked {}

/// Error returned by `try_send` when the operation could not complete
/// immediately; the rejected item is returned to the caller.
#[derive(PartialEq, Eq, Clone)]
pub enum TrySendError<T> {
  /// The channel's capacity is exhausted under a non-displacing policy.
  Full(T),
  /// The channel is closed.
  Closed(T),
}

impl<T> TrySendError<T> {
  /// Consumes the error, returning the rejected item.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      TrySendError::Full(v) | TrySendError::Closed(v) => v,
    }
  }
}

impl<T> fmt::Debug for TrySendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrySendError::Full(_) => write!(f, "TrySendError::Full(..)"),
      TrySendError::Closed(_) => write!(f, "TrySendError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for TrySendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrySendError::Full(_) => f.write_str("channel full"),
      TrySendError::Closed(_) => f.write_str("channel closed"),
    }
  }
}

impl<T: fmt::Debug> Error for TrySendError<T> {}

/// Error returned by parking `send` operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SendError {
  /// The channel is closed.
  Closed,
  /// The channel is full and its overflow policy is `Throw`.
  Overflow,
  /// The sending fiber was interrupted at this suspension point.
  Interrupted,
}

impl Error for SendError {}
impl fmt::Display for SendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SendError::Closed => write!(f, "channel closed"),
      SendError::Overflow => write!(f, "channel overflow"),
      SendError::Interrupted => write!(f, "interrupted"),
    }
  }
}

/// Error returned by `try_recv`.
#[derive(Debug, Clone)]
pub enum TryRecvError {
  /// The channel is open but currently holds no message.
  Empty,
  /// The channel is closed and drained, with no close cause.
  Closed,
  /// The channel is closed and drained; this is its close cause.
  Cause(Cause),
}

impl Error for TryRecvError {}
impl fmt::Display for TryRecvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryRecvError::Empty => write!(f, "channel empty"),
      TryRecvError::Closed => write!(f, "channel closed"),
      TryRecvError::Cause(c) => write!(f, "channel closed: {c}"),
    }
  }
}

/// Error returned by parking `recv` operations.
#[derive(Debug, Clone)]
pub enum RecvError {
  /// The terminal signal: the channel is closed and drained.
  Closed,
  /// The terminal signal with the channel's close cause.
  Cause(Cause),
  /// The receiving fiber was interrupted at this suspension point.
  Interrupted,
}

impl Error for RecvError {}
impl fmt::Display for RecvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecvError::Closed => write!(f, "channel closed"),
      RecvError::Cause(c) => write!(f, "channel closed: {c}"),
      RecvError::Interrupted => write!(f, "interrupted"),
    }
  }
}

/// Error returned by `recv_timeout` operations.
#[derive(Debug, Clone)]
pub enum RecvTimeoutError {
  /// The terminal signal: the channel is closed and drained.
  Closed,
  /// The terminal signal with the channel's close cause.
  Cause(Cause),
  /// The deadline elapsed before a message arrived.
  Timeout,
  /// The receiving fiber was interrupted at this suspension point.
  Interrupted,
}

impl Error for RecvTimeoutError {}
impl fmt::Display for RecvTimeoutError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecvTimeoutError::Closed => write!(f, "channel closed"),
      RecvTimeoutError::Cause(c) => write!(f, "channel closed: {c}"),
      RecvTimeoutError::Timeout => write!(f, "receive timed out"),
      RecvTimeoutError::Interrupted => write!(f, "interrupted"),
    }
  }
}

impl From<RecvError> for RecvTimeoutError {
  fn from(err: RecvError) -> Self {
    match err {
      RecvError::Closed => RecvTimeoutError::Closed,
      RecvError::Cause(c) => RecvTimeoutError::Cause(c),
      RecvError::Interrupted => RecvTimeoutError::Interrupted,
    }
  }
}

/// Error returned by `select` when the chosen operation failed.
#[derive(Debug, Clone)]
pub enum SelectError {
  /// The chosen operation hit a closed channel.
  Closed,
  /// The chosen operation hit a channel closed with this cause.
  Cause(Cause),
  /// The selecting fiber was interrupted while parked.
  Interrupted,
}

impl Error for SelectError {}
impl fmt::Display for SelectError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SelectError::Closed => write!(f, "channel closed"),
      SelectError::Cause(c) => write!(f, "channel closed: {c}"),
      SelectError::Interrupted => write!(f, "interrupted"),
    }
  }
}

/// Error returned by `Val::observe`.
#[derive(Debug, Clone)]
pub enum ObserveError {
  /// The val was delivered a failure cause.
  Failed(Cause),
  /// The observing fiber was interrupted at this suspension point.
  Interrupted,
}

impl Error for ObserveError {}
impl fmt::Display for ObserveError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ObserveError::Failed(c) => write!(f, "val failed: {c}"),
      ObserveError::Interrupted => write!(f, "interrupted"),
    }
  }
}

/// Error returned by `Val::observe_timeout`.
#[derive(Debug, Clone)]
pub enum ObserveTimeoutError {
  /// The val was delivered a failure cause.
  Failed(Cause),
  /// The deadline elapsed before delivery.
  Timeout,
  /// The observing fiber was interrupted at this suspension point.
  Interrupted,
}

impl Error for ObserveTimeoutError {}
impl fmt::Display for ObserveTimeoutError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ObserveTimeoutError::Failed(c) => write!(f, "val failed: {c}"),
      ObserveTimeoutError::Timeout => write!(f, "observe timed out"),
      ObserveTimeoutError::Interrupted => write!(f, "interrupted"),
    }
  }
}

impl From<ObserveError> for ObserveTimeoutError {
  fn from(err: ObserveError) -> Self {
    match err {
      ObserveError::Failed(c) => ObserveTimeoutError::Failed(c),
      ObserveError::Interrupted => ObserveTimeoutError::Interrupted,
    }
  }
}

/// Error returned by `join` operations.
#[derive(Debug, Clone)]
pub enum JoinError {
  /// The target strand terminated with this cause.
  Failed(Cause),
  /// The deadline elapsed before the strand terminated.
  Timeout,
  /// The joining fiber was interrupted at this suspension point.
  Interrupted,
}

impl Error for JoinError {}
impl fmt::Display for JoinError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JoinError::Failed(c) => write!(f, "strand failed: {c}"),
      JoinError::Timeout => write!(f, "join timed out"),
      JoinError::Interrupted => write!(f, "interrupted"),
    }
  }
}

/// Error returned by `Topic::send`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TopicSendError {
  /// The topic has been closed.
  Closed,
  /// Every current subscriber rejected the message.
  AllFailed,
}

impl Error for TopicSendError {}
impl fmt::Display for TopicSendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TopicSendError::Closed => write!(f, "topic closed"),
      TopicSendError::AllFailed => write!(f, "no subscriber accepted the message"),
    }
  }
}

/// Marker failure for interrupted sleeps.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Interrupted;

impl Error for Interrupted {}
impl fmt::Display for Interrupted {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "interrupted")
  }
}
