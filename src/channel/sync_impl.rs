// src/channel/sync_impl.rs

//! Blocking (thread-parking) send and receive for the channel.
//!
//! Every operation follows the same commit protocol: attempt the
//! non-parking fast path, then lock, re-check state, and only then park on
//! a freshly registered wait node. The peer completes the node; the thread
//! waits on the node's state word under the adaptive backoff strategy.

use super::core::{
  ChannelShared, RecvRegister, SendRegister, CLAIMED, CLOSED_SIG, WAITING,
};
use super::OverflowPolicy;
use crate::error::{RecvError, RecvTimeoutError, SendError, TryRecvError, TrySendError};
use crate::internal::wake::WakeHandle;
use crate::sync_util;
use crate::telemetry;
use std::time::{Duration, Instant};

const LOC_SEND: &str = "Channel::send";
const LOC_RECV: &str = "Channel::recv";
const CTR_PARKS: &str = "ParkCommits";

pub(crate) fn send_blocking<T>(shared: &ChannelShared<T>, item: T) -> Result<(), SendError> {
  let mut pending = item;
  loop {
    // --- Phase 1: non-parking attempt ---
    match shared.try_send_inner(pending) {
      Ok(()) => return Ok(()),
      Err(TrySendError::Closed(_)) => {
        return match shared.config.overflow {
          OverflowPolicy::Drop | OverflowPolicy::Displace => Ok(()),
          _ => Err(SendError::Closed),
        };
      }
      Err(TrySendError::Full(back)) => match shared.config.overflow {
        OverflowPolicy::Block => pending = back,
        OverflowPolicy::Throw => return Err(SendError::Overflow),
        OverflowPolicy::Drop | OverflowPolicy::Displace => return Ok(()),
      },
    }

    // --- Phase 2: lock, re-check, and commit to parking ---
    let registered = shared
      .core
      .lock()
      .register_send(&shared.config, pending, WakeHandle::current_thread());
    let node = match registered {
      SendRegister::Retry(back) => {
        pending = back;
        continue;
      }
      SendRegister::Closed(_) => {
        return match shared.config.overflow {
          OverflowPolicy::Drop | OverflowPolicy::Displace => Ok(()),
          _ => Err(SendError::Closed),
        };
      }
      SendRegister::Parked(node) => node,
    };

    // --- Phase 3: wait for the peer to claim the node ---
    telemetry::increment_counter(LOC_SEND, CTR_PARKS);
    sync_util::adaptive_wait(|| node.state() != WAITING);
    match node.state() {
      CLAIMED => return Ok(()),
      CLOSED_SIG => return Err(SendError::Closed),
      state => unreachable!("sender woken in state {state}"),
    }
  }
}

pub(crate) fn recv_blocking<T>(shared: &ChannelShared<T>) -> Result<T, RecvError> {
  loop {
    // --- Phase 1: non-parking attempt ---
    match shared.try_recv_inner() {
      Ok(item) => return Ok(item),
      Err(TryRecvError::Closed) => return Err(RecvError::Closed),
      Err(TryRecvError::Cause(c)) => return Err(RecvError::Cause(c)),
      Err(TryRecvError::Empty) => {}
    }

    // --- Phase 2: lock, re-check, and commit to parking ---
    let registered = shared
      .core
      .lock()
      .register_recv(&shared.config, WakeHandle::current_thread());
    let node = match registered {
      RecvRegister::Retry => continue,
      RecvRegister::Closed(None) => return Err(RecvError::Closed),
      RecvRegister::Closed(Some(c)) => return Err(RecvError::Cause(c)),
      RecvRegister::Parked(node) => node,
    };

    // --- Phase 3: wait for a sender or close ---
    telemetry::increment_counter(LOC_RECV, CTR_PARKS);
    sync_util::adaptive_wait(|| node.state() != WAITING);
    match node.state() {
      CLAIMED => {
        return Ok(node.take_item().expect("claimed receive delivers its item"));
      }
      CLOSED_SIG => {
        let cause = shared.core.lock().close_cause();
        return Err(match cause {
          Some(c) => RecvError::Cause(c),
          None => RecvError::Closed,
        });
      }
      state => unreachable!("receiver woken in state {state}"),
    }
  }
}

pub(crate) fn recv_timeout_blocking<T>(
  shared: &ChannelShared<T>,
  timeout: Duration,
) -> Result<T, RecvTimeoutError> {
  // The deadline is computed once; spurious wakes re-check it.
  let deadline = Instant::now() + timeout;

  loop {
    match shared.try_recv_inner() {
      Ok(item) => return Ok(item),
      Err(TryRecvError::Closed) => return Err(RecvTimeoutError::Closed),
      Err(TryRecvError::Cause(c)) => return Err(RecvTimeoutError::Cause(c)),
      Err(TryRecvError::Empty) => {}
    }
    if Instant::now() >= deadline {
      return Err(RecvTimeoutError::Timeout);
    }

    let registered = shared
      .core
      .lock()
      .register_recv(&shared.config, WakeHandle::current_thread());
    let node = match registered {
      RecvRegister::Retry => continue,
      RecvRegister::Closed(None) => return Err(RecvTimeoutError::Closed),
      RecvRegister::Closed(Some(c)) => return Err(RecvTimeoutError::Cause(c)),
      RecvRegister::Parked(node) => node,
    };

    telemetry::increment_counter(LOC_RECV, CTR_PARKS);
    let completed = sync_util::adaptive_wait_deadline(|| node.state() != WAITING, deadline);
    if !completed && node.cancel() {
      shared.core.lock().remove_recv_waiter(&node);
      return Err(RecvTimeoutError::Timeout);
    }
    // Either the peer claimed in time, or it won the race against our
    // cancellation; honor its outcome in both cases.
    match node.state() {
      CLAIMED => {
        return Ok(node.take_item().expect("claimed receive delivers its item"));
      }
      CLOSED_SIG => {
        let cause = shared.core.lock().close_cause();
        return Err(match cause {
          Some(c) => RecvTimeoutError::Cause(c),
          None => RecvTimeoutError::Closed,
        });
      }
      state => unreachable!("receiver woken in state {state}"),
    }
  }
}
