#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! A user-space concurrency runtime: cooperative fibers over a
//! work-stealing worker pool, channels with configurable overflow
//! policies, a multi-way select, ticker consumers, topic fan-out and
//! single-assignment dataflow vals.
//!
//! Every parking operation has two interoperating surfaces: a blocking
//! call that parks the OS thread, and a future that parks the fiber. A
//! thread can `send` into a channel a fiber `recv_async`es from, a fiber
//! can `join` a thread strand, and a select can park either flavor.
//!
//! ```no_run
//! use strand::channel::Channel;
//!
//! let ch = Channel::rendezvous();
//! let tx = ch.clone();
//! let producer = strand::fiber::spawn(async move {
//!   tx.send_async("ping").await.unwrap();
//! });
//! assert_eq!(ch.recv().unwrap(), "ping");
//! producer.join().unwrap();
//! ```

pub mod channel;
pub mod error;
pub mod fiber;
pub mod select;
pub mod strand;
pub mod telemetry;
pub mod val;

mod async_util;
mod internal;
mod sync_util;

pub use channel::{Capacity, Channel, ChannelConfig, OverflowPolicy, TickerConsumer, Topic};
pub use error::{
  Cause, JoinError, ObserveError, ObserveTimeoutError, RecvError, RecvTimeoutError, SelectError,
  SendError, TopicSendError, TryRecvError, TrySendError,
};
pub use fiber::{Fiber, FiberConfig, FiberHandle, Scheduler};
pub use select::{select, select_timeout, try_select, SelectOp, Selected};
pub use strand::{join_all, Strand, StrandId, ThreadStrand};
pub use val::Val;
