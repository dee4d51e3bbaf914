// src/async_util.rs

//! Waker plumbing shared by the async surfaces.

// AtomicWaker comes from futures-util rather than a hand-rolled cell; it
// handles the register/wake race correctly.
pub(crate) use futures_util::task::AtomicWaker;
