// src/channel/primitive.rs

//! Primitive-element channel aliases.
//!
//! The source system shipped dedicated int/long/float/double channels;
//! here they are the one generic [`Channel`] at concrete element types,
//! unbounded by default.

use super::Channel;

pub type Int32Channel = Channel<i32>;
pub type Int64Channel = Channel<i64>;
pub type Float32Channel = Channel<f32>;
pub type Float64Channel = Channel<f64>;

/// An unbounded `i32` channel.
pub fn int32_channel() -> Int32Channel {
  Channel::unbounded()
}

/// An unbounded `i64` channel.
pub fn int64_channel() -> Int64Channel {
  Channel::unbounded()
}

/// An unbounded `f32` channel.
pub fn float32_channel() -> Float32Channel {
  Channel::unbounded()
}

/// An unbounded `f64` channel.
pub fn float64_channel() -> Float64Channel {
  Channel::unbounded()
}
