#![allow(dead_code)]

use std::time::Duration;

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(50);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Item counts for stress loops; kept moderate so debug CI stays fast.
pub const ITEMS_HIGH: usize = 1_000;
pub const ITEMS_LOW: usize = 100;
