// src/telemetry.rs

//! Feature-gated event and counter collection for debugging scheduler and
//! channel interleavings. Compiles to no-ops unless the `telemetry` feature
//! is enabled.

#[cfg(feature = "telemetry")]
pub mod enabled {
  use once_cell::sync::Lazy;
  use std::collections::HashMap;
  use std::fmt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::thread::{self, ThreadId};
  use std::time::Instant;

  static NEXT_EVENT_SEQUENCE_ID: AtomicUsize = AtomicUsize::new(0);

  #[derive(Clone)]
  pub struct TelemetryEvent {
    pub seq_id: usize,
    pub timestamp: Instant,
    pub os_thread_id: ThreadId,
    /// Id of the fiber running on this worker, if any.
    pub fiber_id: Option<u64>,
    pub location: String,
    pub event_type: String,
    pub message: Option<String>,
  }

  impl fmt::Debug for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("TelemetryEvent")
        .field("seq", &self.seq_id)
        .field("os_tid", &self.os_thread_id)
        .field("fiber", &self.fiber_id)
        .field("loc", &self.location)
        .field("evt", &self.event_type)
        .field("msg", &self.message.as_deref().unwrap_or(""))
        .finish()
    }
  }

  type CounterKey = (String, String);

  struct CollectorData {
    events: Vec<TelemetryEvent>,
    counters: HashMap<CounterKey, usize>,
    start_time: Instant,
  }

  static GLOBAL_COLLECTOR: Lazy<Mutex<CollectorData>> = Lazy::new(|| {
    Mutex::new(CollectorData {
      events: Vec::new(),
      counters: HashMap::new(),
      start_time: Instant::now(),
    })
  });

  pub fn log_event_fn(location: &str, event_type: &str, message: Option<String>) {
    let event = TelemetryEvent {
      seq_id: NEXT_EVENT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed),
      timestamp: Instant::now(),
      os_thread_id: thread::current().id(),
      fiber_id: crate::fiber::current().map(|f| f.id()),
      location: location.to_string(),
      event_type: event_type.to_string(),
      message,
    };
    if let Ok(mut collector) = GLOBAL_COLLECTOR.lock() {
      collector.events.push(event);
    }
  }

  pub fn increment_counter_fn(location: &'static str, counter_name: &str) {
    let key = (location.to_string(), counter_name.to_string());
    if let Ok(mut collector) = GLOBAL_COLLECTOR.lock() {
      *collector.counters.entry(key).or_insert(0) += 1;
    }
  }

  pub fn print_telemetry_report_fn() {
    let Ok(collector) = GLOBAL_COLLECTOR.lock() else {
      return;
    };
    println!("\n--- strand telemetry report ---");
    let mut sorted_events = collector.events.clone();
    sorted_events.sort_by_key(|e| e.seq_id);
    for event in &sorted_events {
      let since_start = event.timestamp.duration_since(collector.start_time);
      let fiber = event
        .fiber_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "---".to_string());
      println!(
        "  +{:<10.6}s [seq:{:<5}] tid:{:<14?} fiber:{:<6} loc:{:<28} evt:{:<28} {}",
        since_start.as_secs_f64(),
        event.seq_id,
        event.os_thread_id,
        fiber,
        event.location,
        event.event_type,
        event.message.as_deref().unwrap_or("")
      );
    }
    let mut sorted_counters: Vec<_> = collector.counters.iter().collect();
    sorted_counters.sort_by_key(|(k, _)| *k);
    for ((loc, name), count) in sorted_counters {
      println!("  loc:{loc:<28} counter:{name:<28} value: {count}");
    }
    println!("--- end of telemetry report ---");
  }

  pub fn clear_telemetry_fn() {
    if let Ok(mut collector) = GLOBAL_COLLECTOR.lock() {
      collector.events.clear();
      collector.counters.clear();
      collector.start_time = Instant::now();
    }
    NEXT_EVENT_SEQUENCE_ID.store(0, Ordering::Relaxed);
  }
}

#[cfg(not(feature = "telemetry"))]
pub mod disabled {
  #[inline(always)]
  pub fn log_event_fn(_location: &'static str, _event_type: &'static str, _message: Option<String>) {}
  #[inline(always)]
  pub fn increment_counter_fn(_location: &'static str, _counter_name: &'static str) {}
  #[inline(always)]
  pub fn print_telemetry_report_fn() {}
  #[inline(always)]
  pub fn clear_telemetry_fn() {}
}

#[cfg(feature = "telemetry")]
pub use enabled::{
  clear_telemetry_fn as clear_telemetry, increment_counter_fn as increment_counter,
  log_event_fn as log_event, print_telemetry_report_fn as print_telemetry_report,
};

#[cfg(not(feature = "telemetry"))]
pub use disabled::{
  clear_telemetry_fn as clear_telemetry, increment_counter_fn as increment_counter,
  log_event_fn as log_event, print_telemetry_report_fn as print_telemetry_report,
};
