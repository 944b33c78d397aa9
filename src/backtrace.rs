//! Per-logger backtrace ring buffer (spec §4.7, §8 P8).
//!
//! `InitBacktrace` (re)sizes and enables capture of subsequent
//! `LogBacktrace`-kind records into the ring instead of emitting them
//! immediately. A record at or above the logger's backtrace-flush level
//! triggers a replay of the ring, in the order entries were captured,
//! followed by clearing it — giving the reader the lead-up to whatever
//! just went wrong.

use std::collections::VecDeque;

use crate::transit::TransitEvent;

pub struct BacktraceRing {
  capacity: usize,
  entries: VecDeque<TransitEvent>,
  enabled: bool,
}

impl BacktraceRing {
  pub fn new() -> Self {
    Self { capacity: 0, entries: VecDeque::new(), enabled: false }
  }

  /// Handles an `InitBacktrace` record: (re)configures the ring's
  /// capacity and turns capture on. Existing entries are dropped — a
  /// fresh `InitBacktrace` starts a fresh capture window (spec §4.7).
  pub fn init(&mut self, capacity: usize) {
    self.capacity = capacity;
    self.entries.clear();
    self.enabled = capacity > 0;
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Captures one `LogBacktrace`-kind record, evicting the oldest entry
  /// once the ring is at capacity.
  pub fn capture(&mut self, event: TransitEvent) {
    if !self.enabled {
      return;
    }
    if self.entries.len() >= self.capacity {
      self.entries.pop_front();
    }
    self.entries.push_back(event);
  }

  /// Handles a `FlushBacktrace` trigger (a record whose level meets the
  /// logger's backtrace-flush level): drains every captured entry in
  /// insertion order for the caller to emit, then clears the ring.
  pub fn drain_for_flush(&mut self) -> Vec<TransitEvent> {
    self.entries.drain(..).collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl Default for BacktraceRing {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ClockSource;
  use crate::level::{EventKind, Level};
  use crate::logger::LoggerRegistry;
  use crate::sink::NullSink;

  fn leaked_test_logger() -> &'static crate::logger::Logger {
    let registry = LoggerRegistry::default();
    let logger = registry.create_or_get("root", ClockSource::System, vec![std::sync::Arc::new(NullSink::default())], None);
    let ptr = std::sync::Arc::as_ptr(&logger);
    std::mem::forget(logger);
    std::mem::forget(registry);
    unsafe { &*ptr }
  }

  fn dummy_event(ts: u64) -> TransitEvent {
    TransitEvent {
      timestamp_ns: ts,
      level: Level::Debug,
      event_kind: EventKind::LogBacktrace,
      thread_id: 1,
      thread_name: "thread".to_string(),
      logger: leaked_test_logger(),
      format_template: "x",
      file: "f.rs",
      line: 1,
      function: "f",
      tag: None,
      payload: Box::new([]),
      decode_fn: <() as crate::codec::args::ArgList>::decode_fn(),
    }
  }

  #[test]
  fn evicts_oldest_once_full() {
    let mut ring = BacktraceRing::new();
    ring.init(2);
    ring.capture(dummy_event(1));
    ring.capture(dummy_event(2));
    ring.capture(dummy_event(3));
    let drained = ring.drain_for_flush();
    let timestamps: Vec<_> = drained.iter().map(|e| e.timestamp_ns).collect();
    assert_eq!(timestamps, vec![2, 3]);
  }

  #[test]
  fn drain_clears_the_ring() {
    let mut ring = BacktraceRing::new();
    ring.init(4);
    ring.capture(dummy_event(1));
    ring.drain_for_flush();
    assert!(ring.is_empty());
  }

  #[test]
  fn disabled_until_init() {
    let mut ring = BacktraceRing::new();
    assert!(!ring.is_enabled());
    ring.capture(dummy_event(1));
    assert!(ring.is_empty());
  }
}
