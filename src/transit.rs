//! Decoded, not-yet-emitted records, held per producer thread by the
//! backend (spec §3.5, §4.5).

use std::collections::VecDeque;

use crate::codec::args::DecodeFn;
use crate::level::{EventKind, Level};
use crate::logger::Logger;

/// One record pulled off a thread's queue and decoded, waiting to be
/// emitted in global timestamp order.
pub struct TransitEvent {
  pub timestamp_ns: u64,
  pub level: Level,
  pub event_kind: EventKind,
  pub thread_id: u64,
  pub thread_name: String,
  pub logger: &'static Logger,
  pub format_template: &'static str,
  pub file: &'static str,
  pub line: u32,
  pub function: &'static str,
  pub tag: Option<&'static str>,
  /// Raw argument bytes, still undecoded — kept this way so a record that
  /// never gets emitted (e.g. backtrace entries that are cleared rather
  /// than flushed) never pays the decode cost (spec §4.3 "decode pass ...
  /// only for the record selected for emission").
  pub payload: Box<[u8]>,
  pub decode_fn: DecodeFn,
}

/// Per-thread queue of pulled-but-not-yet-emitted records, owned
/// exclusively by the backend (spec §3.5).
#[derive(Default)]
pub struct TransitBuffer {
  events: VecDeque<TransitEvent>,
}

impl TransitBuffer {
  pub fn with_capacity(capacity: usize) -> Self {
    Self { events: VecDeque::with_capacity(capacity) }
  }

  pub fn push(&mut self, event: TransitEvent) {
    self.events.push_back(event);
  }

  pub fn front_timestamp(&self) -> Option<u64> {
    self.events.front().map(|e| e.timestamp_ns)
  }

  pub fn pop_front(&mut self) -> Option<TransitEvent> {
    self.events.pop_front()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }
}
