//! Sink/filter chain (spec §4.6, §9). Sinks never reference the loggers
//! that write to them — the registry holds weak handles so a sink can
//! outlive every logger that once pointed at it, or be dropped out from
//! under a logger that still names it (the logger simply stops being
//! able to upgrade the weak reference and skips the write).

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::level::Level;

/// One formatted record ready to leave the process.
pub struct FormattedRecord<'a> {
  pub logger_name: &'a str,
  pub level: Level,
  pub timestamp_ns: u64,
  pub thread_id: u64,
  pub thread_name: &'a str,
  pub message: &'a str,
  /// `[(key, value), ...]` when the call site's template used named
  /// placeholders (spec §4.5/§4.6 "structured_args?"); `None` otherwise.
  pub structured: Option<&'a [(String, String)]>,
}

/// A destination for formatted records, adapted from the teacher's
/// `console_sink.rs` line-buffered-writer shape.
///
/// Each sink carries its own mutable level filter and `Filter` chain
/// (spec §3 "Sink carries a mutable log-level filter and a list of Filter
/// objects", §4.6 steps 2-3, P9): a record reaches `write` only if it
/// passes *this* sink's level gate and every filter this sink has
/// registered, independent of any other sink attached to the same logger —
/// one sink can accept a record another rejects. Implementors store this
/// state in a [`SinkCore`] and expose it through [`Sink::core`]; the rest
/// of the trait's gating methods are provided in terms of it.
pub trait Sink: Send + Sync {
  /// Shared level-filter/filter-chain state backing the default methods
  /// below.
  fn core(&self) -> &SinkCore;

  fn write(&self, record: &FormattedRecord<'_>);

  /// Called on the backend's idle path (spec §4.6 "flush/periodic_tick on
  /// the idle path"). Default is a no-op for sinks with nothing to batch.
  fn flush(&self) {}

  /// Called periodically regardless of whether any record arrived, so a
  /// sink can roll files, refresh a cached timestamp prefix, etc.
  fn periodic_tick(&self) {}

  fn level_filter(&self) -> Level {
    self.core().level_filter()
  }

  fn set_level_filter(&self, level: Level) {
    self.core().set_level_filter(level);
  }

  fn add_filter(&self, filter: Arc<dyn Filter>) {
    self.core().add_filter(filter);
  }

  /// Level filter then registered filters, per P9: a sink writes a record
  /// iff both accept it.
  fn accepts(&self, record: &FormattedRecord<'_>) -> bool {
    self.core().accepts(record)
  }
}

/// A predicate a record must pass before a sink's `write` is called
/// (spec §4.6).
pub trait Filter: Send + Sync {
  fn accept(&self, record: &FormattedRecord<'_>) -> bool;
}

/// Dirty-flag-gated filter list (spec §5 "new filter added" is a one-shot
/// snapshot refresh, not a per-record rebuild): `add` marks the cached
/// snapshot stale; `accepts` only pays the rebuild cost the first time it
/// runs after that, and otherwise reads the already-built snapshot.
#[derive(Default)]
pub struct FilterChain {
  filters: Mutex<Vec<Arc<dyn Filter>>>,
  dirty: AtomicBool,
  cached: Mutex<Arc<[Arc<dyn Filter>]>>,
}

impl FilterChain {
  pub fn add(&self, filter: Arc<dyn Filter>) {
    self.filters.lock().push(filter);
    self.dirty.store(true, Ordering::Release);
  }

  fn refresh_if_dirty(&self) {
    if self.dirty.swap(false, Ordering::AcqRel) {
      let snapshot: Arc<[Arc<dyn Filter>]> = self.filters.lock().clone().into();
      *self.cached.lock() = snapshot;
    }
  }

  pub fn accepts(&self, record: &FormattedRecord<'_>) -> bool {
    self.refresh_if_dirty();
    self.cached.lock().iter().all(|f| f.accept(record))
  }
}

/// Per-sink mutable level filter and [`FilterChain`], embedded by every
/// concrete `Sink` implementation (spec §3).
pub struct SinkCore {
  level: AtomicU8,
  filters: FilterChain,
}

impl Default for SinkCore {
  fn default() -> Self {
    // TraceL3 is the lowest severity, so every record passes by default —
    // a freshly attached sink filters nothing until told to.
    Self { level: AtomicU8::new(Level::TraceL3 as u8), filters: FilterChain::default() }
  }
}

impl SinkCore {
  pub fn level_filter(&self) -> Level {
    Level::from_u8(self.level.load(Ordering::Relaxed))
  }

  pub fn set_level_filter(&self, level: Level) {
    self.level.store(level as u8, Ordering::Relaxed);
  }

  pub fn add_filter(&self, filter: Arc<dyn Filter>) {
    self.filters.add(filter);
  }

  pub fn accepts(&self, record: &FormattedRecord<'_>) -> bool {
    record.level.passes(self.level_filter()) && self.filters.accepts(record)
  }
}

/// Name -> weak sink handle. A `Logger` holds `Arc<dyn Sink>`s directly
/// (spec §3); this registry exists only so `create_or_get_sink` can hand
/// back an existing sink by name without the registry itself keeping
/// sinks alive past their last logger (spec §9).
#[derive(Default)]
pub struct SinkRegistry {
  sinks: Mutex<std::collections::HashMap<String, Weak<dyn Sink>>>,
}

impl SinkRegistry {
  pub fn get_or_create<F: FnOnce() -> Arc<dyn Sink>>(&self, name: &str, make: F) -> Arc<dyn Sink> {
    let mut guard = self.sinks.lock();
    if let Some(existing) = guard.get(name).and_then(Weak::upgrade) {
      return existing;
    }
    let sink = make();
    guard.insert(name.to_string(), Arc::downgrade(&sink));
    sink
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Sink>> {
    self.sinks.lock().get(name).and_then(Weak::upgrade)
  }

  /// Drops registry entries whose sink has no remaining `Arc` owner.
  pub fn sweep(&self) {
    self.sinks.lock().retain(|_, weak| weak.strong_count() > 0);
  }

  /// Every sink still alive, for the backend's idle-path `periodic_tick`
  /// sweep (spec §4.6) — ticking goes through the registry rather than
  /// through any one logger since a sink may be shared by several.
  pub fn live_sinks(&self) -> Vec<Arc<dyn Sink>> {
    self.sinks.lock().values().filter_map(Weak::upgrade).collect()
  }
}

/// Line-buffered stdout sink, adapted from the teacher's `console_sink.rs`.
pub struct ConsoleSink {
  out: Mutex<std::io::BufWriter<std::io::Stdout>>,
  core: SinkCore,
}

impl Default for ConsoleSink {
  fn default() -> Self {
    Self { out: Mutex::new(std::io::BufWriter::new(std::io::stdout())), core: SinkCore::default() }
  }
}

impl Sink for ConsoleSink {
  fn core(&self) -> &SinkCore {
    &self.core
  }

  fn write(&self, record: &FormattedRecord<'_>) {
    let mut out = self.out.lock();
    let _ = write!(
      out,
      "[{}] {} {} (tid {}, {}) {}",
      record.timestamp_ns, record.level, record.logger_name, record.thread_id, record.thread_name, record.message
    );
    if let Some(pairs) = record.structured {
      for (key, value) in pairs {
        let _ = write!(out, " {key}={value}");
      }
    }
    let _ = writeln!(out);
  }

  fn flush(&self) {
    let _ = self.out.lock().flush();
  }
}

/// Discards every record. Used in tests/benchmarks where the point is to
/// measure the pipeline, not an I/O destination.
#[derive(Default)]
pub struct NullSink {
  core: SinkCore,
}

impl Sink for NullSink {
  fn core(&self) -> &SinkCore {
    &self.core
  }

  fn write(&self, _record: &FormattedRecord<'_>) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  struct RejectAll;
  impl Filter for RejectAll {
    fn accept(&self, _record: &FormattedRecord<'_>) -> bool {
      false
    }
  }

  #[test]
  fn filter_chain_rejects_when_any_filter_rejects() {
    let chain = FilterChain::default();
    chain.add(Arc::new(RejectAll));
    let record = FormattedRecord { logger_name: "root", level: Level::Info, timestamp_ns: 0, thread_id: 0, thread_name: "main", message: "hi", structured: None };
    assert!(!chain.accepts(&record));
  }

  #[test]
  fn empty_filter_chain_accepts_everything() {
    let chain = FilterChain::default();
    let record = FormattedRecord { logger_name: "root", level: Level::Info, timestamp_ns: 0, thread_id: 0, thread_name: "main", message: "hi", structured: None };
    assert!(chain.accepts(&record));
  }

  #[test]
  fn per_sink_filter_does_not_affect_a_sibling_sink() {
    // Same record, two sinks on the same logger: one rejects it via a
    // `Filter`, the other has none and must still accept it (spec P9 /
    // §4.6 steps 2-3 — the gate lives per sink, not per logger).
    let gated = NullSink::default();
    gated.add_filter(Arc::new(RejectAll));
    let open = NullSink::default();

    let record = FormattedRecord { logger_name: "root", level: Level::Info, timestamp_ns: 0, thread_id: 0, thread_name: "main", message: "hi", structured: None };
    assert!(!gated.accepts(&record));
    assert!(open.accepts(&record));
  }

  #[test]
  fn per_sink_level_filter_does_not_affect_a_sibling_sink() {
    let quiet = NullSink::default();
    quiet.set_level_filter(Level::Error);
    let verbose = NullSink::default();

    let record = FormattedRecord { logger_name: "root", level: Level::Info, timestamp_ns: 0, thread_id: 0, thread_name: "main", message: "hi", structured: None };
    assert!(!quiet.accepts(&record));
    assert!(verbose.accepts(&record));
  }

  #[test]
  fn sink_registry_reuses_live_sink_by_name() {
    let registry = SinkRegistry::default();
    let a = registry.get_or_create("console", || Arc::new(ConsoleSink::default()) as Arc<dyn Sink>);
    let b = registry.get_or_create("console", || panic!("should not rebuild a live sink"));
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[test]
  fn sink_registry_drops_entry_once_sink_is_gone() {
    let registry = SinkRegistry::default();
    {
      let _sink = registry.get_or_create("tmp", || Arc::new(NullSink::default()) as Arc<dyn Sink>);
    }
    registry.sweep();
    assert!(registry.get("tmp").is_none());
  }
}
