//! Logger and its process-wide registry (spec §3, §3.6).

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::ClockSource;
use crate::level::Level;
use crate::sink::Sink;

/// A named destination for log calls: a clock source, an ordered list of
/// sinks, an atomic level gate, and the backtrace-flush level that decides
/// which level triggers a replay of this logger's backtrace ring
/// (spec §4.7).
///
/// The level filter and `Filter` chain that gate an individual sink's
/// dispatch live on the `Sink` itself (spec §3, §4.6 steps 2-3), not here —
/// a `Logger` only decides whether a record is enabled at all.
pub struct Logger {
  pub id: u64,
  pub name: String,
  pub clock_source: ClockSource,
  pub sinks: Vec<Arc<dyn Sink>>,
  level: AtomicU8,
  backtrace_flush_level: AtomicU8,
  valid: std::sync::atomic::AtomicBool,
  /// Propagated into call-site metadata; harmless to carry even though
  /// nothing in this crate currently filters on it (spec §3.6 NEW).
  pub tag: Option<&'static str>,
}

impl Logger {
  fn new(id: u64, name: String, clock_source: ClockSource, sinks: Vec<Arc<dyn Sink>>, tag: Option<&'static str>) -> Arc<Self> {
    Arc::new(Logger {
      id,
      name,
      clock_source,
      sinks,
      level: AtomicU8::new(Level::Info as u8),
      backtrace_flush_level: AtomicU8::new(Level::None as u8),
      valid: std::sync::atomic::AtomicBool::new(true),
      tag,
    })
  }

  #[inline]
  pub fn level(&self) -> Level {
    Level::from_u8(self.level.load(Ordering::Relaxed))
  }

  pub fn set_level(&self, level: Level) {
    self.level.store(level as u8, Ordering::Relaxed);
  }

  #[inline]
  pub fn backtrace_flush_level(&self) -> Level {
    Level::from_u8(self.backtrace_flush_level.load(Ordering::Relaxed))
  }

  pub fn set_backtrace_flush_level(&self, level: Level) {
    self.backtrace_flush_level.store(level as u8, Ordering::Relaxed);
  }

  #[inline]
  pub fn is_enabled(&self, level: Level) -> bool {
    level.passes(self.level())
  }

  pub fn is_valid(&self) -> bool {
    self.valid.load(Ordering::Acquire)
  }

  fn invalidate(&self) {
    self.valid.store(false, Ordering::Release);
  }
}

/// Name -> `Arc<Logger>`, mutex-protected (spec §3.6). Loggers are looked
/// up far less often than they're logged through, so a single mutex
/// (rather than a per-bucket scheme) is adequate.
#[derive(Default)]
pub struct LoggerRegistry {
  loggers: Mutex<std::collections::HashMap<String, Arc<Logger>>>,
  next_id: AtomicU64,
}

impl LoggerRegistry {
  pub fn create_or_get(
    &self,
    name: &str,
    clock_source: ClockSource,
    sinks: Vec<Arc<dyn Sink>>,
    tag: Option<&'static str>,
  ) -> Arc<Logger> {
    let mut guard = self.loggers.lock();
    if let Some(existing) = guard.get(name) {
      if existing.is_valid() {
        return Arc::clone(existing);
      }
    }
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let logger = Logger::new(id, name.to_string(), clock_source, sinks, tag);
    guard.insert(name.to_string(), Arc::clone(&logger));
    logger
  }

  pub fn get(&self, name: &str) -> Option<Arc<Logger>> {
    self.loggers.lock().get(name).cloned()
  }

  /// Removes `name` from the registry; existing `Arc<Logger>` holders (in
  /// particular, in-flight transit records) keep a valid reference, but
  /// the logger is marked invalid so it stops accepting new records
  /// (spec §6 `remove_logger`).
  pub fn remove(&self, name: &str) {
    if let Some(logger) = self.loggers.lock().remove(name) {
      logger.invalidate();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sink::NullSink;

  #[test]
  fn create_or_get_returns_same_logger_by_name() {
    let registry = LoggerRegistry::default();
    let a = registry.create_or_get("root", ClockSource::System, vec![Arc::new(NullSink::default())], None);
    let b = registry.create_or_get("root", ClockSource::System, vec![Arc::new(NullSink::default())], None);
    assert_eq!(a.id, b.id);
  }

  #[test]
  fn removed_logger_is_invalid_but_existing_handle_still_works() {
    let registry = LoggerRegistry::default();
    let logger = registry.create_or_get("root", ClockSource::System, vec![Arc::new(NullSink::default())], None);
    registry.remove("root");
    assert!(!logger.is_valid());
    assert_eq!(logger.name, "root");
  }

  #[test]
  fn level_gate_respects_backtrace_bypass() {
    let registry = LoggerRegistry::default();
    let logger = registry.create_or_get("root", ClockSource::System, vec![Arc::new(NullSink::default())], None);
    logger.set_level(Level::Warning);
    assert!(!logger.is_enabled(Level::Info));
    assert!(logger.is_enabled(Level::Error));
    assert!(logger.is_enabled(Level::Backtrace));
  }
}
