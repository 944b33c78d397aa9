//! Producer-side entry points (spec §6): acquire a logger, enqueue a
//! record, the flush barrier, backtrace controls, and backend lifecycle.
//!
//! Grounded in the teacher's `run_log.rs::init_logger`/`LoggerHandle`
//! shape (lazily register a per-thread producer, hand back a handle that
//! writes through it) generalized from one global queue to the full
//! logger/sink/backend architecture spec §3 describes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{Backend, BackendOptions, BackendStats};
use crate::clock::{read_tsc, system_now_ns, ClockSource};
use crate::codec::args::ArgList;
use crate::context::{current_thread_id, current_thread_name, ThreadContext, ThreadContextRegistry};
use crate::error::{default_error_notifier, ErrorEvent, QuillError};
use crate::level::{EventKind, Level, MacroMetadata};
use crate::logger::{Logger, LoggerRegistry};
use crate::queue::QueueType;
use crate::record;
use crate::sink::{Sink, SinkRegistry};

/// Whether a queue's backing memory should be requested from huge pages
/// (spec §6 "Frontend options"). Recognized but currently a no-op: the
/// mirrored double-mapping trick in `queue::bounded` maps a POSIX shared
/// memory object, and combining that with `MAP_HUGETLB` portably is not
/// guaranteed across platforms this crate targets, so every policy value
/// falls back to ordinary pages rather than risk silently corrupting the
/// mirrored mapping's contiguity guarantee.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HugePagesPolicy {
  #[default]
  Never,
  TryOnce,
  Always,
}

/// Compile-time-per-application queue configuration (spec §6 "Frontend
/// options").
#[derive(Clone, Debug)]
pub struct FrontendOptions {
  pub queue_type: QueueType,
  pub initial_queue_capacity: usize,
  pub blocking_queue_retry_interval: Duration,
  pub unbounded_queue_max_capacity: usize,
  pub huge_pages_policy: HugePagesPolicy,
}

impl Default for FrontendOptions {
  fn default() -> Self {
    Self {
      queue_type: QueueType::UnboundedBlocking,
      initial_queue_capacity: 64 * 1024,
      blocking_queue_retry_interval: Duration::from_micros(100),
      unbounded_queue_max_capacity: crate::queue::bounded::MAX_RECORD_SIZE,
      huge_pages_policy: HugePagesPolicy::Never,
    }
  }
}

thread_local! {
  /// Keyed by `Frontend` address: a process may run more than one
  /// independent frontend (e.g. in tests), each with its own per-thread
  /// registration.
  static THREAD_CONTEXTS: RefCell<HashMap<usize, Arc<ThreadContext>>> = RefCell::new(HashMap::new());
}

/// Owns every process-wide registry plus the (optional) running backend.
/// Usually constructed once per process and shared via `Arc`.
pub struct Frontend {
  options: FrontendOptions,
  contexts: Arc<ThreadContextRegistry>,
  loggers: LoggerRegistry,
  sinks: Arc<SinkRegistry>,
  backend: Mutex<Option<Backend>>,
}

impl Frontend {
  pub fn new(options: FrontendOptions) -> Arc<Self> {
    Arc::new(Self {
      options,
      contexts: Arc::new(ThreadContextRegistry::default()),
      loggers: LoggerRegistry::default(),
      sinks: Arc::new(SinkRegistry::default()),
      backend: Mutex::new(None),
    })
  }

  fn thread_context(&self) -> Arc<ThreadContext> {
    let key = self as *const Self as usize;
    THREAD_CONTEXTS.with(|cell| {
      let mut map = cell.borrow_mut();
      if let Some(ctx) = map.get(&key) {
        return Arc::clone(ctx);
      }
      let ctx = self.contexts.register(
        self.options.queue_type,
        self.options.initial_queue_capacity,
        self.options.unbounded_queue_max_capacity,
        current_thread_id(),
        current_thread_name(),
      );
      map.insert(key, Arc::clone(&ctx));
      ctx
    })
  }

  /// Touches this thread's context so the first real log call doesn't pay
  /// for registration (spec §6 `preallocate`).
  pub fn preallocate(&self) {
    self.thread_context();
  }

  pub fn create_or_get_logger(
    self: &Arc<Self>,
    name: &str,
    clock_source: ClockSource,
    sinks: Vec<Arc<dyn Sink>>,
    tag: Option<&'static str>,
  ) -> LoggerHandle {
    let logger = self.loggers.create_or_get(name, clock_source, sinks, tag);
    LoggerHandle { logger, frontend: Arc::clone(self) }
  }

  pub fn get_logger(self: &Arc<Self>, name: &str) -> Option<LoggerHandle> {
    self.loggers.get(name).map(|logger| LoggerHandle { logger, frontend: Arc::clone(self) })
  }

  pub fn remove_logger(&self, name: &str) {
    self.loggers.remove(name);
  }

  pub fn create_or_get_sink<F: FnOnce() -> Arc<dyn Sink>>(&self, name: &str, make: F) -> Arc<dyn Sink> {
    self.sinks.get_or_create(name, make)
  }

  /// Spawns the backend worker. Idempotent: a second call while one is
  /// already running is a no-op (spec §6 "idempotent").
  pub fn start_backend(
    &self,
    options: BackendOptions,
    error_notifier: Option<Arc<dyn Fn(ErrorEvent) + Send + Sync>>,
  ) -> Result<(), QuillError> {
    let mut guard = self.backend.lock();
    if guard.is_some() {
      return Ok(());
    }
    let notifier = error_notifier.unwrap_or_else(|| Arc::new(default_error_notifier) as Arc<dyn Fn(ErrorEvent) + Send + Sync>);
    let backend = Backend::start(options, Arc::clone(&self.contexts), Arc::clone(&self.sinks), notifier)?;
    *guard = Some(backend);
    Ok(())
  }

  pub fn stop_backend(&self) {
    if let Some(backend) = self.backend.lock().take() {
      backend.stop();
    }
  }

  pub fn is_backend_running(&self) -> bool {
    self.backend.lock().as_ref().is_some_and(|b| b.is_running())
  }

  pub fn backend_stats(&self) -> Option<BackendStats> {
    self.backend.lock().as_ref().map(|b| b.stats())
  }

  /// Wakes the backend from its idle sleep (spec §6 `Backend::notify`). A
  /// no-op if the backend isn't running.
  pub fn notify_backend(&self) {
    if let Some(backend) = self.backend.lock().as_ref() {
      backend.notify();
    }
  }
}

/// A logger bound to the frontend that produced it: the handle producer
/// threads actually call `log`/`flush_log`/backtrace operations on.
pub struct LoggerHandle {
  logger: Arc<Logger>,
  frontend: Arc<Frontend>,
}

impl std::ops::Deref for LoggerHandle {
  type Target = Logger;
  fn deref(&self) -> &Logger {
    &self.logger
  }
}

impl LoggerHandle {
  /// Encodes and enqueues one record (spec §4.4). Returns `false` only
  /// when a Dropping-policy queue rejected the reservation; every other
  /// outcome either succeeds or retries until it does.
  pub fn log<A: ArgList>(&self, level: Level, metadata: &'static MacroMetadata, args: A) -> bool {
    if !level.passes(self.logger.level()) {
      return false;
    }
    self.enqueue(level, metadata, args)
  }

  fn enqueue<A: ArgList>(&self, level: Level, metadata: &'static MacroMetadata, args: A) -> bool {
    let timestamp_raw = match self.logger.clock_source {
      ClockSource::Tsc => read_tsc(),
      ClockSource::System | ClockSource::User => system_now_ns(),
    };

    let ctx = self.frontend.thread_context();
    let scratch = ctx.scratch_mut();
    scratch.reset();
    let payload_size = args.wire_size(scratch);
    let total_size = record::HEADER_SIZE + payload_size;

    let is_special = matches!(metadata.event_kind, EventKind::Flush | EventKind::InitBacktrace | EventKind::FlushBacktrace);
    let retry_interval = self.frontend.options.blocking_queue_retry_interval;
    let is_blocking_queue = self.frontend.options.queue_type.is_blocking();

    loop {
      let producer = ctx.producer_mut();
      if let Some(dst) = producer.reserve(total_size) {
        record::encode_header(&mut dst[..record::HEADER_SIZE], metadata, A::decode_fn(), &self.logger, timestamp_raw);
        scratch.rewind_for_encode();
        args.encode(&mut dst[record::HEADER_SIZE..], scratch);
        producer.commit_write(total_size);
        let _ = level; // level already gated in `log`; kept for symmetry with dynamic-level call sites
        return true;
      }

      if is_special || is_blocking_queue {
        ctx.blocked_count.fetch_add(1, Ordering::Relaxed);
        std::thread::sleep(retry_interval);
        continue;
      }

      ctx.dropped_count.fetch_add(1, Ordering::Relaxed);
      return false;
    }
  }

  /// Flush barrier (spec §4.4): enqueues a `Flush` record carrying the
  /// address of a stack-allocated flag, then spins until the backend sets
  /// it — which happens only once every record this thread enqueued
  /// before the call has been emitted.
  pub fn flush_log(&self) {
    let flag = Box::new(AtomicBool::new(false));
    let flag_ptr = Box::into_raw(flag);

    static FLUSH_METADATA: MacroMetadata = MacroMetadata::new("", 0, "", "", Level::None, EventKind::Flush);
    let payload = (flag_ptr as usize).to_le_bytes();
    self.enqueue_raw(&FLUSH_METADATA, &payload);

    let flag = unsafe { &*flag_ptr };
    while !flag.load(Ordering::Acquire) {
      std::thread::sleep(Duration::from_micros(50));
    }
    unsafe {
      drop(Box::from_raw(flag_ptr));
    }
  }

  pub fn init_backtrace(&self, capacity: usize, flush_level: Level) {
    self.logger.set_backtrace_flush_level(flush_level);
    static INIT_BACKTRACE_METADATA: MacroMetadata = MacroMetadata::new("", 0, "", "", Level::Backtrace, EventKind::InitBacktrace);
    self.enqueue_raw(&INIT_BACKTRACE_METADATA, &(capacity as u64).to_le_bytes());
  }

  pub fn flush_backtrace(&self) {
    static FLUSH_BACKTRACE_METADATA: MacroMetadata = MacroMetadata::new("", 0, "", "", Level::Backtrace, EventKind::FlushBacktrace);
    self.enqueue_raw(&FLUSH_BACKTRACE_METADATA, &[]);
  }

  /// Shared path for the fixed-shape control records (`Flush`,
  /// `InitBacktrace`, `FlushBacktrace`): raw bytes, no codec involved,
  /// never dropped (spec §4.4 "special metadata events ... never dropped").
  fn enqueue_raw(&self, metadata: &'static MacroMetadata, payload: &[u8]) {
    let timestamp_raw = match self.logger.clock_source {
      ClockSource::Tsc => read_tsc(),
      ClockSource::System | ClockSource::User => system_now_ns(),
    };
    let total_size = record::HEADER_SIZE + payload.len();
    let ctx = self.frontend.thread_context();
    let retry_interval = self.frontend.options.blocking_queue_retry_interval;

    loop {
      let producer = ctx.producer_mut();
      if let Some(dst) = producer.reserve(total_size) {
        record::encode_header(&mut dst[..record::HEADER_SIZE], metadata, <() as ArgList>::decode_fn(), &self.logger, timestamp_raw);
        dst[record::HEADER_SIZE..total_size].copy_from_slice(payload);
        producer.commit_write(total_size);
        return;
      }
      ctx.blocked_count.fetch_add(1, Ordering::Relaxed);
      std::thread::sleep(retry_interval);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::Str;
  use crate::sink::{FormattedRecord, NullSink, SinkCore};
  use std::sync::atomic::AtomicUsize;

  struct CountingSink {
    count: AtomicUsize,
    flushes: AtomicUsize,
    core: SinkCore,
  }

  impl Sink for CountingSink {
    fn core(&self) -> &SinkCore {
      &self.core
    }

    fn write(&self, _record: &FormattedRecord<'_>) {
      self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn flush(&self) {
      self.flushes.fetch_add(1, Ordering::Relaxed);
    }
  }

  static MSG_METADATA: MacroMetadata = MacroMetadata::new("f.rs", 1, "f", "hello {}", Level::Info, EventKind::Log);

  #[test]
  fn log_then_flush_drains_through_backend() {
    let frontend = Frontend::new(FrontendOptions::default());
    let sink = Arc::new(CountingSink { count: AtomicUsize::new(0), flushes: AtomicUsize::new(0), core: SinkCore::default() });
    let logger = frontend.create_or_get_logger("test", ClockSource::System, vec![sink.clone()], None);

    frontend.start_backend(BackendOptions::default(), None).unwrap();

    for _ in 0..10 {
      logger.log(Level::Info, &MSG_METADATA, (Str("hi"),));
    }
    logger.flush_log();

    assert_eq!(sink.count.load(Ordering::Relaxed), 10);
    // flush_log must not unblock until every live sink has actually been
    // flushed, not merely had its records written.
    assert!(sink.flushes.load(Ordering::Relaxed) >= 1);
    frontend.stop_backend();
  }

  #[test]
  fn level_gate_skips_enqueue() {
    let frontend = Frontend::new(FrontendOptions::default());
    let logger = frontend.create_or_get_logger("gated", ClockSource::System, vec![Arc::new(NullSink::default())], None);
    logger.set_level(Level::Error);
    assert!(!logger.log(Level::Info, &MSG_METADATA, (Str("skip"),)));
  }

  #[test]
  fn preallocate_registers_thread_context_once() {
    let frontend = Frontend::new(FrontendOptions::default());
    frontend.preallocate();
    let first = frontend.thread_context();
    let second = frontend.thread_context();
    assert!(Arc::ptr_eq(&first, &second));
  }
}
