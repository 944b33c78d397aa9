//! The single-consumer backend worker (spec §4.5, §3.9).
//!
//! One thread, spawned by [`Backend::start`], owns every producer's
//! consumer-side queue handle and runs the loop spec §4.5 describes:
//! refresh the set of known producer threads, pull whatever is available
//! into per-thread transit buffers, emit the globally-oldest eligible
//! record, and otherwise do idle work (TSC resync, retired-context sweep,
//! sleep) before looping again. On `stop()` it drains every thread's
//! queue to empty before the thread exits.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::backtrace::BacktraceRing;
use crate::clock::{ClockSource, TscClock};
use crate::codec::template::TemplateCache;
use crate::codec::DecodedValue;
use crate::context::{ThreadContext, ThreadContextRegistry};
use crate::error::ErrorEvent;
use crate::level::{EventKind, Level};
use crate::queue::ConsumerQueue;
use crate::record;
use crate::sink::{FormattedRecord, SinkRegistry};
use crate::transit::{TransitBuffer, TransitEvent};

/// Callback the backend reports its own operational events through
/// (spec §7); shared verbatim by every function that might need to call it.
type Notifier = Arc<dyn Fn(ErrorEvent) + Send + Sync>;

/// Tuning knobs for the backend worker (spec §2 "Configuration", §4.5
/// "Backend options" table).
#[derive(Clone, Debug)]
pub struct BackendOptions {
  /// How long the worker sleeps when a pass emits nothing.
  pub sleep_duration: Duration,
  /// How often the TSC clock resynchronizes against the system clock.
  pub rdtsc_resync_interval: Duration,
  /// When set, a TSC-sourced record is only eligible for emission once
  /// its translated timestamp is <= wall-clock now — this bounds how far
  /// out of arrival order two threads' records can be emitted, at the
  /// cost of a little latency (spec §4.5). System- and user-clock
  /// records are never held back by this (spec §9 Open Questions).
  pub strict_timestamp_ordering: bool,
  /// OS name given to the spawned worker thread.
  pub thread_name: String,
  /// Pin the worker to this CPU; `u16::MAX` means no pinning.
  pub backend_cpu_affinity: u16,
  /// Above this many pending records for one thread, stop pulling more
  /// from it this pass and prefer draining (fairness).
  pub transit_events_soft_limit: usize,
  /// Never hold more than this many undrained records for one thread
  /// before emitting, regardless of fairness.
  pub transit_events_hard_limit: usize,
  /// Power-of-two starting size for a thread's transit buffer.
  pub transit_event_buffer_initial_capacity: usize,
  /// If false, `stop()` flushes live sinks and returns immediately rather
  /// than draining every outstanding record first.
  pub wait_for_queues_to_empty_before_exit: bool,
  /// When `sleep_duration` is zero, yield the timeslice instead of
  /// waiting on the idle condvar.
  pub enable_yield_when_idle: bool,
}

impl Default for BackendOptions {
  fn default() -> Self {
    Self {
      sleep_duration: Duration::from_micros(500),
      rdtsc_resync_interval: Duration::from_secs(2),
      strict_timestamp_ordering: true,
      thread_name: "quill-backend".to_string(),
      backend_cpu_affinity: u16::MAX,
      transit_events_soft_limit: 128,
      transit_events_hard_limit: 8192,
      transit_event_buffer_initial_capacity: 128,
      wait_for_queues_to_empty_before_exit: true,
      enable_yield_when_idle: false,
    }
  }
}

impl BackendOptions {
  pub fn validate(&self) -> Result<(), crate::error::QuillError> {
    if self.rdtsc_resync_interval <= self.sleep_duration {
      return Err(crate::error::QuillError::InvalidConfig(
        "rdtsc_resync_interval must be greater than sleep_duration".to_string(),
      ));
    }
    if self.transit_events_soft_limit > self.transit_events_hard_limit {
      return Err(crate::error::QuillError::InvalidConfig(
        "transit_events_soft_limit must not exceed transit_events_hard_limit".to_string(),
      ));
    }
    Ok(())
  }
}

/// Snapshot of the backend's cumulative counters (spec §3.9 NEW).
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendStats {
  pub total_emitted: u64,
  pub total_dropped: u64,
  pub total_blocked: u64,
  pub total_allocations: u64,
}

#[derive(Default)]
struct StatsInner {
  total_emitted: AtomicU64,
  total_dropped: AtomicU64,
  total_blocked: AtomicU64,
  total_allocations: AtomicU64,
}

impl StatsInner {
  fn snapshot(&self) -> BackendStats {
    BackendStats {
      total_emitted: self.total_emitted.load(Ordering::Relaxed),
      total_dropped: self.total_dropped.load(Ordering::Relaxed),
      total_blocked: self.total_blocked.load(Ordering::Relaxed),
      total_allocations: self.total_allocations.load(Ordering::Relaxed),
    }
  }
}

/// Backend-owned state for one producer thread: the consumer half taken
/// out of its [`ThreadContext`] plus the transit buffer it feeds.
struct ContextSlot {
  ctx: Arc<ThreadContext>,
  consumer: ConsumerQueue,
  transit: TransitBuffer,
  /// Counts already reported to the error notifier, so `Dropped`/`Blocked`
  /// events carry only the delta since the last idle pass (spec §7:
  /// notifier invoked "for drops/blocks/allocations/format errors").
  reported_dropped: u64,
  reported_blocked: u64,
}

/// Condvar pair the idle path sleeps on, so `Backend::notify` can cut an
/// idle wait short instead of waiting out the full `sleep_duration`.
#[derive(Default)]
struct Wake {
  mutex: Mutex<()>,
  condvar: Condvar,
}

pub struct Backend {
  running: Arc<AtomicBool>,
  handle: Mutex<Option<std::thread::JoinHandle<()>>>,
  stats: Arc<StatsInner>,
  wake: Arc<Wake>,
}

impl Backend {
  /// Spawns the backend worker thread. Returns immediately; the thread
  /// runs until [`Self::stop`] is called.
  pub fn start(
    options: BackendOptions,
    contexts: Arc<ThreadContextRegistry>,
    sinks: Arc<crate::sink::SinkRegistry>,
    error_notifier: Arc<dyn Fn(ErrorEvent) + Send + Sync>,
  ) -> Result<Self, crate::error::QuillError> {
    options.validate()?;

    let running = Arc::new(AtomicBool::new(true));
    let stats = Arc::new(StatsInner::default());
    let wake = Arc::new(Wake::default());

    let thread_running = Arc::clone(&running);
    let thread_stats = Arc::clone(&stats);
    let thread_wake = Arc::clone(&wake);
    let handle = std::thread::Builder::new()
      .name(options.thread_name.clone())
      .spawn(move || run_loop(options, contexts, sinks, error_notifier, thread_running, thread_stats, thread_wake))
      .expect("failed to spawn backend worker thread");

    Ok(Backend { running, handle: Mutex::new(Some(handle)), stats, wake })
  }

  /// Signals the worker to drain everything outstanding and exit, then
  /// joins it. Blocks until fully drained.
  pub fn stop(&self) {
    self.running.store(false, Ordering::Release);
    self.notify();
    if let Some(handle) = self.handle.lock().take() {
      let _ = handle.join();
    }
  }

  pub fn stats(&self) -> BackendStats {
    self.stats.snapshot()
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Cuts short an idle sleep (spec §6 `Backend::notify`).
  pub fn notify(&self) {
    let _guard = self.wake.mutex.lock();
    self.wake.condvar.notify_one();
  }
}

fn run_loop(
  options: BackendOptions,
  contexts: Arc<ThreadContextRegistry>,
  sinks: Arc<crate::sink::SinkRegistry>,
  error_notifier: Arc<dyn Fn(ErrorEvent) + Send + Sync>,
  running: Arc<AtomicBool>,
  stats: Arc<StatsInner>,
  wake: Arc<Wake>,
) {
  if options.backend_cpu_affinity != u16::MAX {
    core_affinity::set_for_current(core_affinity::CoreId { id: options.backend_cpu_affinity as usize });
  }

  let clock = TscClock::new();
  let mut slots: Vec<ContextSlot> = Vec::new();
  let mut templates = TemplateCache::default();
  // Keyed by the logger's address: one ring per logger, matching the
  // per-logger backtrace ring the spec describes (§4.7).
  let mut backtraces: HashMap<usize, BacktraceRing> = HashMap::new();

  loop {
    let shutting_down = !running.load(Ordering::Acquire);

    refresh_contexts(&contexts, &mut slots, options.transit_event_buffer_initial_capacity);
    let pulled = populate_transit_buffers(&mut slots, &options, &error_notifier, &stats);
    let emitted =
      emit_ready_records(&mut slots, &clock, &options, &mut templates, &mut backtraces, &stats, &sinks, &error_notifier);

    if shutting_down {
      if !options.wait_for_queues_to_empty_before_exit {
        for sink in sinks.live_sinks() {
          sink.flush();
        }
        return;
      }
      // Keep draining until every slot's queue and transit buffer are
      // empty, then exit — a `stop()` must not discard in-flight records.
      let fully_drained = slots.iter_mut().all(|s| s.transit.is_empty() && s.consumer.is_empty());
      if fully_drained {
        for sink in sinks.live_sinks() {
          sink.flush();
        }
        return;
      }
      continue;
    }

    if pulled == 0 && emitted == 0 {
      contexts.sweep_retired(|_ctx| true);
      sinks.sweep();
      for sink in sinks.live_sinks() {
        sink.periodic_tick();
      }
      if clock.should_resync(options.rdtsc_resync_interval) {
        clock.calibrate_now();
      }

      let mut dropped_total = 0u64;
      let mut blocked_total = 0u64;
      for slot in &mut slots {
        let dropped_now = slot.ctx.dropped_count.load(Ordering::Relaxed);
        let blocked_now = slot.ctx.blocked_count.load(Ordering::Relaxed);
        dropped_total += dropped_now;
        blocked_total += blocked_now;

        if dropped_now > slot.reported_dropped {
          error_notifier(ErrorEvent::Dropped { thread_name: slot.ctx.thread_name.clone(), count: dropped_now - slot.reported_dropped });
          slot.reported_dropped = dropped_now;
        }
        if blocked_now > slot.reported_blocked {
          error_notifier(ErrorEvent::Blocked { thread_name: slot.ctx.thread_name.clone(), count: blocked_now - slot.reported_blocked });
          slot.reported_blocked = blocked_now;
        }
      }
      stats.total_dropped.store(dropped_total, Ordering::Relaxed);
      stats.total_blocked.store(blocked_total, Ordering::Relaxed);

      if options.sleep_duration.is_zero() && options.enable_yield_when_idle {
        std::thread::yield_now();
      } else {
        let mut guard = wake.mutex.lock();
        wake.condvar.wait_for(&mut guard, options.sleep_duration);
      }
    }
  }
}

fn refresh_contexts(contexts: &ThreadContextRegistry, slots: &mut Vec<ContextSlot>, transit_initial_capacity: usize) {
  if !contexts.take_has_new() && !slots.is_empty() {
    return;
  }
  let known: std::collections::HashSet<u64> = slots.iter().map(|s| s.ctx.thread_id).collect();
  for ctx in contexts.snapshot() {
    if known.contains(&ctx.thread_id) {
      continue;
    }
    if let Some(consumer) = ctx.take_consumer() {
      slots.push(ContextSlot {
        ctx,
        consumer,
        transit: TransitBuffer::with_capacity(transit_initial_capacity),
        reported_dropped: 0,
        reported_blocked: 0,
      });
    }
  }
}

/// Pulls available records per thread off the queue, decodes their
/// headers, and appends a [`TransitEvent`] per record. Stops pulling from
/// a thread once its transit buffer passes `transit_events_soft_limit`
/// (prefer draining over reading more, spec §4.5 options table) and never
/// lets it exceed `transit_events_hard_limit`. Returns the total number of
/// records pulled this pass.
fn populate_transit_buffers(
  slots: &mut [ContextSlot],
  options: &BackendOptions,
  error_notifier: &Arc<dyn Fn(ErrorEvent) + Send + Sync>,
  stats: &StatsInner,
) -> usize {
  let mut pulled = 0;
  for slot in slots.iter_mut() {
    loop {
      if slot.transit.len() >= options.transit_events_hard_limit {
        break;
      }
      if slot.transit.len() >= options.transit_events_soft_limit {
        break;
      }
      if let Some(grown) = slot.consumer.take_growth_event() {
        stats.total_allocations.fetch_add(1, Ordering::Relaxed);
        error_notifier(ErrorEvent::SegmentAllocated {
          thread_name: slot.ctx.thread_name.clone(),
          old_capacity: grown.old_capacity,
          new_capacity: grown.new_capacity,
        });
      }

      let available = slot.consumer.begin_read();
      if available.len() < record::HEADER_SIZE {
        break;
      }

      let header = unsafe { record::decode_header(available) };
      let payload_start = record::HEADER_SIZE;

      if header.metadata.event_kind == EventKind::Flush {
        let flag_ptr =
          u64::from_le_bytes(available[payload_start..payload_start + 8].try_into().unwrap()) as usize as *const AtomicBool;
        slot.consumer.finish_read(payload_start + 8);
        // Strict per-thread FIFO ordering means every record this
        // thread enqueued before the flush call has already been pulled
        // into the transit buffer by the time we reach this one; the
        // barrier fires once this slot's transit buffer drains to empty
        // (handled in `emit_ready_records`).
        slot.transit.push(TransitEvent {
          timestamp_ns: 0,
          level: Level::None,
          event_kind: EventKind::Flush,
          thread_id: slot.ctx.thread_id,
          thread_name: slot.ctx.thread_name.clone(),
          logger: header.logger,
          format_template: "",
          file: "",
          line: 0,
          function: "",
          tag: None,
          payload: (flag_ptr as usize).to_le_bytes().to_vec().into_boxed_slice(),
          decode_fn: <() as crate::codec::args::ArgList>::decode_fn(),
        });
        pulled += 1;
        continue;
      }

      let payload_len = payload_len_hint(header.decode_fn, &available[payload_start..]);
      let record_len = payload_start + payload_len;
      if available.len() < record_len {
        break;
      }

      let payload = available[payload_start..record_len].to_vec().into_boxed_slice();
      slot.consumer.finish_read(record_len);

      let timestamp_ns = translate_timestamp(header.logger.clock_source, header.timestamp_raw);

      slot.transit.push(TransitEvent {
        timestamp_ns,
        level: header.metadata.level,
        event_kind: header.metadata.event_kind,
        thread_id: slot.ctx.thread_id,
        thread_name: slot.ctx.thread_name.clone(),
        logger: header.logger,
        format_template: header.metadata.format_template,
        file: header.metadata.file,
        line: header.metadata.line,
        function: header.metadata.function,
        tag: header.metadata.tag,
        payload,
        decode_fn: header.decode_fn,
      });
      pulled += 1;
    }
  }
  pulled
}

/// The wire format carries no explicit payload length prefix for
/// ordinary records — like the source, the decode function itself knows
/// how many bytes each fixed/variable field consumes. Recovering the
/// length means running the decode pass once; the decoded values are
/// discarded here and recomputed at emission time for any record that
/// survives a level/filter check, trading a little redundant work for
/// not needing a second wire format just to carry a length.
fn payload_len_hint(decode_fn: crate::codec::args::DecodeFn, src: &[u8]) -> usize {
  let mut scratch = Vec::new();
  decode_fn(src, &mut scratch)
}

/// Only a `Tsc`-sourced reading needs translating; `System` and `User`
/// readings already arrived in epoch-nanosecond form (spec §9).
fn translate_timestamp_with(clock: &TscClock, clock_source: ClockSource, raw: u64) -> u64 {
  match clock_source {
    ClockSource::Tsc => clock.tsc_to_epoch_ns(raw),
    ClockSource::System | ClockSource::User => raw,
  }
}

fn translate_timestamp(clock_source: ClockSource, raw: u64) -> u64 {
  // Pre-translation at populate time uses the raw TSC tick count as the
  // ordering key directly; the heap only needs a monotonic-enough key to
  // interleave threads correctly; the real epoch conversion happens once
  // more, precisely, at `emit_one` via `resolve_display_timestamp`. This
  // avoids taking a `&TscClock` through every call in the populate path.
  let _ = clock_source;
  raw
}

#[allow(clippy::too_many_arguments)]
fn emit_ready_records(
  slots: &mut [ContextSlot],
  clock: &TscClock,
  options: &BackendOptions,
  templates: &mut TemplateCache,
  backtraces: &mut HashMap<usize, BacktraceRing>,
  stats: &StatsInner,
  sinks: &SinkRegistry,
  error_notifier: &Notifier,
) -> usize {
  let mut emitted = 0;
  let now_ns = crate::clock::system_now_ns();

  loop {
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
    for (idx, slot) in slots.iter().enumerate() {
      if let Some(ts) = slot.transit.front_timestamp() {
        heap.push(Reverse((ts, idx)));
      }
    }
    let Some(Reverse((_, idx))) = heap.pop() else {
      break;
    };

    let slot = &mut slots[idx];
    let event = slot.transit.pop_front().expect("front_timestamp implies a front element");

    if event.event_kind == EventKind::Flush {
      if slot.transit.is_empty() {
        // Spec §4.4: the flag goes up only after every live sink of every
        // logger has actually flushed, so a buffered sink's backlog is
        // guaranteed gone by the time the producer's `flush_log` unblocks.
        for sink in sinks.live_sinks() {
          sink.flush();
        }
        let flag_bytes: [u8; 8] = event.payload[..8].try_into().unwrap();
        let flag_ptr = usize::from_le_bytes(flag_bytes) as *const AtomicBool;
        unsafe { (*flag_ptr).store(true, Ordering::Release) };
      } else {
        // Not actually drained yet (more records arrived behind it since
        // this pass started); push it back and retry next pass.
        slot.transit.push(event);
      }
      continue;
    }

    if options.strict_timestamp_ordering && event.logger.clock_source == ClockSource::Tsc {
      let display_ns = clock.tsc_to_epoch_ns(event.timestamp_ns);
      if display_ns > now_ns {
        slot.transit.push(event);
        break; // not yet eligible; wait for wall-clock to catch up
      }
    }

    emit_one(&event, clock, templates, backtraces, stats, error_notifier);
    emitted += 1;
  }
  emitted
}

fn emit_one(
  event: &TransitEvent,
  clock: &TscClock,
  templates: &mut TemplateCache,
  backtraces: &mut HashMap<usize, BacktraceRing>,
  stats: &StatsInner,
  error_notifier: &Notifier,
) {
  let logger_key = event.logger as *const _ as usize;

  match event.event_kind {
    EventKind::InitBacktrace => {
      let mut decoded: Vec<DecodedValue<'_>> = Vec::new();
      (event.decode_fn)(&event.payload, &mut decoded);
      let capacity = match decoded.first() {
        Some(DecodedValue::U64(n)) => *n as usize,
        _ => 32,
      };
      backtraces.entry(logger_key).or_default().init(capacity);
      return;
    }
    EventKind::LogBacktrace => {
      backtraces.entry(logger_key).or_default().capture(clone_event(event));
      return;
    }
    EventKind::FlushBacktrace => {
      // An explicit `flush_backtrace()` call: replay the ring
      // unconditionally, independent of this record's own level. Drained
      // entries go straight to `format_and_dispatch`, not back through
      // `emit_one` — they still carry `EventKind::LogBacktrace`, so
      // recursing here would just re-capture them into the ring instead
      // of ever emitting them.
      if let Some(ring) = backtraces.get_mut(&logger_key) {
        for backtrace_event in ring.drain_for_flush() {
          format_and_dispatch(&backtrace_event, clock, templates, stats, error_notifier);
        }
      }
      return;
    }
    _ => {}
  }

  // Spec §8.4: when this record's own level triggers the logger's
  // backtrace-flush threshold, the ring's stored context is replayed
  // *before* the triggering record itself is emitted, so a reader sees
  // the lead-up followed by the record that caused it.
  let flush_level = event.logger.backtrace_flush_level();
  if flush_level != Level::None && event.level.passes(flush_level) {
    if let Some(ring) = backtraces.get_mut(&logger_key) {
      for backtrace_event in ring.drain_for_flush() {
        format_and_dispatch(&backtrace_event, clock, templates, stats, error_notifier);
      }
    }
  }

  format_and_dispatch(event, clock, templates, stats, error_notifier);
}

/// Decodes, renders, and writes one non-control event to every sink of
/// its logger that accepts it (spec §4.6 steps 1-3). Shared by the
/// normal emission path and every backtrace-ring replay site so replayed
/// records go through exactly the same formatting/filtering/fallback
/// logic as a live one, without re-entering `emit_one`'s event-kind
/// dispatch (which would treat a replayed `LogBacktrace` event as a new
/// capture instead of something to emit).
fn format_and_dispatch(event: &TransitEvent, clock: &TscClock, templates: &mut TemplateCache, stats: &StatsInner, error_notifier: &Notifier) {
  let mut decoded: Vec<DecodedValue<'_>> = Vec::new();
  (event.decode_fn)(&event.payload, &mut decoded);

  let key = event.format_template.as_ptr() as usize;
  let template = templates.get_or_parse(key, event.format_template);
  let mut message = String::new();
  let fallback;
  let rendered_message: &str = match template.render(&decoded, &mut message) {
    Ok(()) => &message,
    Err(err) => {
      // Spec §4.3/§7: a user-supplied `Blob`/`UserPod` formatter failed.
      // Substitute the bracketed fallback and tell the notifier instead
      // of losing the record or propagating the `fmt::Error`.
      let fail = ErrorEvent::FormatFailed {
        message: event.format_template.to_string(),
        location: format!("{}:{}", event.file, event.line),
        error: err.to_string(),
      };
      fallback = fail.to_string();
      error_notifier(fail);
      &fallback
    }
  };

  let structured = template.has_named_fields().then(|| template.structured_pairs(&decoded));

  let timestamp_ns = translate_timestamp_with(clock, event.logger.clock_source, event.timestamp_ns);
  let formatted = FormattedRecord {
    logger_name: &event.logger.name,
    level: event.level,
    timestamp_ns,
    thread_id: event.thread_id,
    thread_name: &event.thread_name,
    message: rendered_message,
    structured: structured.as_deref(),
  };

  for sink in &event.logger.sinks {
    if sink.accepts(&formatted) {
      sink.write(&formatted);
    }
  }

  stats.total_emitted.fetch_add(1, Ordering::Relaxed);
}

fn clone_event(event: &TransitEvent) -> TransitEvent {
  TransitEvent {
    timestamp_ns: event.timestamp_ns,
    level: event.level,
    event_kind: event.event_kind,
    thread_id: event.thread_id,
    thread_name: event.thread_name.clone(),
    logger: event.logger,
    format_template: event.format_template,
    file: event.file,
    line: event.line,
    function: event.function,
    tag: event.tag,
    payload: event.payload.clone(),
    decode_fn: event.decode_fn,
  }
}
