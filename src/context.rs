//! Per-producer-thread state and the backend's view of all live producers
//! (spec §3 `ThreadContext`, §4.4).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::ScratchLengths;
use crate::queue::{make_queue, ConsumerQueue, ProducerQueue, QueueType};

/// State a producer thread owns exclusively, plus the handful of fields
/// the backend reads from any thread (the `AtomicBool`/`AtomicU64`s).
///
/// The consumer half of the queue and the backend's transit buffer are
/// deliberately NOT stored here: they belong to the backend alone (spec
/// §3.5 "owned by the backend, not shared") and are taken out once, the
/// first time the backend observes this context, into its own
/// `backend::ContextSlot`.
pub struct ThreadContext {
  pub(crate) producer: std::cell::UnsafeCell<ProducerQueue>,
  consumer: std::cell::UnsafeCell<Option<ConsumerQueue>>,
  pub thread_id: u64,
  pub thread_name: String,
  pub(crate) scratch: std::cell::UnsafeCell<ScratchLengths>,
  /// Cleared by the producer's `Drop`; the backend treats a context whose
  /// flag is false as fully drained-and-retired once its queue is empty.
  pub valid: AtomicBool,
  pub dropped_count: AtomicU64,
  pub blocked_count: AtomicU64,
}

unsafe impl Sync for ThreadContext {}

impl ThreadContext {
  fn new(queue_type: QueueType, initial_capacity: usize, max_capacity: usize, thread_id: u64, thread_name: String) -> Arc<Self> {
    let (producer, consumer) = make_queue(queue_type, initial_capacity, max_capacity);
    Arc::new(ThreadContext {
      producer: std::cell::UnsafeCell::new(producer),
      consumer: std::cell::UnsafeCell::new(Some(consumer)),
      thread_id,
      thread_name,
      scratch: std::cell::UnsafeCell::new(ScratchLengths::default()),
      valid: AtomicBool::new(true),
      dropped_count: AtomicU64::new(0),
      blocked_count: AtomicU64::new(0),
    })
  }

  /// Only the owning producer thread may call this.
  #[inline]
  #[allow(clippy::mut_from_ref)]
  pub(crate) fn producer_mut(&self) -> &mut ProducerQueue {
    unsafe { &mut *self.producer.get() }
  }

  #[inline]
  #[allow(clippy::mut_from_ref)]
  pub(crate) fn scratch_mut(&self) -> &mut ScratchLengths {
    unsafe { &mut *self.scratch.get() }
  }

  /// Only the backend thread may call this, and only once: it takes the
  /// consumer half out on first sight of the context.
  pub(crate) fn take_consumer(&self) -> Option<ConsumerQueue> {
    unsafe { (*self.consumer.get()).take() }
  }
}

impl Drop for ThreadContext {
  fn drop(&mut self) {
    self.valid.store(false, Ordering::Release);
  }
}

/// Spinlock-equivalent registry (a `parking_lot::Mutex`, uncontended in
/// the hot path since registration happens once per thread lifetime) of
/// every live producer's context, plus a one-shot flag the backend polls
/// to know when to re-scan (spec §3.3).
#[derive(Default)]
pub struct ThreadContextRegistry {
  inner: Mutex<Vec<Arc<ThreadContext>>>,
  has_new: AtomicBool,
}

impl ThreadContextRegistry {
  pub fn register(
    &self,
    queue_type: QueueType,
    initial_capacity: usize,
    max_capacity: usize,
    thread_id: u64,
    thread_name: String,
  ) -> Arc<ThreadContext> {
    let ctx = ThreadContext::new(queue_type, initial_capacity, max_capacity, thread_id, thread_name);
    self.inner.lock().push(Arc::clone(&ctx));
    self.has_new.store(true, Ordering::Release);
    ctx
  }

  /// Returns `true` exactly once per registration burst; the backend uses
  /// this to decide whether its cached snapshot needs refreshing.
  pub fn take_has_new(&self) -> bool {
    self.has_new.swap(false, Ordering::AcqRel)
  }

  /// Backend-side snapshot: every context registered so far, including
  /// ones whose producer has since dropped (still drained until empty).
  pub fn snapshot(&self) -> Vec<Arc<ThreadContext>> {
    self.inner.lock().clone()
  }

  /// Drops contexts that are both invalidated and fully drained, so the
  /// registry doesn't grow without bound across a long-running process.
  pub fn sweep_retired<F: Fn(&ThreadContext) -> bool>(&self, is_drained: F) {
    self.inner.lock().retain(|ctx| ctx.valid.load(Ordering::Acquire) || !is_drained(ctx));
  }
}

thread_local! {
  static THREAD_ID: u64 = next_thread_id();
}

static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_thread_id() -> u64 {
  THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A stable per-process thread identifier, cheap to read repeatedly
/// (cached in a `thread_local!`), standing in for the OS tid the source
/// captures (spec §3).
pub fn current_thread_id() -> u64 {
  THREAD_ID.with(|id| *id)
}

pub fn current_thread_name() -> String {
  std::thread::current().name().map(str::to_owned).unwrap_or_else(|| format!("thread-{}", current_thread_id()))
}
