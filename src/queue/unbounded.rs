//! Unbounded SPSC queue: a singly linked chain of [`bounded`] segments
//! (spec §4.2). Exactly one producer appends to the tail segment; exactly
//! one consumer drains the head segment and follows `next` once it is
//! fully consumed.

use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::bounded::{bounded, BoundedConsumer, BoundedProducer, MAX_RECORD_SIZE};

/// Policy governing what happens when a segment can't grow further.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnboundedPolicy {
  /// Always allocate a bigger segment; capped only by the 2 GiB single
  /// segment limit (spec's "Open Questions": no additional global cap).
  Unlimited,
  /// Fail once `unbounded_queue_max_capacity` is reached; caller spins.
  Blocking,
  /// Fail once `unbounded_queue_max_capacity` is reached; caller drops.
  Dropping,
}

/// One link in the segment chain.
struct Segment {
  producer_cell: std::cell::UnsafeCell<Option<BoundedProducer>>,
  consumer_cell: std::cell::UnsafeCell<Option<BoundedConsumer>>,
  capacity: usize,
  next: AtomicPtr<Segment>,
}

unsafe impl Sync for Segment {}

impl Segment {
  fn new(capacity: usize) -> Box<Self> {
    let (p, c) = bounded(capacity);
    Box::new(Segment {
      producer_cell: std::cell::UnsafeCell::new(Some(p)),
      consumer_cell: std::cell::UnsafeCell::new(Some(c)),
      capacity,
      next: AtomicPtr::new(std::ptr::null_mut()),
    })
  }
}

struct Shared {
  max_capacity: usize,
  policy: UnboundedPolicy,
}

/// An allocation event, reported by the consumer side when it follows a
/// link to a newly grown segment (spec §4.2/§7).
#[derive(Debug, Copy, Clone)]
pub struct SegmentGrown {
  pub old_capacity: usize,
  pub new_capacity: usize,
}

pub struct UnboundedProducer {
  shared: Arc<Shared>,
  tail: *mut Segment,
  requested_next_capacity: Option<usize>,
}

unsafe impl Send for UnboundedProducer {}

impl UnboundedProducer {
  #[inline]
  fn tail(&self) -> &Segment {
    unsafe { &*self.tail }
  }

  #[inline]
  fn tail_producer(&mut self) -> &mut BoundedProducer {
    unsafe { (*self.tail().producer_cell.get()).as_mut().unwrap() }
  }

  /// Reserves `n` bytes, growing the chain if the current tail is full.
  /// Returns `None` under a capped policy once the max capacity is hit,
  /// or if `n` exceeds [`MAX_RECORD_SIZE`].
  pub fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
    if n > MAX_RECORD_SIZE {
      return None;
    }

    // `reserve` is a pure probe on the success path (it commits nothing),
    // so calling it twice on a hit is correct, just an extra bounds check;
    // it sidesteps holding a live `&mut` across the match below.
    if self.tail_producer().reserve(n).is_some() {
      return self.tail_producer().reserve(n);
    }

    let current_capacity = self.tail().capacity;
    let target = self.requested_next_capacity.take().unwrap_or(current_capacity * 2).max(n + 1);
    let next_capacity = target.next_power_of_two().min(MAX_RECORD_SIZE + 1);

    if self.shared.policy != UnboundedPolicy::Unlimited && next_capacity > self.shared.max_capacity {
      return None;
    }

    let new_segment = Box::into_raw(Segment::new(next_capacity));
    self.tail().next.store(new_segment, Ordering::Release);
    self.tail = new_segment;
    self.tail_producer().reserve(n)
  }

  pub fn commit_write(&mut self, n: usize) {
    self.tail_producer().commit_write(n);
  }

  /// Requests that the *next* grown segment use a smaller capacity than
  /// doubling would otherwise produce (spec §4.2 "Shrink").
  pub fn request_shrink(&mut self, capacity: usize) {
    self.requested_next_capacity = Some(capacity.next_power_of_two());
  }
}

pub struct UnboundedConsumer {
  shared: Arc<Shared>,
  head: Box<Segment>,
  pending_growth: Option<SegmentGrown>,
}

impl UnboundedConsumer {
  /// Returns the currently readable contiguous range, following the link
  /// to the next segment if the current head is exhausted and closed.
  pub fn begin_read(&mut self) -> &[u8] {
    loop {
      let head_consumer = unsafe { (*self.head.consumer_cell.get()).as_mut().unwrap() };
      if !head_consumer.is_empty() {
        return unsafe { (*self.head.consumer_cell.get()).as_mut().unwrap() }.begin_read();
      }

      let next = self.head.next.load(Ordering::Acquire);
      if next.is_null() {
        return &[];
      }

      let old_capacity = self.head.capacity;
      let new_segment = unsafe { Box::from_raw(next) };
      let new_capacity = new_segment.capacity;
      self.head = new_segment;
      self.pending_growth = Some(SegmentGrown { old_capacity, new_capacity });
    }
  }

  pub fn finish_read(&mut self, n: usize) {
    let head_consumer = unsafe { (*self.head.consumer_cell.get()).as_mut().unwrap() };
    head_consumer.finish_read(n);
  }

  /// Drains and clears the allocation-event flag set by [`Self::begin_read`],
  /// so the backend can invoke the error notifier exactly once per growth.
  pub fn take_growth_event(&mut self) -> Option<SegmentGrown> {
    self.pending_growth.take()
  }

  pub fn is_empty(&mut self) -> bool {
    self.begin_read().is_empty()
  }
}

impl Drop for UnboundedConsumer {
  fn drop(&mut self) {
    // `self.head` frees itself, but `Segment::next` is a raw pointer, not
    // an owning `Box`, so any segments still ahead of it need reclaiming
    // by hand.
    let mut next = self.head.next.load(Ordering::Acquire);
    while !next.is_null() {
      let seg = unsafe { Box::from_raw(next) };
      next = seg.next.load(Ordering::Acquire);
    }
  }
}

/// Creates an unbounded queue starting with one segment of `initial_capacity`
/// bytes, bounded (once grown) by `max_capacity` under `policy`.
pub fn unbounded(
  initial_capacity: usize,
  max_capacity: usize,
  policy: UnboundedPolicy,
) -> (UnboundedProducer, UnboundedConsumer) {
  let shared = Arc::new(Shared { max_capacity, policy });
  let segment = Segment::new(initial_capacity.next_power_of_two());
  // Producer and consumer both reference the same first segment by raw
  // pointer; the consumer owns it as a `Box` (and takes ownership of every
  // later one too as it follows `next`), the producer only ever derefs it.
  let shared_segment = Box::into_raw(segment);

  let producer = UnboundedProducer { shared: Arc::clone(&shared), tail: shared_segment, requested_next_capacity: None };
  let consumer = UnboundedConsumer { shared, head: unsafe { Box::from_raw(shared_segment) }, pending_growth: None };
  (producer, consumer)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_segment_roundtrip() {
    let (mut prod, mut cons) = unbounded(4096, 1 << 24, UnboundedPolicy::Unlimited);
    {
      let w = prod.reserve(4).unwrap();
      w.copy_from_slice(b"abcd");
    }
    prod.commit_write(4);
    assert_eq!(cons.begin_read(), b"abcd");
    cons.finish_read(4);
  }

  #[test]
  fn dropping_policy_rejects_past_cap() {
    let (mut prod, _cons) = unbounded(4096, 4096, UnboundedPolicy::Dropping);
    // First segment is 4096 and already at the cap, so growth is refused.
    let big = prod.reserve(4096);
    assert!(big.is_none() || big.unwrap().len() == 4096);
  }
}
