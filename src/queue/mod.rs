pub mod bounded;
pub mod unbounded;

pub use bounded::{bounded, BoundedConsumer, BoundedProducer, MAX_RECORD_SIZE};
pub use unbounded::{unbounded, SegmentGrown, UnboundedConsumer, UnboundedPolicy, UnboundedProducer};

/// Frontend-selected queue policy (spec §6 `queue_type`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueType {
  UnboundedUnlimited,
  UnboundedBlocking,
  UnboundedDropping,
  BoundedBlocking,
  BoundedDropping,
}

impl QueueType {
  #[inline]
  pub fn is_blocking(self) -> bool {
    matches!(self, QueueType::UnboundedBlocking | QueueType::BoundedBlocking)
  }

  #[inline]
  pub fn is_unbounded(self) -> bool {
    matches!(self, QueueType::UnboundedUnlimited | QueueType::UnboundedBlocking | QueueType::UnboundedDropping)
  }
}

/// The producer side of whichever queue flavor a `ThreadContext` picked.
pub enum ProducerQueue {
  Bounded(BoundedProducer),
  Unbounded(UnboundedProducer),
}

impl ProducerQueue {
  #[inline]
  pub fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
    match self {
      ProducerQueue::Bounded(q) => q.reserve(n),
      ProducerQueue::Unbounded(q) => q.reserve(n),
    }
  }

  #[inline]
  pub fn commit_write(&mut self, n: usize) {
    match self {
      ProducerQueue::Bounded(q) => q.commit_write(n),
      ProducerQueue::Unbounded(q) => q.commit_write(n),
    }
  }
}

/// The consumer side of whichever queue flavor a `ThreadContext` picked.
pub enum ConsumerQueue {
  Bounded(BoundedConsumer),
  Unbounded(UnboundedConsumer),
}

impl ConsumerQueue {
  #[inline]
  pub fn begin_read(&mut self) -> &[u8] {
    match self {
      ConsumerQueue::Bounded(q) => q.begin_read(),
      ConsumerQueue::Unbounded(q) => q.begin_read(),
    }
  }

  #[inline]
  pub fn finish_read(&mut self, n: usize) {
    match self {
      ConsumerQueue::Bounded(q) => q.finish_read(n),
      ConsumerQueue::Unbounded(q) => q.finish_read(n),
    }
  }

  #[inline]
  pub fn is_empty(&mut self) -> bool {
    match self {
      ConsumerQueue::Bounded(q) => q.is_empty(),
      ConsumerQueue::Unbounded(q) => q.is_empty(),
    }
  }

  /// Only unbounded queues ever report growth.
  #[inline]
  pub fn take_growth_event(&mut self) -> Option<SegmentGrown> {
    match self {
      ConsumerQueue::Bounded(_) => None,
      ConsumerQueue::Unbounded(q) => q.take_growth_event(),
    }
  }
}

/// Builds a producer/consumer pair for `queue_type`.
pub fn make_queue(
  queue_type: QueueType,
  initial_capacity: usize,
  max_capacity: usize,
) -> (ProducerQueue, ConsumerQueue) {
  match queue_type {
    QueueType::BoundedBlocking | QueueType::BoundedDropping => {
      let (p, c) = bounded(initial_capacity);
      (ProducerQueue::Bounded(p), ConsumerQueue::Bounded(c))
    }
    QueueType::UnboundedUnlimited => {
      let (p, c) = unbounded(initial_capacity, max_capacity, UnboundedPolicy::Unlimited);
      (ProducerQueue::Unbounded(p), ConsumerQueue::Unbounded(c))
    }
    QueueType::UnboundedBlocking => {
      let (p, c) = unbounded(initial_capacity, max_capacity, UnboundedPolicy::Blocking);
      (ProducerQueue::Unbounded(p), ConsumerQueue::Unbounded(c))
    }
    QueueType::UnboundedDropping => {
      let (p, c) = unbounded(initial_capacity, max_capacity, UnboundedPolicy::Dropping);
      (ProducerQueue::Unbounded(p), ConsumerQueue::Unbounded(c))
    }
  }
}
