use std::fmt;

use thiserror::Error;

/// Errors raised by the transport and processing pipeline.
///
/// The producer hot path never returns this type except for
/// [`QuillError::RecordTooLarge`] — every other outcome on that path is the
/// boolean "did I enqueue?" described by the frontend contract.
#[derive(Debug, Error)]
pub enum QuillError {
  /// A single record would exceed the 2 GiB hard limit.
  #[error("log record of {requested} bytes exceeds the {limit} byte limit")]
  RecordTooLarge { requested: usize, limit: usize },
  /// A configuration value is invalid (e.g. TSC resync interval <= sleep duration).
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  /// The producer could not reserve space and the policy does not retry.
  #[error("queue is full")]
  QueueFull,
  /// An operation that requires the backend thread was attempted before `start()`.
  #[error("backend worker is not running")]
  BackendNotRunning,
}

/// Events reported to the user-supplied error notifier (spec §7).
///
/// The notifier runs on the backend thread: it must be fast and must not panic.
#[derive(Debug)]
pub enum ErrorEvent {
  /// A Dropping queue discarded records since the last report.
  Dropped { thread_name: String, count: u64 },
  /// A Blocking queue is currently stalling its producer.
  Blocked { thread_name: String, count: u64 },
  /// An unbounded queue grew by allocating a new segment.
  SegmentAllocated { thread_name: String, old_capacity: usize, new_capacity: usize },
  /// The pattern/template formatter raised while formatting a record.
  FormatFailed { message: String, location: String, error: String },
}

impl fmt::Display for ErrorEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Dropped { thread_name, count } => {
        write!(f, "Dropped {count} log messages from thread {thread_name}")
      }
      Self::Blocked { thread_name, count } => {
        write!(f, "Thread {thread_name} blocked {count} times waiting on a full queue")
      }
      Self::SegmentAllocated { thread_name, old_capacity, new_capacity } => {
        write!(
          f,
          "Thread {thread_name} grew its unbounded queue from {old_capacity} to {new_capacity} bytes"
        )
      }
      Self::FormatFailed { message, location, error } => {
        write!(
          f,
          "[Could not format log statement. message: \"{message}\", location: \"{location}\", error: \"{error}\"]"
        )
      }
    }
  }
}

/// Default error notifier: prints to stderr. Never panics.
pub fn default_error_notifier(event: ErrorEvent) {
  eprintln!("quill: {event}");
}
