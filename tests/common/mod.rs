//! Shared test fixtures for the scenario tests in this directory (spec §8).

use std::sync::Mutex;

use quill_rs::sink::{FormattedRecord, Sink, SinkCore};

/// Captures every formatted message it receives, in write order, along
/// with the thread name that produced it — enough to check P1/P2/P5
/// ordering properties without standing up a real file sink.
#[derive(Default)]
pub struct RecordingSink {
  core: SinkCore,
  pub records: Mutex<Vec<(String, String)>>,
  pub flush_count: std::sync::atomic::AtomicUsize,
}

impl Sink for RecordingSink {
  fn core(&self) -> &SinkCore {
    &self.core
  }

  fn write(&self, record: &FormattedRecord<'_>) {
    self.records.lock().unwrap().push((record.thread_name.to_string(), record.message.to_string()));
  }

  fn flush(&self) {
    self.flush_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
  }
}

/// Spins until `pred` is true or `attempts * 10ms` has elapsed, to wait for
/// the backend's async drain without a fixed sleep.
pub fn wait_until(mut pred: impl FnMut() -> bool, attempts: usize) -> bool {
  for _ in 0..attempts {
    if pred() {
      return true;
    }
    std::thread::sleep(std::time::Duration::from_millis(10));
  }
  pred()
}
