//! Scenario 2 (spec §8) / P6: one producer on a `BoundedDropping` queue
//! emits far more records than the queue can hold while the backend is
//! not yet running; once the backend resumes, total written + total
//! observed drops must equal total attempts.

mod common;

use std::sync::Arc;

use quill_rs::level::{EventKind, Level, MacroMetadata};
use quill_rs::queue::QueueType;
use quill_rs::{BackendOptions, ClockSource, Frontend, FrontendOptions};

use common::RecordingSink;

static PRESSURE_METADATA: MacroMetadata = MacroMetadata::new("dropping.rs", 1, "pressure", "n={}", Level::Info, EventKind::Log);

#[test]
fn written_plus_dropped_equals_total_attempts() {
  let frontend = Frontend::new(FrontendOptions {
    queue_type: QueueType::BoundedDropping,
    // Small enough that a burst of ~256-byte-ish records overruns it
    // well before the backend ever looks at the queue.
    initial_queue_capacity: 4 * 1024,
    ..FrontendOptions::default()
  });
  let sink = Arc::new(RecordingSink::default());
  let logger = frontend.create_or_get_logger("pressure", ClockSource::System, vec![sink.clone()], None);

  const ATTEMPTS: i64 = 20_000;
  let mut accepted = 0u64;
  let mut rejected = 0u64;
  for n in 0..ATTEMPTS {
    if logger.log(Level::Info, &PRESSURE_METADATA, (n,)) {
      accepted += 1;
    } else {
      rejected += 1;
    }
  }
  assert_eq!(accepted + rejected, ATTEMPTS as u64);
  assert!(rejected > 0, "queue must have actually overrun for this scenario to be meaningful");

  // Only now does the backend start draining what made it into the queue.
  frontend.start_backend(BackendOptions::default(), None).unwrap();
  assert!(common::wait_until(|| sink.records.lock().unwrap().len() as u64 == accepted, 500));
  frontend.stop_backend();

  assert_eq!(sink.records.lock().unwrap().len() as u64, accepted);
  assert_eq!(frontend.backend_stats().unwrap().total_dropped, rejected);
}
