//! Scenario 1 (spec §8): two producer threads each enqueue a counter
//! 0..99 interleaved; every thread's own subsequence must come out in
//! order (P1/P2), and the backend must account for every record.

mod common;

use std::sync::Arc;

use quill_rs::level::{EventKind, Level, MacroMetadata};
use quill_rs::queue::QueueType;
use quill_rs::{BackendOptions, ClockSource, Frontend, FrontendOptions};

use common::RecordingSink;

static COUNT_METADATA: MacroMetadata = MacroMetadata::new("ordering.rs", 1, "count", "{}", Level::Info, EventKind::Log);

#[test]
fn per_thread_subsequence_stays_in_order() {
  let frontend = Frontend::new(FrontendOptions { queue_type: QueueType::UnboundedBlocking, ..FrontendOptions::default() });
  let sink = Arc::new(RecordingSink::default());
  let logger = Arc::new(frontend.create_or_get_logger("ordering", ClockSource::System, vec![sink.clone()], None));

  frontend.start_backend(BackendOptions::default(), None).unwrap();

  let threads: Vec<_> = ["A", "B"]
    .iter()
    .map(|name| {
      let logger = Arc::clone(&logger);
      std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
          for i in 0..100i32 {
            logger.log(Level::Info, &COUNT_METADATA, (i,));
          }
        })
        .unwrap()
    })
    .collect();

  for t in threads {
    t.join().unwrap();
  }

  assert!(common::wait_until(|| sink.records.lock().unwrap().len() == 200, 200));
  frontend.stop_backend();

  let records = sink.records.lock().unwrap();
  assert_eq!(records.len(), 200);

  for thread_name in ["A", "B"] {
    let subsequence: Vec<i32> = records
      .iter()
      .filter(|(name, _)| name == thread_name)
      .map(|(_, msg)| msg.parse().expect("message should be the bare counter value"))
      .collect();
    assert_eq!(subsequence.len(), 100);
    let expected: Vec<i32> = (0..100).collect();
    assert_eq!(subsequence, expected, "{thread_name}'s records must be emitted in enqueue order");
  }
}
