//! Scenario 4 (spec §8) / P8: with backtrace capacity 2 and
//! flush_level=Error, 12 backtrace records followed by 1 Error record
//! must produce exactly the last 2 backtrace records, in insertion
//! order, followed by the Error record.

mod common;

use std::sync::Arc;

use quill_rs::level::{EventKind, Level, MacroMetadata};
use quill_rs::{BackendOptions, ClockSource, Frontend, FrontendOptions};

use common::RecordingSink;

static BACKTRACE_METADATA: MacroMetadata = MacroMetadata::new("backtrace_order.rs", 1, "bt", "bt{}", Level::Backtrace, EventKind::LogBacktrace);
static ERROR_METADATA: MacroMetadata = MacroMetadata::new("backtrace_order.rs", 2, "boom", "boom", Level::Error, EventKind::Log);

#[test]
fn backtrace_replay_precedes_triggering_record() {
  let frontend = Frontend::new(FrontendOptions::default());
  let sink = Arc::new(RecordingSink::default());
  let logger = frontend.create_or_get_logger("backtrace", ClockSource::System, vec![sink.clone()], None);

  frontend.start_backend(BackendOptions::default(), None).unwrap();

  logger.init_backtrace(2, Level::Error);
  for i in 0..12i32 {
    logger.log(Level::Backtrace, &BACKTRACE_METADATA, (i,));
  }
  logger.log(Level::Error, &ERROR_METADATA, ());
  logger.flush_log();

  frontend.stop_backend();

  let records = sink.records.lock().unwrap();
  let messages: Vec<&str> = records.iter().map(|(_, msg)| msg.as_str()).collect();
  assert_eq!(messages, vec!["bt10", "bt11", "boom"]);
}
