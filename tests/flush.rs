//! Scenario 3 (spec §8) / P5: after `flush_log` returns, every record
//! enqueued before the call has reached every sink of its logger, and
//! every live sink has actually been flushed.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use quill_rs::codec::Str;
use quill_rs::level::{EventKind, Level, MacroMetadata};
use quill_rs::{BackendOptions, ClockSource, Frontend, FrontendOptions};

use common::RecordingSink;

static FLUSH_RECORD_METADATA: MacroMetadata = MacroMetadata::new("flush.rs", 1, "emit", "hello {}", Level::Info, EventKind::Log);

#[test]
fn flush_log_returns_only_after_every_record_is_written_and_flushed() {
  let frontend = Frontend::new(FrontendOptions::default());
  let sink = Arc::new(RecordingSink::default());
  let logger = frontend.create_or_get_logger("flush", ClockSource::System, vec![sink.clone()], None);

  frontend.start_backend(BackendOptions::default(), None).unwrap();

  for _ in 0..5000 {
    logger.log(Level::Info, &FLUSH_RECORD_METADATA, (Str("record"),));
  }
  logger.flush_log();

  assert_eq!(sink.records.lock().unwrap().len(), 5000);
  assert!(sink.flush_count.load(Ordering::Relaxed) >= 1, "flush_log must flush every live sink before unblocking");

  frontend.stop_backend();
}
