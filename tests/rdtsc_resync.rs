//! Scenario 6 (spec §8): an RDTSC resync interval that is not strictly
//! greater than the idle sleep duration is rejected at startup; swapping
//! the two values makes the same configuration succeed.

use std::time::Duration;

use quill_rs::{BackendOptions, ClockSource, Frontend, FrontendOptions};

#[test]
fn resync_not_greater_than_sleep_is_rejected_then_swapped_values_succeed() {
  let frontend = Frontend::new(FrontendOptions::default());
  let _logger = frontend.create_or_get_logger("resync", ClockSource::Tsc, vec![], None);

  let bad = BackendOptions { sleep_duration: Duration::from_secs(1), rdtsc_resync_interval: Duration::from_millis(500), ..BackendOptions::default() };
  assert!(frontend.start_backend(bad, None).is_err());
  assert!(!frontend.is_backend_running());

  let good = BackendOptions { sleep_duration: Duration::from_millis(500), rdtsc_resync_interval: Duration::from_secs(1), ..BackendOptions::default() };
  assert!(frontend.start_backend(good, None).is_ok());
  assert!(frontend.is_backend_running());

  frontend.stop_backend();
}
