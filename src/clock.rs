//! Timestamp sources. Adapted from the teacher's `tscns` module: same
//! sequence-locked calibration scheme, but instance-based rather than a set
//! of process-wide statics, since a logger picks its clock source at
//! construction (spec §3 `Logger`).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Selects which clock a `Logger` samples on the hot path (spec §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockSource {
  /// RDTSC, translated to epoch nanoseconds by the backend's [`TscClock`].
  Tsc,
  /// `SystemTime::now()`, read directly on the producer thread.
  System,
  /// Caller-supplied clock; the producer passes the value through
  /// verbatim. Per spec §9, records from a `User` clock bypass the
  /// backend's strict-ordering ceiling entirely.
  User,
}

#[inline(always)]
pub fn read_tsc() -> u64 {
  #[cfg(target_arch = "x86_64")]
  unsafe {
    core::arch::x86_64::_rdtsc()
  }
  #[cfg(target_arch = "aarch64")]
  unsafe {
    let tsc: u64;
    core::arch::asm!("mrs {}, cntvct_el0", out(reg) tsc);
    tsc
  }
  #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
  {
    system_now_ns()
  }
}

#[inline(always)]
pub fn system_now_ns() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

/// Sequence-locked TSC-to-epoch-nanosecond translator.
///
/// Only the backend thread calibrates; any thread may call
/// [`TscClock::tsc_to_epoch_ns`]. The odd/even sequence counter lets a
/// reader detect a concurrent calibration and retry, matching the teacher's
/// `tscns` approach.
pub struct TscClock {
  seq: AtomicU64,
  base_tsc: AtomicU64,
  base_ns: AtomicI64,
  ns_per_tsc: AtomicU64, // f64 bits
  last_calibrate_ns: AtomicI64,
}

impl TscClock {
  pub fn new() -> Self {
    let clock = Self {
      seq: AtomicU64::new(0),
      base_tsc: AtomicU64::new(0),
      base_ns: AtomicI64::new(0),
      ns_per_tsc: AtomicU64::new(1.0f64.to_bits()),
      last_calibrate_ns: AtomicI64::new(0),
    };
    clock.calibrate_now();
    clock
  }

  /// Resynchronize the base point. Cheap enough to call from the backend's
  /// idle loop every `rdtsc_resync_interval`.
  pub fn calibrate_now(&self) {
    let t0 = read_tsc();
    let ns0 = system_now_ns() as i64;
    // A short busy-wait gives a second sample far enough apart that the
    // ratio estimate isn't dominated by measurement noise.
    let mut t1 = read_tsc();
    let mut ns1 = system_now_ns() as i64;
    while ns1 == ns0 {
      t1 = read_tsc();
      ns1 = system_now_ns() as i64;
    }

    let dt_tsc = t1.wrapping_sub(t0) as f64;
    let dt_ns = (ns1 - ns0) as f64;
    let ns_per_tsc = if dt_tsc > 0.0 { dt_ns / dt_tsc } else { 1.0 };

    self.seq.fetch_add(1, Ordering::AcqRel);
    self.base_tsc.store(t1, Ordering::Relaxed);
    self.base_ns.store(ns1, Ordering::Relaxed);
    self.ns_per_tsc.store(ns_per_tsc.to_bits(), Ordering::Relaxed);
    self.last_calibrate_ns.store(ns1, Ordering::Release);
    self.seq.fetch_add(1, Ordering::AcqRel);
  }

  #[inline]
  pub fn tsc_to_epoch_ns(&self, tsc: u64) -> u64 {
    loop {
      let before = self.seq.load(Ordering::Acquire);
      if before & 1 != 0 {
        continue; // calibration in flight
      }
      let base_tsc = self.base_tsc.load(Ordering::Relaxed);
      let base_ns = self.base_ns.load(Ordering::Relaxed);
      let ns_per_tsc = f64::from_bits(self.ns_per_tsc.load(Ordering::Relaxed));

      let diff_tsc = tsc.wrapping_sub(base_tsc) as i64 as f64;
      let ns = base_ns + (diff_tsc * ns_per_tsc) as i64;

      let after = self.seq.load(Ordering::Acquire);
      if before == after {
        return ns.max(0) as u64;
      }
    }
  }

  pub fn should_resync(&self, resync_interval: Duration) -> bool {
    let last = self.last_calibrate_ns.load(Ordering::Acquire);
    let now = system_now_ns() as i64;
    (now - last) as u64 >= resync_interval.as_nanos() as u64
  }
}

impl Default for TscClock {
  fn default() -> Self {
    Self::new()
  }
}
