use std::fmt;

/// Severity of a log record.
///
/// `Backtrace` is not part of the usual ordering — a record tagged with it
/// is never compared against a logger's gate; it is always accepted and
/// routed into that logger's backtrace ring (spec §4.7).
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
  TraceL3 = 0,
  TraceL2 = 1,
  TraceL1 = 2,
  Debug = 3,
  Info = 4,
  Warning = 5,
  Error = 6,
  Critical = 7,
  /// Sentinel meaning "never emit" — a logger whose level is set to this
  /// discards everything.
  None = 8,
  /// Out-of-band: routed to the owning logger's backtrace ring instead of
  /// being compared against the level gate.
  Backtrace = 9,
}

impl Level {
  #[inline(always)]
  pub fn as_str(self) -> &'static str {
    match self {
      Level::TraceL3 => "trace_l3",
      Level::TraceL2 => "trace_l2",
      Level::TraceL1 => "trace_l1",
      Level::Debug => "debug",
      Level::Info => "info",
      Level::Warning => "warning",
      Level::Error => "error",
      Level::Critical => "critical",
      Level::None => "none",
      Level::Backtrace => "backtrace",
    }
  }

  /// Whether a record at `self` passes a gate set at `gate`.
  ///
  /// `Backtrace` records bypass the gate entirely (spec §4.7): they are
  /// always accepted by the logger and handed to the backtrace ring.
  #[inline(always)]
  pub fn passes(self, gate: Level) -> bool {
    if self == Level::Backtrace {
      return true;
    }
    self >= gate
  }

  /// Inverse of the `as u8` cast used to store a level in an atomic byte
  /// (logger level gate, per-sink level filter).
  #[inline(always)]
  pub fn from_u8(byte: u8) -> Level {
    match byte {
      0 => Level::TraceL3,
      1 => Level::TraceL2,
      2 => Level::TraceL1,
      3 => Level::Debug,
      4 => Level::Info,
      5 => Level::Warning,
      6 => Level::Error,
      7 => Level::Critical,
      9 => Level::Backtrace,
      _ => Level::None,
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Discriminates the kind of record a producer enqueued, per spec §3's
/// `MacroMetadata` wire field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
  Log,
  LogBacktrace,
  InitBacktrace,
  FlushBacktrace,
  Flush,
}

/// Static, per-call-site metadata captured (in a full build) by the macro
/// layer. Here it is constructed directly by callers of the frontend facade
/// since the macro layer is an external collaborator (spec §1).
#[derive(Debug)]
pub struct MacroMetadata {
  pub file: &'static str,
  pub line: u32,
  pub function: &'static str,
  pub format_template: &'static str,
  pub tag: Option<&'static str>,
  pub level: Level,
  pub event_kind: EventKind,
}

impl MacroMetadata {
  pub const fn new(
    file: &'static str,
    line: u32,
    function: &'static str,
    format_template: &'static str,
    level: Level,
    event_kind: EventKind,
  ) -> Self {
    Self { file, line, function, format_template, tag: None, level, event_kind }
  }

  pub fn location(&self) -> String {
    format!("{}:{}", self.file, self.line)
  }
}
