//! Wire format for one record written into a producer's queue (spec §3,
//! §4.3): a fixed header followed by the codec-encoded argument payload.
//!
//! The header carries the decoder function pointer directly, the same
//! role the source's per-callsite decoder-function-pointer plays — the
//! backend reads it back and calls through it without ever needing to
//! know the call site's argument types.

use crate::codec::args::DecodeFn;
use crate::level::MacroMetadata;
use crate::logger::Logger;

/// `metadata_ptr(8) + decode_fn_ptr(8) + logger_ptr(8) + timestamp_raw(8)`.
pub const HEADER_SIZE: usize = 32;

/// Everything needed to locate, decode, and timestamp one record, read
/// back out of the fixed-size header.
pub struct RecordHeader {
  pub metadata: &'static MacroMetadata,
  pub decode_fn: DecodeFn,
  /// Borrowed, not owned: the caller (frontend) must keep at least one
  /// `Arc<Logger>` alive for as long as any record naming it might still
  /// be in flight. In practice that means not dropping the last handle
  /// to a logger while producer threads might still be writing through
  /// it — `remove_logger` only flips the logger's valid flag, it does
  /// not reclaim the allocation itself.
  pub logger: &'static Logger,
  /// Raw clock reading at the moment the producer wrote the record: TSC
  /// ticks, epoch nanoseconds, or a caller-supplied value, depending on
  /// the logger's `ClockSource` (spec §3 `Logger`).
  pub timestamp_raw: u64,
}

/// Writes the header for one record into `dst[..HEADER_SIZE]`.
#[inline]
pub fn encode_header(dst: &mut [u8], metadata: &'static MacroMetadata, decode_fn: DecodeFn, logger: &std::sync::Arc<Logger>, timestamp_raw: u64) {
  let metadata_ptr = metadata as *const MacroMetadata as usize as u64;
  let decode_fn_ptr = decode_fn as usize as u64;
  let logger_ptr = std::sync::Arc::as_ptr(logger) as usize as u64;
  dst[0..8].copy_from_slice(&metadata_ptr.to_le_bytes());
  dst[8..16].copy_from_slice(&decode_fn_ptr.to_le_bytes());
  dst[16..24].copy_from_slice(&logger_ptr.to_le_bytes());
  dst[24..32].copy_from_slice(&timestamp_raw.to_le_bytes());
}

/// Reads a header back out of `src[..HEADER_SIZE]`.
///
/// # Safety
/// `src` must contain a header written by [`encode_header`] whose
/// `metadata` reference is `'static` and whose `logger` pointer is still
/// live — both hold for any header this process itself wrote, which is
/// the only source of headers the backend ever reads.
#[inline]
pub unsafe fn decode_header(src: &[u8]) -> RecordHeader {
  let metadata_ptr = u64::from_le_bytes(src[0..8].try_into().unwrap()) as usize;
  let decode_fn_ptr = u64::from_le_bytes(src[8..16].try_into().unwrap()) as usize;
  let logger_ptr = u64::from_le_bytes(src[16..24].try_into().unwrap()) as usize;
  let timestamp_raw = u64::from_le_bytes(src[24..32].try_into().unwrap());

  let metadata: &'static MacroMetadata = &*(metadata_ptr as *const MacroMetadata);
  let decode_fn: DecodeFn = std::mem::transmute(decode_fn_ptr);
  let logger: &'static Logger = &*(logger_ptr as *const Logger);

  RecordHeader { metadata, decode_fn, logger, timestamp_raw }
}
