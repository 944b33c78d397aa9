//! Argument encode/decode protocol (spec §3, §4.3).
//!
//! Unlike the teacher's scratch `args.rs`/`args2.rs` (which stash a runtime
//! tag byte per argument because nothing dispatches on the static type at
//! decode time), here the decoder is reached through a per-call-site
//! function pointer (`decoder_ptr` in the wire format) that already knows
//! the exact argument-type sequence. No runtime tags are written — the
//! generic `decode` function for a given `ArgList` is monomorphized once
//! per distinct type tuple, exactly mirroring the source's per-call-site
//! C++ template instantiation (spec §9 "Monomorphized per-call-site codec").

pub mod args;
pub mod template;

use std::fmt;

/// Per-thread scratch used by the size pass to avoid re-scanning
/// null-terminated strings during the encode pass (spec §3, §4.3).
#[derive(Default)]
pub struct ScratchLengths {
  lengths: Vec<usize>,
  cursor: usize,
}

impl ScratchLengths {
  pub fn reset(&mut self) {
    self.lengths.clear();
    self.cursor = 0;
  }

  pub fn push(&mut self, len: usize) {
    self.lengths.push(len);
  }

  /// Consumed in the same order the size pass pushed them.
  pub fn next(&mut self) -> usize {
    let v = self.lengths[self.cursor];
    self.cursor += 1;
    v
  }

  pub fn rewind_for_encode(&mut self) {
    self.cursor = 0;
  }
}

/// A value decoded from the wire, borrowing from the queue's bytes where
/// possible. Fed to the template engine in place of an opaque formatter
/// library argument (spec §4.3 "constructs a formatter-library argument
/// value referencing ... the decoded representation").
pub enum DecodedValue<'a> {
  I64(i64),
  U64(u64),
  F64(f64),
  Bool(bool),
  Str(&'a str),
  /// Deferred-format binary blob with a user-supplied formatter.
  Blob(&'a [u8], fn(&[u8], &mut fmt::Formatter<'_>) -> fmt::Result),
  /// Trivially-copyable user type with a user-declared formatter.
  UserPod(&'a [u8], fn(&[u8], &mut fmt::Formatter<'_>) -> fmt::Result),
}

impl fmt::Display for DecodedValue<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DecodedValue::I64(v) => fmt::Display::fmt(v, f),
      DecodedValue::U64(v) => fmt::Display::fmt(v, f),
      DecodedValue::F64(v) => fmt::Display::fmt(v, f),
      DecodedValue::Bool(v) => fmt::Display::fmt(v, f),
      DecodedValue::Str(v) => fmt::Display::fmt(v, f),
      DecodedValue::Blob(bytes, formatter) => formatter(bytes, f),
      DecodedValue::UserPod(bytes, formatter) => formatter(bytes, f),
    }
  }
}

/// One loggable argument: knows its own wire size, how to copy itself into
/// a reserved range, and how to reconstitute a [`DecodedValue`] from bytes.
pub trait LogArg {
  /// Bytes this value needs on the wire. May consult `scratch` to record
  /// side-channel lengths (e.g. a C string's `strlen`) for the encode pass
  /// to reuse without rescanning.
  fn wire_size(&self, scratch: &mut ScratchLengths) -> usize;

  /// Copies `self` into the front of `dst`, which is at least `wire_size()`
  /// bytes, and returns the number of bytes actually written. Must consume
  /// `scratch` in the same order `wire_size` pushed to it.
  fn encode(&self, dst: &mut [u8], scratch: &mut ScratchLengths) -> usize;

  /// Reads one value starting at `src[0]`, returning it and the number of
  /// bytes consumed.
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize);
}

macro_rules! impl_log_arg_fixed {
  ($ty:ty, $variant:ident, $conv:expr) => {
    impl LogArg for $ty {
      #[inline(always)]
      fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
        std::mem::size_of::<$ty>()
      }

      #[inline(always)]
      fn encode(&self, dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
        let n = std::mem::size_of::<$ty>();
        dst[..n].copy_from_slice(&self.to_le_bytes());
        n
      }

      #[inline(always)]
      fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
        let n = std::mem::size_of::<$ty>();
        let mut bytes = [0u8; std::mem::size_of::<$ty>()];
        bytes.copy_from_slice(&src[..n]);
        let v = <$ty>::from_le_bytes(bytes);
        (DecodedValue::$variant($conv(v)), n)
      }
    }
  };
}

impl_log_arg_fixed!(i8, I64, |v: i8| v as i64);
impl_log_arg_fixed!(i16, I64, |v: i16| v as i64);
impl_log_arg_fixed!(i32, I64, |v: i32| v as i64);
impl_log_arg_fixed!(i64, I64, |v: i64| v);
impl_log_arg_fixed!(u8, U64, |v: u8| v as u64);
impl_log_arg_fixed!(u16, U64, |v: u16| v as u64);
impl_log_arg_fixed!(u32, U64, |v: u32| v as u64);
impl_log_arg_fixed!(u64, U64, |v: u64| v);
impl_log_arg_fixed!(f64, F64, |v: f64| v);

impl LogArg for f32 {
  #[inline(always)]
  fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
    8
  }

  #[inline(always)]
  fn encode(&self, dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
    dst[..8].copy_from_slice(&(*self as f64).to_le_bytes());
    8
  }

  #[inline(always)]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&src[..8]);
    (DecodedValue::F64(f64::from_le_bytes(bytes)), 8)
  }
}

impl LogArg for bool {
  #[inline(always)]
  fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
    1
  }

  #[inline(always)]
  fn encode(&self, dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
    dst[0] = *self as u8;
    1
  }

  #[inline(always)]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    (DecodedValue::Bool(src[0] != 0), 1)
  }
}

/// Owning or borrowed UTF-8 string: `[length: usize][bytes]` (spec §3).
pub struct Str<'a>(pub &'a str);

impl LogArg for Str<'_> {
  #[inline]
  fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
    std::mem::size_of::<usize>() + self.0.len()
  }

  #[inline]
  fn encode(&self, dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
    let len = self.0.len();
    dst[..8].copy_from_slice(&len.to_le_bytes());
    dst[8..8 + len].copy_from_slice(self.0.as_bytes());
    8 + len
  }

  #[inline]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&src[..8]);
    let len = usize::from_le_bytes(len_bytes);
    let s = std::str::from_utf8(&src[8..8 + len]).unwrap_or("<invalid utf8>");
    (DecodedValue::Str(s), 8 + len)
  }
}

/// Null-terminated C string / fixed char array. The size pass records the
/// `strlen` in `scratch` so the encode pass doesn't rescan (spec §3).
pub struct CStrArg<'a>(pub &'a std::ffi::CStr);

impl LogArg for CStrArg<'_> {
  #[inline]
  fn wire_size(&self, scratch: &mut ScratchLengths) -> usize {
    let len = self.0.to_bytes().len();
    scratch.push(len);
    std::mem::size_of::<usize>() + len + 1 // +1 for the trailing NUL we re-write
  }

  #[inline]
  fn encode(&self, dst: &mut [u8], scratch: &mut ScratchLengths) -> usize {
    let len = scratch.next();
    dst[..8].copy_from_slice(&len.to_le_bytes());
    dst[8..8 + len].copy_from_slice(&self.0.to_bytes()[..len]);
    dst[8 + len] = 0;
    8 + len + 1
  }

  #[inline]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&src[..8]);
    let len = usize::from_le_bytes(len_bytes);
    let s = std::str::from_utf8(&src[8..8 + len]).unwrap_or("<invalid utf8>");
    (DecodedValue::Str(s), 8 + len + 1)
  }
}

/// UTF-16 string, transcoded to UTF-8 at encode time (spec §3).
pub struct WideStr<'a>(pub &'a [u16]);

impl LogArg for WideStr<'_> {
  #[inline]
  fn wire_size(&self, scratch: &mut ScratchLengths) -> usize {
    let utf8_len: usize = char::decode_utf16(self.0.iter().copied())
      .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER).len_utf8())
      .sum();
    scratch.push(utf8_len);
    std::mem::size_of::<usize>() + utf8_len
  }

  #[inline]
  fn encode(&self, dst: &mut [u8], scratch: &mut ScratchLengths) -> usize {
    let utf8_len = scratch.next();
    dst[..8].copy_from_slice(&utf8_len.to_le_bytes());
    let mut pos = 8;
    for r in char::decode_utf16(self.0.iter().copied()) {
      let c = r.unwrap_or(char::REPLACEMENT_CHARACTER);
      let mut buf = [0u8; 4];
      let s = c.encode_utf8(&mut buf).as_bytes();
      dst[pos..pos + s.len()].copy_from_slice(s);
      pos += s.len();
    }
    pos
  }

  #[inline]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&src[..8]);
    let len = usize::from_le_bytes(len_bytes);
    let s = std::str::from_utf8(&src[8..8 + len]).unwrap_or("<invalid utf8>");
    (DecodedValue::Str(s), 8 + len)
  }
}

/// Deferred-format binary blob: `[length][bytes]`, decoded by a
/// user-supplied formatter function (spec §3).
pub struct Blob<'a> {
  pub bytes: &'a [u8],
  pub formatter: fn(&[u8], &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl LogArg for Blob<'_> {
  #[inline]
  fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
    std::mem::size_of::<usize>() + std::mem::size_of::<usize>() + self.bytes.len()
  }

  #[inline]
  fn encode(&self, dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
    let len = self.bytes.len();
    dst[..8].copy_from_slice(&len.to_le_bytes());
    dst[8..16].copy_from_slice(&(self.formatter as usize as u64).to_le_bytes());
    dst[16..16 + len].copy_from_slice(self.bytes);
    16 + len
  }

  #[inline]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&src[..8]);
    let len = usize::from_le_bytes(len_bytes);
    let mut fn_bytes = [0u8; 8];
    fn_bytes.copy_from_slice(&src[8..16]);
    let formatter: fn(&[u8], &mut fmt::Formatter<'_>) -> fmt::Result =
      unsafe { std::mem::transmute(u64::from_le_bytes(fn_bytes) as usize) };
    (DecodedValue::Blob(&src[16..16 + len], formatter), 16 + len)
  }
}

/// Trivially-copyable user type, with a user-declared formatter, stored
/// raw (spec §3 "Trivially-copyable user types: raw bytes, with a
/// user-declared formatter").
pub trait UserPodArg: Copy {
  fn format(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

pub struct UserPod<T: UserPodArg>(pub T);

impl<T: UserPodArg> LogArg for UserPod<T> {
  #[inline]
  fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
    std::mem::size_of::<usize>() + std::mem::size_of::<T>()
  }

  #[inline]
  fn encode(&self, dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
    let decode_fn = <T as UserPodArg>::format as usize as u64;
    dst[..8].copy_from_slice(&decode_fn.to_le_bytes());
    let size = std::mem::size_of::<T>();
    unsafe {
      std::ptr::copy_nonoverlapping(&self.0 as *const T as *const u8, dst[8..8 + size].as_mut_ptr(), size);
    }
    8 + size
  }

  #[inline]
  fn decode(src: &[u8]) -> (DecodedValue<'_>, usize) {
    let mut fn_bytes = [0u8; 8];
    fn_bytes.copy_from_slice(&src[..8]);
    let formatter: fn(&[u8], &mut fmt::Formatter<'_>) -> fmt::Result =
      unsafe { std::mem::transmute(u64::from_le_bytes(fn_bytes) as usize) };
    let size = std::mem::size_of::<T>();
    (DecodedValue::UserPod(&src[8..8 + size], formatter), 8 + size)
  }
}
