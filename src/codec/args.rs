//! Per-call-site argument lists (spec §4.3, §9).
//!
//! Each `log!` call site has a fixed, statically-known tuple of argument
//! types. Rather than writing a runtime tag per argument (as the teacher's
//! scratch `Args1`/`Args2` do), we take the address of a `decode` function
//! monomorphized for that exact tuple and store the pointer itself in the
//! record header. The backend calls through it without knowing the types;
//! the generic machinery that produced it did know them, at the call site,
//! at compile time — the same guarantee the source's C++ template
//! instantiation gives, reached by a different mechanism.

use super::{DecodedValue, LogArg, ScratchLengths};

/// Function pointer stored inline in a record: decodes every argument in
/// order, appending each [`DecodedValue`] to `out`. Returns total bytes
/// consumed so the backend can skip past the payload.
pub type DecodeFn = for<'a> fn(&'a [u8], &mut Vec<DecodedValue<'a>>) -> usize;

/// Implemented by every fixed-arity argument list (`()`, `(A,)`, `(A, B)`,
/// ...). Bridges a tuple of [`LogArg`]s to the wire format plus the
/// decoder pointer the backend needs.
pub trait ArgList {
  fn wire_size(&self, scratch: &mut ScratchLengths) -> usize;
  /// Encodes every field in order into `dst`, returning total bytes
  /// written. Each field's own `encode` reports how much of its sub-slice
  /// it actually used, so no field size needs recomputing here.
  fn encode(&self, dst: &mut [u8], scratch: &mut ScratchLengths) -> usize;
  fn decode_fn() -> DecodeFn;
}

macro_rules! impl_arg_list {
  () => {
    impl ArgList for () {
      #[inline]
      fn wire_size(&self, _scratch: &mut ScratchLengths) -> usize {
        0
      }
      #[inline]
      fn encode(&self, _dst: &mut [u8], _scratch: &mut ScratchLengths) -> usize {
        0
      }
      #[inline]
      fn decode_fn() -> DecodeFn {
        fn decode<'a>(_src: &'a [u8], _out: &mut Vec<DecodedValue<'a>>) -> usize {
          0
        }
        decode
      }
    }
  };
  ($($name:ident : $idx:tt),+) => {
    impl<$($name: LogArg),+> ArgList for ($($name,)+) {
      #[inline]
      fn wire_size(&self, scratch: &mut ScratchLengths) -> usize {
        let mut total = 0;
        $(total += self.$idx.wire_size(scratch);)+
        total
      }

      #[inline]
      fn encode(&self, dst: &mut [u8], scratch: &mut ScratchLengths) -> usize {
        let mut offset = 0;
        $(
          offset += self.$idx.encode(&mut dst[offset..], scratch);
        )+
        offset
      }

      #[inline]
      fn decode_fn() -> DecodeFn {
        fn decode<'a, $($name: LogArg),+>(src: &'a [u8], out: &mut Vec<DecodedValue<'a>>) -> usize {
          let mut offset = 0;
          $(
            let (value, consumed) = $name::decode(&src[offset..]);
            out.push(value);
            offset += consumed;
          )+
          offset
        }
        decode::<$($name),+>
      }
    }
  };
}

impl_arg_list!();
impl_arg_list!(A0: 0);
impl_arg_list!(A0: 0, A1: 1);
impl_arg_list!(A0: 0, A1: 1, A2: 2);
impl_arg_list!(A0: 0, A1: 1, A2: 2, A3: 3);
impl_arg_list!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_arg_list!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn two_arg_roundtrip() {
    use super::super::Str;
    let args: (i32, Str<'_>) = (42, Str("hi"));
    let mut scratch = ScratchLengths::default();
    let size = args.wire_size(&mut scratch);
    let mut buf = vec![0u8; size];
    scratch.rewind_for_encode();
    args.encode(&mut buf, &mut scratch);

    let decode_fn = <(i32, Str<'_>)>::decode_fn();
    let mut out = Vec::new();
    let consumed = decode_fn(&buf, &mut out);
    assert_eq!(consumed, size);
    assert_eq!(out.len(), 2);
    match &out[0] {
      DecodedValue::I64(v) => assert_eq!(*v, 42),
      _ => panic!("expected I64"),
    }
    match &out[1] {
      DecodedValue::Str(s) => assert_eq!(*s, "hi"),
      _ => panic!("expected Str"),
    }
  }
}
