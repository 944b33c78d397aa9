//! Wait-free byte-granular SPSC ring buffer (spec §4.1).
//!
//! One producer, one consumer. Capacity is a power of two. Every
//! reservation is contiguous: on `unix` the backing region is mapped twice
//! at adjacent virtual addresses (the "magic ring buffer" trick), so a
//! reservation that straddles the physical end of the buffer is still a
//! single contiguous slice. Platforms without that trick fall back to
//! rejecting a reservation that would straddle the end, exactly the
//! fallback spec §4.1 names — the caller's policy (Blocking/Dropping)
//! decides what happens next.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Per-record hard limit (spec §3): a single record may never exceed this.
pub const MAX_RECORD_SIZE: usize = (1usize << 31) - 1;

struct Shared {
  buf: Backing,
  mask: usize,
  write_pos: CachePadded<AtomicUsize>,
  read_pos: CachePadded<AtomicUsize>,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

/// Creates a bounded SPSC queue. `capacity` is rounded up to a power of two
/// and (on the mirrored-mapping path) further rounded up to a whole number
/// of pages.
pub fn bounded(capacity: usize) -> (BoundedProducer, BoundedConsumer) {
  let capacity = capacity.next_power_of_two().max(4096);
  let buf = Backing::new(capacity);
  let mask = buf.capacity() - 1;

  let shared = Arc::new(Shared {
    buf,
    mask,
    write_pos: CachePadded::new(AtomicUsize::new(0)),
    read_pos: CachePadded::new(AtomicUsize::new(0)),
  });

  (
    BoundedProducer { shared: Arc::clone(&shared), local_write: 0, cached_read: 0 },
    BoundedConsumer { shared, local_read: 0, cached_write: 0 },
  )
}

pub struct BoundedProducer {
  shared: Arc<Shared>,
  local_write: usize,
  cached_read: usize,
}

impl BoundedProducer {
  #[inline]
  pub fn capacity(&self) -> usize {
    self.shared.mask + 1
  }

  /// Reserves `n` contiguous bytes for writing, or `None` if the queue
  /// lacks space (spec §4.1 "overflow policy is a normal outcome").
  #[inline]
  pub fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
    if n > self.capacity() {
      return None;
    }
    let write = self.local_write;
    let used = write.wrapping_sub(self.cached_read);
    if used + n > self.capacity() {
      self.cached_read = self.shared.read_pos.load(Ordering::Acquire);
      let used = write.wrapping_sub(self.cached_read);
      if used + n > self.capacity() {
        return None;
      }
    }

    if !self.shared.buf.is_mirrored() {
      let idx = write & self.shared.mask;
      if idx + n > self.capacity() {
        // Straddles the physical end; reject so the caller retries once
        // the consumer has drained enough for the wrap to land cleanly.
        return None;
      }
    }

    let idx = write & self.shared.mask;
    Some(unsafe { self.shared.buf.slice_mut(idx, n) })
  }

  /// Publishes the `n` bytes just written via [`Self::reserve`].
  #[inline]
  pub fn commit_write(&mut self, n: usize) {
    let new_write = self.local_write.wrapping_add(n);
    self.shared.write_pos.store(new_write, Ordering::Release);
    self.local_write = new_write;
  }

  #[inline]
  pub fn is_disconnected(&self) -> bool {
    Arc::strong_count(&self.shared) == 1
  }
}

unsafe impl Send for BoundedProducer {}

pub struct BoundedConsumer {
  shared: Arc<Shared>,
  local_read: usize,
  cached_write: usize,
}

impl BoundedConsumer {
  #[inline]
  pub fn capacity(&self) -> usize {
    self.shared.mask + 1
  }

  /// Returns the currently readable contiguous range, possibly empty.
  #[inline]
  pub fn begin_read(&mut self) -> &[u8] {
    let read = self.local_read;
    if read == self.cached_write {
      self.cached_write = self.shared.write_pos.load(Ordering::Acquire);
    }
    let available = self.cached_write.wrapping_sub(read);
    if available == 0 {
      return &[];
    }

    let idx = read & self.shared.mask;
    let len = if self.shared.buf.is_mirrored() {
      available.min(self.capacity())
    } else {
      available.min(self.capacity() - idx)
    };
    unsafe { self.shared.buf.slice(idx, len) }
  }

  /// Releases `n` bytes returned by the most recent [`Self::begin_read`].
  #[inline]
  pub fn finish_read(&mut self, n: usize) {
    let new_read = self.local_read.wrapping_add(n);
    self.shared.read_pos.store(new_read, Ordering::Release);
    self.local_read = new_read;
  }

  #[inline]
  pub fn is_empty(&mut self) -> bool {
    self.begin_read().is_empty()
  }

  #[inline]
  pub fn is_disconnected(&self) -> bool {
    Arc::strong_count(&self.shared) == 1
  }
}

unsafe impl Send for BoundedConsumer {}

#[cfg(unix)]
mod mirrored {
  use std::ffi::CString;
  use std::io;
  use std::sync::atomic::{AtomicU64, Ordering};

  static NEXT_ID: AtomicU64 = AtomicU64::new(0);

  /// Two adjacent `mmap` windows backed by the same shared-memory object,
  /// so a write at offset `capacity - k` is visible, unmodified, at
  /// `2*capacity - k` too: any reservation of up to `capacity` bytes
  /// starting anywhere in `[0, capacity)` is contiguous in the process's
  /// address space.
  pub struct MirroredBuffer {
    ptr: *mut u8,
    capacity: usize,
  }

  impl MirroredBuffer {
    pub fn new(requested: usize) -> io::Result<Self> {
      let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
      let capacity = requested.div_ceil(page.max(1)) * page.max(1);

      unsafe {
        let name = CString::new(format!(
          "/quill-rs-{}-{}",
          std::process::id(),
          NEXT_ID.fetch_add(1, Ordering::Relaxed)
        ))
        .unwrap();

        let fd = libc::shm_open(name.as_ptr(), libc::O_RDWR | libc::O_CREAT | libc::O_EXCL, 0o600);
        if fd < 0 {
          return Err(io::Error::last_os_error());
        }
        libc::shm_unlink(name.as_ptr());

        if libc::ftruncate(fd, capacity as libc::off_t) != 0 {
          libc::close(fd);
          return Err(io::Error::last_os_error());
        }

        let base = libc::mmap(
          std::ptr::null_mut(),
          capacity * 2,
          libc::PROT_NONE,
          libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
          -1,
          0,
        );
        if base == libc::MAP_FAILED {
          libc::close(fd);
          return Err(io::Error::last_os_error());
        }

        let first = libc::mmap(
          base,
          capacity,
          libc::PROT_READ | libc::PROT_WRITE,
          libc::MAP_SHARED | libc::MAP_FIXED,
          fd,
          0,
        );
        let second = libc::mmap(
          base.add(capacity),
          capacity,
          libc::PROT_READ | libc::PROT_WRITE,
          libc::MAP_SHARED | libc::MAP_FIXED,
          fd,
          0,
        );
        libc::close(fd);

        if first == libc::MAP_FAILED || second == libc::MAP_FAILED {
          libc::munmap(base, capacity * 2);
          return Err(io::Error::last_os_error());
        }

        Ok(Self { ptr: base as *mut u8, capacity })
      }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
      self.capacity
    }

    #[inline]
    pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
      std::slice::from_raw_parts_mut(self.ptr.add(offset), len)
    }

    #[inline]
    pub unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
      std::slice::from_raw_parts(self.ptr.add(offset), len)
    }
  }

  impl Drop for MirroredBuffer {
    fn drop(&mut self) {
      unsafe {
        libc::munmap(self.ptr as *mut libc::c_void, self.capacity * 2);
      }
    }
  }
}

/// Owns the ring's backing storage. Prefers the real double-mapped region
/// on unix; falls back to a plain buffer (with non-wrapping reservations)
/// elsewhere.
enum Backing {
  #[cfg(unix)]
  Mirrored(mirrored::MirroredBuffer),
  Plain(Box<[u8]>),
}

impl Backing {
  fn new(capacity: usize) -> Self {
    #[cfg(unix)]
    {
      if let Ok(buf) = mirrored::MirroredBuffer::new(capacity) {
        return Backing::Mirrored(buf);
      }
    }
    Backing::Plain(vec![0u8; capacity].into_boxed_slice())
  }

  #[inline]
  fn capacity(&self) -> usize {
    match self {
      #[cfg(unix)]
      Backing::Mirrored(m) => m.capacity(),
      Backing::Plain(b) => b.len(),
    }
  }

  #[inline]
  fn is_mirrored(&self) -> bool {
    #[cfg(unix)]
    {
      matches!(self, Backing::Mirrored(_))
    }
    #[cfg(not(unix))]
    {
      let Backing::Plain(_) = self;
      false
    }
  }

  #[inline]
  unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
    match self {
      #[cfg(unix)]
      Backing::Mirrored(m) => m.slice_mut(offset, len),
      Backing::Plain(b) => {
        std::slice::from_raw_parts_mut((b.as_ptr() as *mut u8).add(offset), len)
      }
    }
  }

  #[inline]
  unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
    match self {
      #[cfg(unix)]
      Backing::Mirrored(m) => m.slice(offset, len),
      Backing::Plain(b) => std::slice::from_raw_parts(b.as_ptr().add(offset), len),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserve_commit_roundtrip() {
    let (mut prod, mut cons) = bounded(4096);
    {
      let w = prod.reserve(5).unwrap();
      w.copy_from_slice(b"hello");
    }
    prod.commit_write(5);

    let r = cons.begin_read();
    assert_eq!(r, b"hello");
    cons.finish_read(5);
    assert!(cons.is_empty());
  }

  #[test]
  fn full_queue_rejects_reservation() {
    let (mut prod, _cons) = bounded(4096);
    let cap = prod.capacity();
    assert!(prod.reserve(cap + 1).is_none());
  }

  #[test]
  fn wrap_around_is_contiguous_or_rejected() {
    let (mut prod, mut cons) = bounded(4096);
    let cap = prod.capacity();

    // Fill to near the end, drain, then reserve across the wrap point.
    {
      let w = prod.reserve(cap - 8).unwrap();
      w.fill(0xAB);
    }
    prod.commit_write(cap - 8);
    cons.finish_read(cap - 8);

    match prod.reserve(64) {
      Some(slice) => assert_eq!(slice.len(), 64),
      None => {} // acceptable on the non-mirrored fallback
    }
  }
}
