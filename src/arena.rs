use core::{
  ptr::{self, NonNull},
  slice,
  sync::atomic::{AtomicU64, Ordering},
};
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use crossbeam_utils::CachePadded;

/// An error indicating that the arena is full
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct ArenaError;

impl core::fmt::Display for ArenaError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "allocation failed because arena is full")
  }
}

impl std::error::Error for ArenaError {}

/// A fixed capacity, lock-free bump allocator.
///
/// Allocations are addressed by `u32` offsets into a single buffer. Offset `0`
/// is never handed out, so it doubles as the nil offset. Nothing is freed
/// individually: the whole buffer is released when the arena is dropped.
pub struct Arena {
  data_ptr: NonNull<u8>,
  n: CachePadded<AtomicU64>,
  cap: usize,
}

// Safety: the buffer is owned by the arena, and allocated ranges never overlap,
// so handing out disjoint views from several threads is sound.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl core::fmt::Debug for Arena {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Arena")
      .field("cap", &self.cap)
      .field("allocated", &self.size())
      .finish()
  }
}

impl Arena {
  /// The largest capacity an arena can have, every offset must fit in a `u32`.
  pub const MAX_CAPACITY: usize = u32::MAX as usize;

  /// Alignment of the backing buffer.
  const ALIGNMENT: usize = 8;

  /// Returns the number of bytes allocated by the arena.
  ///
  /// This includes the reserved nil offset and any alignment padding.
  #[inline]
  pub fn size(&self) -> usize {
    self.n.load(Ordering::Acquire) as usize
  }

  /// Returns the capacity of the arena.
  #[inline]
  pub const fn capacity(&self) -> usize {
    self.cap
  }

  /// Returns how many bytes are still free.
  #[inline]
  pub fn remaining(&self) -> usize {
    self.cap.saturating_sub(self.size())
  }
}

impl Arena {
  /// Creates a zeroed arena of `cap` bytes, capped at [`Arena::MAX_CAPACITY`].
  pub(crate) fn new(cap: usize) -> Self {
    let max = Self::MAX_CAPACITY.min(isize::MAX as usize - (Self::ALIGNMENT - 1));
    let cap = cap.clamp(1, max);

    // Safety: cap is non-zero and no larger than isize::MAX - (ALIGNMENT - 1),
    // ALIGNMENT is a power of two.
    let data_ptr = unsafe {
      let layout = Layout::from_size_align_unchecked(cap, Self::ALIGNMENT);
      match NonNull::new(alloc_zeroed(layout)) {
        Some(ptr) => ptr,
        None => handle_alloc_error(layout),
      }
    };

    Self {
      data_ptr,
      // Don't store data at position 0 in order to reserve offset=0 as a kind
      // of nil pointer.
      n: CachePadded::new(AtomicU64::new(1)),
      cap,
    }
  }

  /// Rewinds the write cursor. Every offset handed out before is invalidated.
  #[inline]
  pub(crate) fn reset(&mut self) {
    *self.n.get_mut() = 1;
  }

  /// Reserves `size` bytes aligned to `align` and returns the offset of the
  /// reservation together with the number of bytes consumed from the arena.
  ///
  /// Fails without reserving anything when the padded request does not fit.
  pub(crate) fn alloc(&self, size: u32, align: u32) -> Result<(u32, u32), ArenaError> {
    debug_assert!(align.is_power_of_two());

    // Reserve align - 1 spare bytes so the offset can be rounded down to `align`.
    let padded = size as u64 + align as u64 - 1;

    let mut current_allocated = self.n.load(Ordering::Acquire);
    loop {
      let want = current_allocated + padded;
      if want > self.cap as u64 {
        #[cfg(feature = "tracing")]
        tracing::debug!(
          cap = self.cap,
          allocated = current_allocated,
          requested = padded,
          "arena exhausted"
        );
        return Err(ArenaError);
      }

      match self.n.compare_exchange_weak(
        current_allocated,
        want,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          // Round down inside the reserved span.
          let offset = (want as u32 - size) & !(align - 1);
          return Ok((offset, padded as u32));
        }
        Err(x) => current_allocated = x,
      }
    }
  }

  /// ## Safety:
  /// - The caller must make sure that `offset + size` is inside a range returned by [`Arena::alloc`].
  #[inline]
  pub(crate) unsafe fn get_bytes(&self, offset: usize, size: usize) -> &[u8] {
    if offset == 0 {
      return &[];
    }

    let ptr = self.get_pointer(offset);
    slice::from_raw_parts(ptr, size)
  }

  /// ## Safety:
  /// - The caller must make sure that `offset + size` is inside a range returned by [`Arena::alloc`].
  /// - The caller must make sure no one else is reading or writing the range.
  #[inline]
  pub(crate) unsafe fn get_bytes_mut(&self, offset: usize, size: usize) -> &mut [u8] {
    if offset == 0 {
      return &mut [];
    }

    let ptr = self.get_pointer_mut(offset);
    slice::from_raw_parts_mut(ptr, size)
  }

  /// ## Safety:
  /// - The caller must make sure that `offset` must be less than the capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer(&self, offset: usize) -> *const u8 {
    if offset == 0 {
      return ptr::null();
    }
    self.data_ptr.as_ptr().add(offset)
  }

  /// ## Safety:
  /// - The caller must make sure that `offset` must be less than the capacity of the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer_mut(&self, offset: usize) -> *mut u8 {
    if offset == 0 {
      return ptr::null_mut();
    }
    self.data_ptr.as_ptr().add(offset)
  }

  /// Translates a pointer into the arena back into its offset.
  ///
  /// ## Safety:
  /// - The caller must make sure that `ptr` is null or points into the arena.
  #[inline]
  pub(crate) unsafe fn get_pointer_offset(&self, ptr: *const u8) -> u32 {
    if ptr.is_null() {
      return 0;
    }

    ptr.offset_from(self.data_ptr.as_ptr()) as u32
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    // Safety: the buffer was allocated in `Arena::new` with the same layout.
    unsafe {
      let layout = Layout::from_size_align_unchecked(self.cap, Self::ALIGNMENT);
      dealloc(self.data_ptr.as_ptr(), layout);
    }
  }
}
