//! The static arena.
//!
//! ```text
//!              +-----------------+  end = origin + capacity
//!              |/////////////////|
//!              |/handed out by //|
//!              |/////mmap////////|
//!         ---  +-----------------+  top = base + free
//!          ^   |                 |
//!     free |   | available space |
//!          v   |                 |
//!         ---  +-----------------+  base = origin + offset
//!          ^   |/////////////////|
//!   offset |   |//brk heap///////|
//!          v   |/////////////////|
//!         ---  +-----------------+  origin
//! ```
//!
//! The break grows up from `origin`, anonymous mappings are carved down from
//! `end`. Moving the break never moves `top`.

use crate::{
  align::PAGE_SIZE,
  error::{Error, Result},
  is_page_aligned, page_align,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
  origin: usize,
  capacity: usize,
  break_offset: usize,
  free_bytes: usize,
}

impl Region {
  /// Creates a fresh region covering `[origin, origin + capacity)`.
  ///
  /// Both values must be page aligned.
  pub fn new(
    origin: usize,
    capacity: usize,
  ) -> Result<Self> {
    if !is_page_aligned!(origin) {
      return Err(Error::Misaligned {
        what: "morecore buffer",
        value: origin,
      });
    }
    if !is_page_aligned!(capacity) {
      return Err(Error::Misaligned {
        what: "morecore buffer size",
        value: capacity,
      });
    }
    if origin.checked_add(capacity).is_none() {
      return Err(Error::RegionOverflow { origin, capacity });
    }

    Ok(Self {
      origin,
      capacity,
      break_offset: 0,
      free_bytes: capacity,
    })
  }

  pub fn origin(&self) -> usize {
    self.origin
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn break_offset(&self) -> usize {
    self.break_offset
  }

  pub fn free_bytes(&self) -> usize {
    self.free_bytes
  }

  /// Bottom of the free middle space, i.e. the current break.
  pub fn base(&self) -> usize {
    debug_assert!(self.break_offset <= self.capacity);
    self.origin + self.break_offset
  }

  /// Lowest address handed out by the mapper so far, or `end` if none.
  pub fn top(&self) -> usize {
    debug_assert!(self.break_offset + self.free_bytes <= self.capacity);
    self.base() + self.free_bytes
  }

  pub fn end(&self) -> usize {
    self.origin + self.capacity
  }

  /// Whether anything has been handed out since setup.
  pub fn is_touched(&self) -> bool {
    self.break_offset != 0 || self.free_bytes != self.capacity
  }

  /// Moves the break to `target`, keeping `top` where it is.
  pub fn move_break(
    &mut self,
    target: usize,
  ) -> Result<usize> {
    let top = self.top();
    if target < self.origin || target > top {
      return Err(Error::BreakOutOfRange {
        target,
        start: self.origin,
        top,
      });
    }
    if !is_page_aligned!(target) {
      return Err(Error::Misaligned {
        what: "newbrk",
        value: target,
      });
    }

    let offs_top = self.break_offset + self.free_bytes;
    self.break_offset = target - self.origin;
    self.free_bytes = offs_top - self.break_offset;

    debug_assert_eq!(target, self.base());
    Ok(self.base())
  }

  /// Carves `length` bytes, rounded up to whole pages, off the top of the free
  /// space and returns the start of the carved chunk.
  pub fn carve_top(
    &mut self,
    length: usize,
  ) -> Result<usize> {
    let rounded = match length.checked_add(PAGE_SIZE - 1) {
      Some(_) => page_align!(length),
      None => usize::MAX,
    };

    if rounded > self.free_bytes {
      return Err(Error::OutOfMemory {
        requested: rounded,
        available: self.free_bytes,
      });
    }

    let remaining = self.free_bytes - rounded;
    let chunk = self.base() + remaining;

    if !is_page_aligned!(chunk) {
      return Err(Error::Misaligned {
        what: "mapping return address",
        value: chunk,
      });
    }

    self.free_bytes = remaining;
    Ok(chunk)
  }
}
