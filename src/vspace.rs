//! The address-space manager the broker delegates to in dynamic mode.
//!
//! The broker never touches page tables itself. Everything it needs from the
//! kernel side is expressed by [`AddressSpace`]: reserving ranges, committing
//! fresh frames, moving existing frames around and looking up which frame backs
//! an address.

use std::fmt;

use crate::frame::{Frame, Reservation};

/// What happens to the frames backing pages that get unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapMode {
  /// Frames stay alive; the caller keeps their capabilities for later reuse.
  Preserve,
  /// Frames are returned to the manager and their capabilities revoked.
  Destroy,
}

/// Failures reported by an address-space manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VspaceError {
  /// No virtual range of the requested size is available.
  NoVirtualSpace,
  /// No physical frames are left to commit.
  NoFrames,
  /// The range is not covered by the given reservation.
  NotReserved { vaddr: usize },
  /// A page in the range is already mapped.
  AlreadyMapped { vaddr: usize },
  /// No frame backs the page.
  NotMapped { vaddr: usize },
  /// The range overlaps an existing reservation.
  Overlap { vaddr: usize },
  /// The manager was asked to fail this operation (simulation only).
  Injected,
}

impl fmt::Display for VspaceError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      VspaceError::NoVirtualSpace => write!(f, "no virtual address range available"),
      VspaceError::NoFrames => write!(f, "out of physical frames"),
      VspaceError::NotReserved { vaddr } => write!(f, "address {vaddr:#x} is not reserved"),
      VspaceError::AlreadyMapped { vaddr } => write!(f, "address {vaddr:#x} is already mapped"),
      VspaceError::NotMapped { vaddr } => write!(f, "address {vaddr:#x} is not mapped"),
      VspaceError::Overlap { vaddr } => {
        write!(f, "range at {vaddr:#x} overlaps an existing reservation")
      }
      VspaceError::Injected => write!(f, "injected failure"),
    }
  }
}

impl std::error::Error for VspaceError {}

/// A capability-checked virtual address space manager.
///
/// All addresses are page aligned and all counts are in pages.
pub trait AddressSpace {
  /// Reserves `pages` pages anywhere and returns the reservation with its
  /// start address.
  fn reserve_range(
    &mut self,
    pages: usize,
  ) -> Result<(Reservation, usize), VspaceError>;

  /// Reserves `pages` pages starting exactly at `vaddr`.
  fn reserve_range_at(
    &mut self,
    vaddr: usize,
    pages: usize,
  ) -> Result<Reservation, VspaceError>;

  /// Maps the given frames at consecutive pages starting at `vaddr`.
  fn map_pages_at(
    &mut self,
    frames: &[Frame],
    vaddr: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError>;

  /// Unmaps `pages` pages starting at `vaddr`. Pages that are not mapped are
  /// skipped.
  fn unmap_pages(
    &mut self,
    vaddr: usize,
    pages: usize,
    mode: UnmapMode,
  );

  /// Commits `pages` fresh zeroed frames at consecutive pages from `vaddr`.
  fn new_pages_at(
    &mut self,
    vaddr: usize,
    pages: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError>;

  /// Commits `pages` fresh zeroed frames at an address of the manager's
  /// choosing and returns that address.
  fn new_pages(
    &mut self,
    pages: usize,
  ) -> Result<usize, VspaceError>;

  /// Returns the frame backing the page at `vaddr`, if any.
  fn frame_at(
    &self,
    vaddr: usize,
  ) -> Option<Frame>;

  /// Drops the bookkeeping of a reservation. Pages mapped inside it stay
  /// mapped.
  fn free_reservation(
    &mut self,
    reservation: Reservation,
  );
}

impl<T: AddressSpace + ?Sized> AddressSpace for Box<T> {
  fn reserve_range(
    &mut self,
    pages: usize,
  ) -> Result<(Reservation, usize), VspaceError> {
    (**self).reserve_range(pages)
  }

  fn reserve_range_at(
    &mut self,
    vaddr: usize,
    pages: usize,
  ) -> Result<Reservation, VspaceError> {
    (**self).reserve_range_at(vaddr, pages)
  }

  fn map_pages_at(
    &mut self,
    frames: &[Frame],
    vaddr: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError> {
    (**self).map_pages_at(frames, vaddr, reservation)
  }

  fn unmap_pages(
    &mut self,
    vaddr: usize,
    pages: usize,
    mode: UnmapMode,
  ) {
    (**self).unmap_pages(vaddr, pages, mode)
  }

  fn new_pages_at(
    &mut self,
    vaddr: usize,
    pages: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError> {
    (**self).new_pages_at(vaddr, pages, reservation)
  }

  fn new_pages(
    &mut self,
    pages: usize,
  ) -> Result<usize, VspaceError> {
    (**self).new_pages(pages)
  }

  fn frame_at(
    &self,
    vaddr: usize,
  ) -> Option<Frame> {
    (**self).frame_at(vaddr)
  }

  fn free_reservation(
    &mut self,
    reservation: Reservation,
  ) {
    (**self).free_reservation(reservation)
  }
}
