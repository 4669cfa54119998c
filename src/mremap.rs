//! `mremap` emulation.
//!
//! Growing a mapping never copies data. The frames behind the old mapping are
//! unmapped with their capabilities kept, mapped again at the start of a fresh,
//! larger reservation, and new frames fill the rest. If anything on the way
//! fails, the old frames go back to where they were.

use bitflags::bitflags;
use libc::c_int;

use crate::{
  align::{PAGE_BITS, PAGE_SIZE},
  error::{Error, Result},
  frame::Frame,
  is_page_aligned,
  morecore::{Mode, Morecore},
  vspace::{AddressSpace, UnmapMode, VspaceError},
};

bitflags! {
  /// `MREMAP_*` flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct RemapFlags: c_int {
    const MAYMOVE = libc::MREMAP_MAYMOVE;
    const FIXED = libc::MREMAP_FIXED;
  }
}

impl<V: AddressSpace> Morecore<V> {
  /// Grows the mapping at `old_address` from `old_size` to `new_size` bytes,
  /// moving it, and returns the new address.
  ///
  /// Only dynamic mode supports this, and only with exactly
  /// [`RemapFlags::MAYMOVE`], page-aligned arguments and a size that does not
  /// shrink. Anything else is fatal misuse. `new_address` is only meaningful
  /// together with [`RemapFlags::FIXED`], which is rejected.
  ///
  /// When the move fails after the old pages were unmapped, they are restored
  /// and a recoverable error is returned. The restore is expected to succeed;
  /// if it does not, [`Error::RestoreFailed`] is returned and the old mapping
  /// is gone.
  pub fn mremap(
    &mut self,
    old_address: usize,
    old_size: usize,
    new_size: usize,
    flags: RemapFlags,
    _new_address: Option<usize>,
  ) -> Result<usize> {
    let dynamic = match &mut self.mode {
      Mode::Dynamic(dynamic) => dynamic,
      Mode::Static(_) => {
        return Err(Error::Unsupported {
          operation: "mremap",
          reason: "remapping inside a static morecore area",
        });
      }
      Mode::Unconfigured => {
        log::error!("mremap requires a morecore area or address space to be set up");
        return Err(Error::NotConfigured);
      }
    };

    if flags.contains(RemapFlags::FIXED) {
      return Err(Error::Unsupported {
        operation: "mremap",
        reason: "remapping to a fixed address",
      });
    }
    if flags != RemapFlags::MAYMOVE {
      return Err(Error::Unsupported {
        operation: "mremap",
        reason: "resizing without MREMAP_MAYMOVE",
      });
    }
    for (what, value) in [
      ("mremap old address", old_address),
      ("mremap old size", old_size),
      ("mremap new size", new_size),
    ] {
      if !is_page_aligned!(value) {
        return Err(Error::Misaligned { what, value });
      }
    }
    if new_size < old_size {
      return Err(Error::Unsupported {
        operation: "mremap",
        reason: "shrinking a mapping",
      });
    }

    let vspace = &mut dynamic.vspace;
    let num_pages = old_size >> PAGE_BITS;
    let new_pages = new_size >> PAGE_BITS;

    let frames = (0..num_pages)
      .map(|i| {
        let vaddr = old_address + i * PAGE_SIZE;
        vspace.frame_at(vaddr).ok_or(VspaceError::NotMapped { vaddr })
      })
      .collect::<std::result::Result<Vec<Frame>, _>>()?;

    vspace.unmap_pages(old_address, num_pages, UnmapMode::Preserve);

    match move_frames(vspace, &frames, new_pages) {
      Ok(new_address) => {
        log::debug!(
          "mremap: {old_address:#x} ({num_pages} pages) -> {new_address:#x} ({new_pages} pages)"
        );
        Ok(new_address)
      }
      Err(err) => {
        restore(vspace, &frames, old_address)?;
        Err(Error::Vspace(err))
      }
    }
  }
}

/// Maps `frames` at the start of a new `new_pages` reservation and commits
/// fresh frames behind them. Undoes its own work before returning an error.
fn move_frames<V: AddressSpace>(
  vspace: &mut V,
  frames: &[Frame],
  new_pages: usize,
) -> std::result::Result<usize, VspaceError> {
  let (reservation, new_address) = vspace.reserve_range(new_pages).inspect_err(|err| {
    log::error!("failed to make reservation for remap: {err}");
  })?;

  if let Err(err) = vspace.map_pages_at(frames, new_address, &reservation) {
    log::error!("mapping existing pages into new reservation failed: {err}");
    vspace.free_reservation(reservation);
    return Err(err);
  }

  let grown_at = new_address + frames.len() * PAGE_SIZE;
  if let Err(err) = vspace.new_pages_at(grown_at, new_pages - frames.len(), &reservation) {
    log::error!("creating new pages for remap region failed: {err}");
    vspace.unmap_pages(new_address, frames.len(), UnmapMode::Preserve);
    vspace.free_reservation(reservation);
    return Err(err);
  }

  // The pages stay mapped; only the bookkeeping goes.
  vspace.free_reservation(reservation);

  Ok(new_address)
}

/// Puts `frames` back at `old_address`.
fn restore<V: AddressSpace>(
  vspace: &mut V,
  frames: &[Frame],
  old_address: usize,
) -> Result<()> {
  let failed = |source: VspaceError| {
    log::error!("restoring mapping at {old_address:#x} failed: {source}");
    Error::RestoreFailed {
      addr: old_address,
      source,
    }
  };

  let reservation = vspace
    .reserve_range_at(old_address, frames.len())
    .map_err(failed)?;
  let mapped = vspace.map_pages_at(frames, old_address, &reservation);
  vspace.free_reservation(reservation);

  mapped.map_err(failed)
}
