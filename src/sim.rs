//! An in-memory address-space manager.
//!
//! [`SimVspace`] keeps reservations and page mappings in ordered maps and
//! hands out made-up frame capabilities. It enforces the same rules a real
//! manager would (pages are only committed inside a reservation, nothing is
//! mapped twice, reservations never overlap) and can be told to fail a chosen
//! call, which is how the failure paths of the broker get exercised on a host.

use std::{collections::BTreeMap, ops::Range};

use crate::{
  align::PAGE_SIZE,
  frame::{Frame, Reservation},
  vspace::{AddressSpace, UnmapMode, VspaceError},
};

const DEFAULT_BASE: usize = 0x4000_0000;
const DEFAULT_LIMIT: usize = 0x8000_0000;
const COOKIE_BASE: usize = 0x8_0000_0000;

/// Operations of [`SimVspace`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
  Reserve,
  ReserveAt,
  Map,
  NewPagesAt,
  NewPages,
}

#[derive(Debug)]
pub struct SimVspace {
  reservations: BTreeMap<u64, Range<usize>>,
  pages: BTreeMap<usize, Frame>,
  next_id: u64,
  next_cap: usize,
  next_vaddr: usize,
  vaddr_limit: usize,
  live_frames: usize,
  frame_limit: Option<usize>,
  fault: Option<(SimOp, usize)>,
}

impl SimVspace {
  pub fn new() -> Self {
    Self {
      reservations: BTreeMap::new(),
      pages: BTreeMap::new(),
      next_id: 1,
      next_cap: 1,
      next_vaddr: DEFAULT_BASE,
      vaddr_limit: DEFAULT_LIMIT,
      live_frames: 0,
      frame_limit: None,
      fault: None,
    }
  }

  /// Caps the number of frames that may be alive at once.
  pub fn with_frame_limit(
    mut self,
    frames: usize,
  ) -> Self {
    self.frame_limit = Some(frames);
    self
  }

  /// Makes the `nth` (zero based) upcoming call of `op` fail with
  /// [`VspaceError::Injected`]. Only one fault is armed at a time.
  pub fn fail_nth(
    &mut self,
    op: SimOp,
    nth: usize,
  ) {
    self.fault = Some((op, nth));
  }

  /// Disarms a pending fault.
  pub fn clear_fault(&mut self) {
    self.fault = None;
  }

  pub fn is_mapped(
    &self,
    vaddr: usize,
  ) -> bool {
    self.pages.contains_key(&page_of(vaddr))
  }

  pub fn mapped_pages(&self) -> usize {
    self.pages.len()
  }

  pub fn reservation_count(&self) -> usize {
    self.reservations.len()
  }

  pub fn live_frames(&self) -> usize {
    self.live_frames
  }

  /// Address range covered by a reservation that is still held.
  pub fn reserved_range(
    &self,
    reservation: &Reservation,
  ) -> Option<Range<usize>> {
    self.reservations.get(&reservation.id()).cloned()
  }

  fn inject(
    &mut self,
    op: SimOp,
  ) -> Result<(), VspaceError> {
    match self.fault {
      Some((armed, 0)) if armed == op => {
        self.fault = None;
        Err(VspaceError::Injected)
      }
      Some((armed, n)) if armed == op => {
        self.fault = Some((armed, n - 1));
        Ok(())
      }
      _ => Ok(()),
    }
  }

  fn insert_reservation(
    &mut self,
    range: Range<usize>,
  ) -> Reservation {
    let id = self.next_id;
    self.next_id += 1;
    self.reservations.insert(id, range);
    Reservation::new(id)
  }

  fn reserve_anywhere(
    &mut self,
    pages: usize,
  ) -> Result<(Reservation, usize), VspaceError> {
    let start = self.next_vaddr;
    let end = pages
      .checked_mul(PAGE_SIZE)
      .and_then(|len| start.checked_add(len))
      .filter(|end| *end <= self.vaddr_limit)
      .ok_or(VspaceError::NoVirtualSpace)?;

    // One unreserved guard page between consecutive reservations.
    self.next_vaddr = end + PAGE_SIZE;

    Ok((self.insert_reservation(start..end), start))
  }

  fn check_reserved(
    &self,
    vaddr: usize,
    pages: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError> {
    let range = self
      .reservations
      .get(&reservation.id())
      .ok_or(VspaceError::NotReserved { vaddr })?;

    let end = vaddr + pages * PAGE_SIZE;
    if vaddr < range.start || end > range.end {
      return Err(VspaceError::NotReserved { vaddr });
    }

    Ok(())
  }

  fn check_unmapped(
    &self,
    vaddr: usize,
    pages: usize,
  ) -> Result<(), VspaceError> {
    let end = vaddr + pages * PAGE_SIZE;
    match self.pages.range(vaddr..end).next() {
      Some((mapped, _)) => Err(VspaceError::AlreadyMapped { vaddr: *mapped }),
      None => Ok(()),
    }
  }

  fn commit(
    &mut self,
    vaddr: usize,
    pages: usize,
  ) -> Result<(), VspaceError> {
    if self
      .frame_limit
      .is_some_and(|limit| self.live_frames + pages > limit)
    {
      return Err(VspaceError::NoFrames);
    }

    for i in 0..pages {
      let cap = self.next_cap;
      self.next_cap += 1;

      let frame = Frame::new(cap, COOKIE_BASE + cap * PAGE_SIZE);
      self.pages.insert(vaddr + i * PAGE_SIZE, frame);
    }
    self.live_frames += pages;

    Ok(())
  }
}

impl Default for SimVspace {
  fn default() -> Self {
    Self::new()
  }
}

impl AddressSpace for SimVspace {
  fn reserve_range(
    &mut self,
    pages: usize,
  ) -> Result<(Reservation, usize), VspaceError> {
    self.inject(SimOp::Reserve)?;
    self.reserve_anywhere(pages)
  }

  fn reserve_range_at(
    &mut self,
    vaddr: usize,
    pages: usize,
  ) -> Result<Reservation, VspaceError> {
    self.inject(SimOp::ReserveAt)?;

    let end = vaddr + pages * PAGE_SIZE;
    let overlaps = self
      .reservations
      .values()
      .any(|range| range.start < end && vaddr < range.end);
    if overlaps {
      return Err(VspaceError::Overlap { vaddr });
    }
    self.check_unmapped(vaddr, pages)?;

    if end > self.next_vaddr {
      self.next_vaddr = end + PAGE_SIZE;
    }

    Ok(self.insert_reservation(vaddr..end))
  }

  fn map_pages_at(
    &mut self,
    frames: &[Frame],
    vaddr: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError> {
    self.inject(SimOp::Map)?;
    self.check_reserved(vaddr, frames.len(), reservation)?;
    self.check_unmapped(vaddr, frames.len())?;

    for (i, frame) in frames.iter().enumerate() {
      self.pages.insert(vaddr + i * PAGE_SIZE, *frame);
    }

    Ok(())
  }

  fn unmap_pages(
    &mut self,
    vaddr: usize,
    pages: usize,
    mode: UnmapMode,
  ) {
    for i in 0..pages {
      let removed = self.pages.remove(&(vaddr + i * PAGE_SIZE));
      if removed.is_some() && mode == UnmapMode::Destroy {
        self.live_frames -= 1;
      }
    }
  }

  fn new_pages_at(
    &mut self,
    vaddr: usize,
    pages: usize,
    reservation: &Reservation,
  ) -> Result<(), VspaceError> {
    self.inject(SimOp::NewPagesAt)?;
    self.check_reserved(vaddr, pages, reservation)?;
    self.check_unmapped(vaddr, pages)?;
    self.commit(vaddr, pages)
  }

  fn new_pages(
    &mut self,
    pages: usize,
  ) -> Result<usize, VspaceError> {
    self.inject(SimOp::NewPages)?;

    let (reservation, vaddr) = self.reserve_anywhere(pages)?;
    let committed = self.commit(vaddr, pages);
    self.free_reservation(reservation);
    committed?;

    Ok(vaddr)
  }

  fn frame_at(
    &self,
    vaddr: usize,
  ) -> Option<Frame> {
    self.pages.get(&page_of(vaddr)).copied()
  }

  fn free_reservation(
    &mut self,
    reservation: Reservation,
  ) {
    self.reservations.remove(&reservation.id());
  }
}

fn page_of(vaddr: usize) -> usize {
  vaddr & !(PAGE_SIZE - 1)
}
