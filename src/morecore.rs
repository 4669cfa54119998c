//! The broker context and its operating modes.
//!
//! A [`Morecore`] is in exactly one of three states: nothing configured yet, a
//! static arena, or a dynamic address space. The libc entry points live in
//! [`brk`](crate::brk), [`mmap`](crate::mmap) and [`mremap`](crate::mremap) as
//! further `impl` blocks on the same type.

use std::ptr;

use crate::{
  align::bytes_to_pages,
  config::{Config, internal_area},
  error::{Error, ModeKind, Result},
  frame::Reservation,
  is_page_aligned,
  region::Region,
  vspace::AddressSpace,
};

/// State of the dynamic mode.
pub(crate) struct Dynamic<V> {
  pub(crate) vspace: V,
  /// Next address the break grows into. Every page below it, down to
  /// `brk_reservation_start`, is committed.
  pub(crate) brk_start: usize,
  pub(crate) brk_reservation: Reservation,
  pub(crate) brk_reservation_start: usize,
  /// Anonymous mappings handed out so far.
  pub(crate) mappings: usize,
}

impl<V> Dynamic<V> {
  fn is_touched(&self) -> bool {
    self.brk_start != self.brk_reservation_start || self.mappings != 0
  }
}

pub(crate) enum Mode<V> {
  Unconfigured,
  Static(Region),
  Dynamic(Dynamic<V>),
}

impl<V> Mode<V> {
  fn kind(&self) -> ModeKind {
    match self {
      Mode::Unconfigured => ModeKind::Unconfigured,
      Mode::Static(_) => ModeKind::Static,
      Mode::Dynamic(_) => ModeKind::Dynamic,
    }
  }
}

/// Emulates the dynamic-memory system calls of a libc on top of either a fixed
/// arena or an address-space manager.
///
/// `V` is the address-space manager used in dynamic mode. The process-wide
/// instance behind the C entry points uses a boxed trait object.
pub struct Morecore<V = Box<dyn AddressSpace + Send>> {
  pub(crate) mode: Mode<V>,
}

impl<V: AddressSpace> Morecore<V> {
  pub const fn new() -> Self {
    Self {
      mode: Mode::Unconfigured,
    }
  }

  /// Builds a broker from the configuration. A non-zero static area size gets
  /// backed by the internal static buffer, so nothing is allocated.
  pub fn from_config(config: &Config) -> Result<Self> {
    let mut morecore = Self::new();

    if config.static_area_bytes > 0 {
      let area = internal_area(config.static_area_bytes)?;
      morecore.setup_region(area, config.static_area_bytes)?;
    }

    Ok(morecore)
  }

  pub fn mode(&self) -> ModeKind {
    self.mode.kind()
  }

  /// The static arena, if that is the active mode.
  pub fn arena(&self) -> Option<&Region> {
    match &self.mode {
      Mode::Static(region) => Some(region),
      _ => None,
    }
  }

  /// The address-space manager, if dynamic mode is active.
  pub fn vspace(&self) -> Option<&V> {
    match &self.mode {
      Mode::Dynamic(dynamic) => Some(&dynamic.vspace),
      _ => None,
    }
  }

  pub fn vspace_mut(&mut self) -> Option<&mut V> {
    match &mut self.mode {
      Mode::Dynamic(dynamic) => Some(&mut dynamic.vspace),
      _ => None,
    }
  }

  /// Makes `[area, area + size)` the static arena.
  ///
  /// This replaces any arena set up before. The caller must make sure the old
  /// area outlives whatever was allocated from it. Leaving dynamic mode is only
  /// possible while nothing has been allocated through it.
  ///
  /// A null `area` clears the static arena.
  pub fn setup_region(
    &mut self,
    area: *mut u8,
    size: usize,
  ) -> Result<()> {
    if area.is_null() {
      log::error!("static morecore area is NULL");
    }
    if size == 0 {
      log::error!("static morecore size is 0");
    }

    let region = Region::new(area as usize, size)?;

    match &self.mode {
      Mode::Static(old) if old.capacity() > 0 => {
        log::warn!(
          "overwriting existing morecore area {:#x} - {:#x}",
          old.origin(),
          old.end()
        );
      }
      Mode::Dynamic(dynamic) if dynamic.is_touched() => {
        return Err(Error::ModeLocked {
          active: ModeKind::Dynamic,
          requested: ModeKind::Static,
        });
      }
      Mode::Dynamic(_) => log::warn!("replacing dynamic morecore with a static area"),
      _ => {}
    }

    if area.is_null() {
      self.mode = Mode::Unconfigured;
      return Ok(());
    }

    log::debug!(
      "morecore {:#x} - {:#x} ({:#x})",
      region.base(),
      region.top(),
      region.capacity()
    );
    self.mode = Mode::Static(region);

    Ok(())
  }

  /// Returns the active static buffer, or `(null, 0)` when there is none.
  pub fn region(&self) -> (*mut u8, usize) {
    match &self.mode {
      Mode::Static(region) => (region.origin() as *mut u8, region.capacity()),
      _ => (ptr::null_mut(), 0),
    }
  }

  /// Switches to dynamic mode. The break starts at `start`, which must be the
  /// beginning of the range covered by `reservation`.
  pub fn install_vspace(
    &mut self,
    vspace: V,
    reservation: Reservation,
    start: usize,
  ) -> Result<()> {
    if !is_page_aligned!(start) {
      return Err(Error::Misaligned {
        what: "brk reservation start",
        value: start,
      });
    }

    let touched = match &self.mode {
      Mode::Unconfigured => false,
      Mode::Static(region) => region.is_touched(),
      Mode::Dynamic(dynamic) => dynamic.is_touched(),
    };
    if touched {
      return Err(Error::ModeLocked {
        active: self.mode(),
        requested: ModeKind::Dynamic,
      });
    }
    if self.mode() != ModeKind::Unconfigured {
      log::warn!("replacing {} morecore with an address space", self.mode());
    }

    log::debug!("morecore brk reservation starts at {start:#x}");
    self.mode = Mode::Dynamic(Dynamic {
      vspace,
      brk_start: start,
      brk_reservation: reservation,
      brk_reservation_start: start,
      mappings: 0,
    });

    Ok(())
  }

  /// Reserves `bytes` of address space for the break through `vspace` and
  /// switches to dynamic mode.
  pub fn install_vspace_reserving(
    &mut self,
    mut vspace: V,
    bytes: usize,
  ) -> Result<()> {
    let (reservation, start) = vspace.reserve_range(bytes_to_pages(bytes))?;
    self.install_vspace(vspace, reservation, start)
  }
}

impl<V: AddressSpace> Default for Morecore<V> {
  fn default() -> Self {
    Self::new()
  }
}
