//! `brk` emulation.

use crate::{
  align::PAGE_SIZE,
  error::{Error, Result},
  morecore::{Mode, Morecore},
  vspace::AddressSpace,
};

impl<V: AddressSpace> Morecore<V> {
  /// Moves the break to `target` and returns the new break. A `target` of `0`
  /// only queries the current break.
  ///
  /// In static mode the break may move anywhere between the start of the arena
  /// and the lowest anonymous mapping. In dynamic mode it only grows: pages are
  /// committed one at a time until the break covers `target`. If a commit
  /// fails, the pages committed so far stay committed and the break stays
  /// where it got to.
  pub fn brk(
    &mut self,
    target: usize,
  ) -> Result<usize> {
    match &mut self.mode {
      Mode::Static(region) => {
        if target == 0 {
          log::info!("caller queries fixed base address");
          return Ok(region.base());
        }

        let old = region.base();
        let new = region.move_break(target).inspect_err(|err| {
          log::error!("{err}");
        })?;
        log::info!("morecore base change: {old:#x} -> {new:#x}");

        Ok(new)
      }
      Mode::Dynamic(dynamic) => {
        if target == 0 {
          log::info!("caller queries dynamic base address");
          return Ok(dynamic.brk_start);
        }

        while dynamic.brk_start < target {
          dynamic
            .vspace
            .new_pages_at(dynamic.brk_start, 1, &dynamic.brk_reservation)
            .map_err(|err| {
              log::error!("mapping new pages to extend brk region failed: {err}");
              Error::Vspace(err)
            })?;
          log::trace!("brk page committed at {:#x}", dynamic.brk_start);
          dynamic.brk_start += PAGE_SIZE;
        }

        Ok(dynamic.brk_start)
      }
      Mode::Unconfigured => {
        log::error!("{}", Error::NotConfigured);
        Err(Error::NotConfigured)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    Error, ErrorKind, Morecore,
    align::PAGE_SIZE,
    sim::{SimOp, SimVspace},
    vspace::AddressSpace,
  };

  const ORIGIN: usize = 0x1000_0000;

  fn dynamic_morecore(vspace: SimVspace) -> (Morecore<SimVspace>, usize) {
    let mut morecore = Morecore::new();
    morecore.install_vspace_reserving(vspace, 16 * PAGE_SIZE).unwrap();
    let start = morecore.brk(0).unwrap();
    (morecore, start)
  }

  #[test]
  fn test_unconfigured_is_fatal() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();

    let err = morecore.brk(0).unwrap_err();
    assert_eq!(err, Error::NotConfigured);
    assert_eq!(err.kind(), ErrorKind::Fatal);
  }

  #[test]
  fn test_static_query_and_idempotence() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();
    morecore.setup_region(ORIGIN as *mut u8, 0x4000).unwrap();

    let base = morecore.brk(0).unwrap();
    assert_eq!(base, ORIGIN);
    assert_eq!(morecore.brk(base), Ok(base));
    assert_eq!(morecore.arena().unwrap().free_bytes(), 0x4000);

    morecore.brk(ORIGIN + 0x2000).unwrap();
    let base = morecore.brk(0).unwrap();
    let before = morecore.arena().unwrap().clone();
    assert_eq!(morecore.brk(base), Ok(base));
    assert_eq!(morecore.arena().unwrap(), &before);
  }

  #[test]
  fn test_static_out_of_range_is_recoverable() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();
    morecore.setup_region(ORIGIN as *mut u8, 0x4000).unwrap();

    let err = morecore.brk(ORIGIN + 0x5000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recoverable);

    let err = morecore.brk(ORIGIN - PAGE_SIZE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recoverable);
    assert_eq!(morecore.brk(0), Ok(ORIGIN));
  }

  #[test]
  fn test_static_misaligned_is_fatal() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();
    morecore.setup_region(ORIGIN as *mut u8, 0x4000).unwrap();

    let err = morecore.brk(ORIGIN + 0x123).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
  }

  #[test]
  fn test_dynamic_commits_up_to_target() {
    let (mut morecore, start) = dynamic_morecore(SimVspace::new());

    assert_eq!(morecore.brk(start + 0x2800), Ok(start + 0x3000));

    let vspace = morecore.vspace().unwrap();
    assert_eq!(vspace.mapped_pages(), 3);
    assert!(vspace.is_mapped(start));
    assert!(vspace.is_mapped(start + 0x2000));
    assert!(!vspace.is_mapped(start + 0x3000));
  }

  #[test]
  fn test_dynamic_never_shrinks() {
    let (mut morecore, start) = dynamic_morecore(SimVspace::new());
    morecore.brk(start + 0x2000).unwrap();

    assert_eq!(morecore.brk(start + 0x1000), Ok(start + 0x2000));
    assert_eq!(morecore.brk(start + 0x2000), Ok(start + 0x2000));
    assert_eq!(morecore.vspace().unwrap().mapped_pages(), 2);
  }

  #[test]
  fn test_dynamic_failure_keeps_partial_progress() {
    let mut vspace = SimVspace::new();
    vspace.fail_nth(SimOp::NewPagesAt, 2);
    let (mut morecore, start) = dynamic_morecore(vspace);

    let err = morecore.brk(start + 0x4000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recoverable);

    assert_eq!(morecore.brk(0), Ok(start + 0x2000));
    let vspace = morecore.vspace().unwrap();
    assert_eq!(vspace.mapped_pages(), 2);
    assert!(vspace.frame_at(start + 0x1000).is_some());
  }

  #[test]
  fn test_dynamic_stops_at_reservation_end() {
    let (mut morecore, start) = dynamic_morecore(SimVspace::new());

    assert!(morecore.brk(start + 17 * PAGE_SIZE).is_err());
    assert_eq!(morecore.brk(0), Ok(start + 16 * PAGE_SIZE));
  }
}
