//! `mmap`, `mmap2` and `munmap` emulation.
//!
//! Large mallocs make the libc call `mmap` for anonymous memory; that is the
//! only kind of mapping supported here.

use bitflags::bitflags;
use libc::{c_int, off_t};

use crate::{
  align::{PAGE_SIZE, bytes_to_pages},
  error::{Error, Result},
  is_page_aligned,
  morecore::{Mode, Morecore},
  vspace::AddressSpace,
};

bitflags! {
  /// `MAP_*` flags understood by the mapper.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct MapFlags: c_int {
    const SHARED = libc::MAP_SHARED;
    const PRIVATE = libc::MAP_PRIVATE;
    const FIXED = libc::MAP_FIXED;
    const ANONYMOUS = libc::MAP_ANONYMOUS;
  }
}

bitflags! {
  /// `PROT_*` flags. Every mapping is created readable and writable, so these
  /// are accepted and ignored.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Protection: c_int {
    const READ = libc::PROT_READ;
    const WRITE = libc::PROT_WRITE;
    const EXEC = libc::PROT_EXEC;
  }
}

impl<V: AddressSpace> Morecore<V> {
  /// Maps `length` bytes of anonymous memory and returns its page-aligned
  /// start address. The address hint, protection, file descriptor and offset
  /// are ignored.
  ///
  /// In static mode the chunk is carved from the top of the arena, so each
  /// mapping lies directly below the previous one.
  pub fn mmap(
    &mut self,
    _addr: usize,
    length: usize,
    _prot: Protection,
    flags: MapFlags,
    _fd: c_int,
    _offset: off_t,
  ) -> Result<usize> {
    let mode = self.mode();

    match &mut self.mode {
      Mode::Unconfigured => {
        log::error!("{}", Error::NotConfigured);
        return Err(Error::NotConfigured);
      }
      _ if !flags.contains(MapFlags::ANONYMOUS) => {
        return Err(Error::Unsupported {
          operation: "mmap",
          reason: "file backed mapping",
        });
      }
      _ if length == 0 => {
        log::error!("mmap of zero bytes in {mode} mode");
        return Err(Error::InvalidLength { length });
      }
      Mode::Static(region) => {
        let chunk = region.carve_top(length).inspect_err(|err| log::error!("{err}"))?;
        log::debug!(
          "morecore [{:#x} - {:#x}], pool [{:#x} - {:#x}], alloc: len {length:#x} at {chunk:#x}",
          region.origin(),
          region.end(),
          region.base(),
          region.top(),
        );
        Ok(chunk)
      }
      Mode::Dynamic(dynamic) => {
        let pages = bytes_to_pages(length);
        let chunk = dynamic.vspace.new_pages(pages).map_err(|err| {
          log::error!("failed to commit {pages} pages for mmap: {err}");
          Error::Vspace(err)
        })?;

        if !is_page_aligned!(chunk) {
          return Err(Error::Misaligned {
            what: "mmap return address",
            value: chunk,
          });
        }

        dynamic.mappings += 1;
        log::debug!("mmap: {pages} pages at {chunk:#x}");
        Ok(chunk)
      }
    }
  }

  /// Same as [`mmap`](Self::mmap) with the offset given in pages.
  pub fn mmap2(
    &mut self,
    addr: usize,
    length: usize,
    prot: Protection,
    flags: MapFlags,
    fd: c_int,
    pgoffset: off_t,
  ) -> Result<usize> {
    // Anonymous mappings never look at the offset, so a wrapped product is
    // never observed.
    let offset = pgoffset.wrapping_mul(PAGE_SIZE as off_t);
    self.mmap(addr, length, prot, flags, fd, offset)
  }

  /// Mappings are never given back; this always fails.
  pub fn munmap(
    &mut self,
    addr: usize,
    length: usize,
  ) -> Result<()> {
    let err = Error::UnmapUnsupported { addr, length };
    log::error!("{err}");
    Err(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    ErrorKind,
    frame::{Frame, Reservation},
    sim::SimVspace,
    vspace::{UnmapMode, VspaceError},
  };

  const ORIGIN: usize = 0x1000_0000;

  /// Hands out mappings 16 bytes past the page it committed.
  struct SkewedVspace(SimVspace);

  impl AddressSpace for SkewedVspace {
    fn reserve_range(
      &mut self,
      pages: usize,
    ) -> std::result::Result<(Reservation, usize), VspaceError> {
      self.0.reserve_range(pages)
    }

    fn reserve_range_at(
      &mut self,
      vaddr: usize,
      pages: usize,
    ) -> std::result::Result<Reservation, VspaceError> {
      self.0.reserve_range_at(vaddr, pages)
    }

    fn map_pages_at(
      &mut self,
      frames: &[Frame],
      vaddr: usize,
      reservation: &Reservation,
    ) -> std::result::Result<(), VspaceError> {
      self.0.map_pages_at(frames, vaddr, reservation)
    }

    fn unmap_pages(
      &mut self,
      vaddr: usize,
      pages: usize,
      mode: UnmapMode,
    ) {
      self.0.unmap_pages(vaddr, pages, mode)
    }

    fn new_pages_at(
      &mut self,
      vaddr: usize,
      pages: usize,
      reservation: &Reservation,
    ) -> std::result::Result<(), VspaceError> {
      self.0.new_pages_at(vaddr, pages, reservation)
    }

    fn new_pages(
      &mut self,
      pages: usize,
    ) -> std::result::Result<usize, VspaceError> {
      self.0.new_pages(pages).map(|vaddr| vaddr + 0x10)
    }

    fn frame_at(
      &self,
      vaddr: usize,
    ) -> Option<Frame> {
      self.0.frame_at(vaddr)
    }

    fn free_reservation(
      &mut self,
      reservation: Reservation,
    ) {
      self.0.free_reservation(reservation)
    }
  }

  fn anon(
    morecore: &mut Morecore<SimVspace>,
    length: usize,
  ) -> Result<usize> {
    morecore.mmap(
      0,
      length,
      Protection::READ | Protection::WRITE,
      MapFlags::PRIVATE | MapFlags::ANONYMOUS,
      -1,
      0,
    )
  }

  fn static_morecore(size: usize) -> Morecore<SimVspace> {
    let mut morecore = Morecore::new();
    morecore.setup_region(ORIGIN as *mut u8, size).unwrap();
    morecore
  }

  #[test]
  fn test_static_carves_downwards() {
    let mut morecore = static_morecore(0x10000);

    let first = anon(&mut morecore, 0x2000).unwrap();
    let second = anon(&mut morecore, 0x3000).unwrap();

    assert_eq!(first, ORIGIN + 0xe000);
    assert_eq!(second, first - 0x3000);
    assert_eq!(morecore.arena().unwrap().free_bytes(), 0xb000);
  }

  #[test]
  fn test_static_rounds_partial_pages() {
    let mut morecore = static_morecore(0x4000);

    let first = anon(&mut morecore, 100).unwrap();
    let second = anon(&mut morecore, 0x1001).unwrap();

    assert_eq!(first, ORIGIN + 0x3000);
    assert_eq!(second, ORIGIN + 0x1000);
    assert!(is_page_aligned!(second));
    assert_eq!(morecore.arena().unwrap().free_bytes(), 0x1000);
  }

  #[test]
  fn test_static_out_of_memory() {
    let mut morecore = static_morecore(0x4000);
    anon(&mut morecore, 0x3000).unwrap();

    let err = anon(&mut morecore, 0x1001).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recoverable);
    assert_eq!(err.errno(), libc::ENOMEM);
    assert_eq!(morecore.arena().unwrap().free_bytes(), 0x1000);

    assert_eq!(anon(&mut morecore, 0x1000), Ok(ORIGIN));
  }

  #[test]
  fn test_file_backed_is_fatal() {
    let mut morecore = static_morecore(0x4000);

    let err = morecore
      .mmap(0, 0x1000, Protection::READ, MapFlags::PRIVATE, 3, 0)
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(morecore.arena().unwrap().free_bytes(), 0x4000);
  }

  #[test]
  fn test_zero_length_is_rejected() {
    let mut morecore = static_morecore(0x4000);

    let err = anon(&mut morecore, 0).unwrap_err();
    assert_eq!(err, Error::InvalidLength { length: 0 });
    assert_eq!(err.errno(), libc::EINVAL);
  }

  #[test]
  fn test_unconfigured_is_fatal() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();

    assert_eq!(anon(&mut morecore, 0x1000), Err(Error::NotConfigured));
  }

  #[test]
  fn test_dynamic_maps_fresh_pages() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();
    morecore.install_vspace_reserving(SimVspace::new(), 0x10000).unwrap();

    let chunk = anon(&mut morecore, 0x1800).unwrap();
    assert!(is_page_aligned!(chunk));

    let vspace = morecore.vspace().unwrap();
    assert!(vspace.is_mapped(chunk));
    assert!(vspace.is_mapped(chunk + 0x1000));
    assert!(!vspace.is_mapped(chunk + 0x2000));
  }

  #[test]
  fn test_dynamic_manager_failure() {
    let mut morecore: Morecore<SimVspace> = Morecore::new();
    morecore
      .install_vspace_reserving(SimVspace::new().with_frame_limit(2), 0x10000)
      .unwrap();

    let err = anon(&mut morecore, 0x3000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recoverable);
    assert_eq!(err.errno(), libc::ENOMEM);
  }

  #[test]
  fn test_dynamic_misaligned_mapping_is_fatal() {
    let mut morecore: Morecore<SkewedVspace> = Morecore::new();
    morecore
      .install_vspace_reserving(SkewedVspace(SimVspace::new()), 0x10000)
      .unwrap();

    let err = morecore
      .mmap(
        0,
        0x1000,
        Protection::READ | Protection::WRITE,
        MapFlags::PRIVATE | MapFlags::ANONYMOUS,
        -1,
        0,
      )
      .unwrap_err();
    assert!(matches!(err, Error::Misaligned { what: "mmap return address", .. }));
    assert_eq!(err.kind(), ErrorKind::Fatal);

    match &morecore.mode {
      Mode::Dynamic(dynamic) => assert_eq!(dynamic.mappings, 0),
      _ => panic!("expected dynamic mode"),
    }
    // Nothing was handed out, so switching back is still allowed.
    morecore.setup_region(ORIGIN as *mut u8, 0x4000).unwrap();
  }

  #[test]
  fn test_mmap2_scales_offset() {
    let mut morecore = static_morecore(0x4000);

    let chunk = morecore
      .mmap2(
        0,
        0x1000,
        Protection::READ,
        MapFlags::PRIVATE | MapFlags::ANONYMOUS,
        -1,
        off_t::MAX,
      )
      .unwrap();
    assert_eq!(chunk, ORIGIN + 0x3000);
  }

  #[test]
  fn test_munmap_always_fails() {
    let mut morecore = static_morecore(0x4000);
    let chunk = anon(&mut morecore, 0x1000).unwrap();

    let err = morecore.munmap(chunk, 0x1000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recoverable);
    assert_eq!(err.errno(), libc::ENOSYS);
    assert_eq!(morecore.arena().unwrap().free_bytes(), 0x3000);
  }
}
