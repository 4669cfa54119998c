//! C entry points for the libc system-call layer.
//!
//! The libc expects one process-wide broker. It lives behind a single lock
//! here, so every call observes and updates the whole region state at once.
//! It is created on first use from [`Config::from_env`], backed by the
//! internal static area when `MORECORE_BYTES` is set.
//!
//! Recoverable failures come back as the usual sentinels: `0` for `brk`,
//! `-errno` for the mapping calls. Fatal misuse aborts the process.

use std::{ffi::c_void, ptr};

use libc::{c_int, c_long, off_t};
use spin::Mutex;

use crate::{
  config::Config,
  error::{Error, ErrorKind, Result},
  frame::Reservation,
  mmap::{MapFlags, Protection},
  morecore::Morecore,
  mremap::RemapFlags,
  vspace::AddressSpace,
};

static MORECORE: Mutex<Option<Morecore>> = Mutex::new(None);

/// Runs `f` on the process-wide broker, creating it first if needed.
///
/// Building the broker never allocates, and the configuration is read before
/// the lock is taken: the allocator calling back in here must not find the
/// lock held by its own caller.
pub fn with_morecore<T>(f: impl FnOnce(&mut Morecore) -> T) -> T {
  {
    let mut guard = MORECORE.lock();
    if let Some(morecore) = guard.as_mut() {
      return f(morecore);
    }
  }

  let config = Config::from_env().unwrap_or_else(|err| fatal(err));

  let mut guard = MORECORE.lock();
  let morecore = guard.get_or_insert_with(|| {
    Morecore::from_config(&config).unwrap_or_else(|err| fatal(err))
  });

  f(morecore)
}

/// Switches the process-wide broker to dynamic mode.
pub fn install_vspace(
  vspace: Box<dyn AddressSpace + Send>,
  reservation: Reservation,
  start: usize,
) -> Result<()> {
  with_morecore(|morecore| morecore.install_vspace(vspace, reservation, start))
}

fn fatal(err: Error) -> ! {
  log::error!("fatal morecore misuse: {err}");
  std::process::abort()
}

fn settle(
  result: Result<usize>,
  on_error: impl FnOnce(&Error) -> c_long,
) -> c_long {
  match result {
    Ok(value) => value as c_long,
    Err(err) if err.kind() == ErrorKind::Recoverable => on_error(&err),
    Err(err) => fatal(err),
  }
}

fn negative_errno(err: &Error) -> c_long {
  -(err.errno() as c_long)
}

#[unsafe(no_mangle)]
pub extern "C" fn morecore_setup_region(
  area: *mut c_void,
  size: usize,
) {
  if let Err(err) = with_morecore(|morecore| morecore.setup_region(area.cast(), size)) {
    fatal(err);
  }
}

/// Reports the static area, or null and zero when there is none.
///
/// # Safety
///
/// Each pointer must be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn morecore_get_region(
  p_area: *mut *mut c_void,
  p_size: *mut usize,
) {
  let (area, size) = with_morecore(|morecore| morecore.region());

  unsafe {
    if !p_area.is_null() {
      ptr::write(p_area, area.cast());
    }
    if !p_size.is_null() {
      ptr::write(p_size, size);
    }
  }
}

#[unsafe(no_mangle)]
pub extern "C" fn morecore_brk(newbrk: usize) -> c_long {
  settle(with_morecore(|morecore| morecore.brk(newbrk)), |_| 0)
}

#[unsafe(no_mangle)]
pub extern "C" fn morecore_mmap(
  addr: *mut c_void,
  length: usize,
  prot: c_int,
  flags: c_int,
  fd: c_int,
  offset: off_t,
) -> c_long {
  let result = with_morecore(|morecore| {
    morecore.mmap(
      addr as usize,
      length,
      Protection::from_bits_retain(prot),
      MapFlags::from_bits_retain(flags),
      fd,
      offset,
    )
  });

  settle(result, negative_errno)
}

#[unsafe(no_mangle)]
pub extern "C" fn morecore_mmap2(
  addr: *mut c_void,
  length: usize,
  prot: c_int,
  flags: c_int,
  fd: c_int,
  pgoffset: off_t,
) -> c_long {
  let result = with_morecore(|morecore| {
    morecore.mmap2(
      addr as usize,
      length,
      Protection::from_bits_retain(prot),
      MapFlags::from_bits_retain(flags),
      fd,
      pgoffset,
    )
  });

  settle(result, negative_errno)
}

#[unsafe(no_mangle)]
pub extern "C" fn morecore_mremap(
  old_address: *mut c_void,
  old_size: usize,
  new_size: usize,
  flags: c_int,
  new_address: *mut c_void,
) -> c_long {
  let flags = RemapFlags::from_bits_retain(flags);
  let new_address = flags
    .contains(RemapFlags::FIXED)
    .then_some(new_address as usize);

  let result = with_morecore(|morecore| {
    morecore.mremap(old_address as usize, old_size, new_size, flags, new_address)
  });

  settle(result, negative_errno)
}

#[unsafe(no_mangle)]
pub extern "C" fn morecore_munmap(
  addr: *mut c_void,
  length: usize,
) -> c_long {
  let result = with_morecore(|morecore| morecore.munmap(addr as usize, length));

  settle(result.map(|()| 0), negative_errno)
}

#[cfg(test)]
mod tests {
  use super::*;

  // The broker behind these entry points is shared by the whole test binary,
  // so everything touching it stays in this one test.
  #[test]
  fn test_entry_points() {
    let origin = 0x2000_0000usize;
    morecore_setup_region(origin as *mut c_void, 0x4000);

    let mut area = ptr::null_mut();
    let mut size = 0;
    unsafe { morecore_get_region(&mut area, &mut size) };
    assert_eq!((area as usize, size), (origin, 0x4000));
    unsafe { morecore_get_region(ptr::null_mut(), ptr::null_mut()) };

    assert_eq!(morecore_brk(0), origin as c_long);

    let anon = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    assert_eq!(
      morecore_mmap(ptr::null_mut(), 0x1000, prot, anon, -1, 0),
      (origin + 0x3000) as c_long
    );
    assert_eq!(
      morecore_mmap2(ptr::null_mut(), 0x1000, prot, anon, -1, 0),
      (origin + 0x2000) as c_long
    );

    assert_eq!(morecore_brk(origin + 0x1000), (origin + 0x1000) as c_long);
    assert_eq!(morecore_brk(origin + 0x3000), 0);

    assert_eq!(
      morecore_mmap(ptr::null_mut(), 0x2000, prot, anon, -1, 0),
      -(libc::ENOMEM as c_long)
    );
    assert_eq!(
      morecore_mmap(ptr::null_mut(), 0, prot, anon, -1, 0),
      -(libc::EINVAL as c_long)
    );
    assert_eq!(
      morecore_munmap((origin + 0x3000) as *mut c_void, 0x1000),
      -(libc::ENOSYS as c_long)
    );

    with_morecore(|morecore| {
      let arena = morecore.arena().unwrap();
      assert_eq!(arena.free_bytes(), 0x1000);
      assert!(arena.break_offset() + arena.free_bytes() <= arena.capacity());
    });
  }
}
