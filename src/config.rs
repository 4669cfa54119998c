//! Runtime configuration of the broker.
//!
//! Nothing in here allocates: the configuration is read while the libc heap
//! may still be waiting for its first region.

use std::ffi::CStr;

use crate::{
  align::PAGE_SIZE,
  error::{Error, Result},
  is_page_aligned,
};

/// Environment variable holding the size of the internal static area.
pub const MORECORE_BYTES_VAR: &str = "MORECORE_BYTES";

const MORECORE_BYTES_CVAR: &CStr = c"MORECORE_BYTES";

/// Size of the static buffer the internal area is carved from.
#[cfg(feature = "internal-area-16m")]
pub const INTERNAL_AREA_CAPACITY: usize = 16 << 20;
#[cfg(all(feature = "internal-area-4m", not(feature = "internal-area-16m")))]
pub const INTERNAL_AREA_CAPACITY: usize = 4 << 20;
#[cfg(not(any(feature = "internal-area-4m", feature = "internal-area-16m")))]
pub const INTERNAL_AREA_CAPACITY: usize = 1 << 20;

#[repr(C, align(4096))]
struct InternalArea([u8; INTERNAL_AREA_CAPACITY]);

const _: () = assert!(align_of::<InternalArea>() == PAGE_SIZE);

static mut INTERNAL_AREA: InternalArea = InternalArea([0; INTERNAL_AREA_CAPACITY]);

/// Start of the internal area if `bytes` fit into it.
pub(crate) fn internal_area(bytes: usize) -> Result<*mut u8> {
  if bytes > INTERNAL_AREA_CAPACITY {
    return Err(Error::InvalidConfig {
      key: MORECORE_BYTES_VAR,
      reason: "larger than the internal area",
    });
  }

  Ok((&raw mut INTERNAL_AREA).cast::<u8>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
  /// Size of the internal static area. Zero leaves the broker unconfigured
  /// until a region or an address space is installed explicitly.
  pub static_area_bytes: usize,
}

impl Config {
  pub fn new(static_area_bytes: usize) -> Result<Self> {
    if !is_page_aligned!(static_area_bytes) {
      return Err(Error::InvalidConfig {
        key: MORECORE_BYTES_VAR,
        reason: "not a multiple of the page size",
      });
    }
    if static_area_bytes > INTERNAL_AREA_CAPACITY {
      return Err(Error::InvalidConfig {
        key: MORECORE_BYTES_VAR,
        reason: "larger than the internal area",
      });
    }

    Ok(Self { static_area_bytes })
  }

  /// Reads the configuration from the process environment. A missing variable
  /// yields the default configuration.
  pub fn from_env() -> Result<Self> {
    // SAFETY: the name is NUL terminated; the returned string is only read
    // before any further environment access from this thread.
    let raw = unsafe { libc::getenv(MORECORE_BYTES_CVAR.as_ptr()) };
    if raw.is_null() {
      return Ok(Self::default());
    }

    let raw = unsafe { CStr::from_ptr(raw) };
    let raw = raw.to_str().map_err(|_| Error::InvalidConfig {
      key: MORECORE_BYTES_VAR,
      reason: "not valid UTF-8",
    })?;

    Self::new(parse_size(raw)?)
  }
}

/// Parses a decimal or `0x`-prefixed hexadecimal byte count. Underscores
/// between digits are ignored.
pub fn parse_size(raw: &str) -> Result<usize> {
  let invalid = |reason| Error::InvalidConfig {
    key: MORECORE_BYTES_VAR,
    reason,
  };

  let trimmed = raw.trim();
  let (digits, radix) = match trimmed
    .strip_prefix("0x")
    .or_else(|| trimmed.strip_prefix("0X"))
  {
    Some(hex) => (hex, 16),
    None => (trimmed, 10),
  };

  let mut value: usize = 0;
  let mut seen_digit = false;
  for c in digits.chars() {
    if c == '_' {
      continue;
    }
    let digit = c.to_digit(radix).ok_or(invalid("not a number"))?;
    value = value
      .checked_mul(radix as usize)
      .and_then(|v| v.checked_add(digit as usize))
      .ok_or(invalid("out of range"))?;
    seen_digit = true;
  }

  if !seen_digit {
    return Err(invalid("not a number"));
  }

  Ok(value)
}
