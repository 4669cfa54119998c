//! Error types for the broker.
//!
//! Every failure is an [`Error`]. What the caller is allowed to do about it is
//! decided by [`Error::kind`]: recoverable failures turn into the usual syscall
//! sentinels, while fatal misuse and unrecoverable states end the process at
//! the C boundary.

use std::fmt;

use crate::vspace::VspaceError;

pub type Result<T> = std::result::Result<T, Error>;

/// The class a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Reported to the libc caller through a sentinel return value.
  Recoverable,
  /// A programming error on the caller's side or a broken internal invariant.
  Fatal,
  /// The broker was set up inconsistently.
  Configuration,
  /// A rollback failed and the address space is in an unknown state.
  Unrecoverable,
}

/// Which operating mode the broker is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
  Unconfigured,
  Static,
  Dynamic,
}

impl fmt::Display for ModeKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      ModeKind::Unconfigured => write!(f, "unconfigured"),
      ModeKind::Static => write!(f, "static"),
      ModeKind::Dynamic => write!(f, "dynamic"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// A dynamic-memory call arrived before any region was set up.
  NotConfigured,

  /// An address or size that must sit on a page boundary does not.
  Misaligned { what: &'static str, value: usize },

  /// The request uses a variant the broker does not implement.
  Unsupported { operation: &'static str, reason: &'static str },

  /// The static arena cannot satisfy the request.
  OutOfMemory { requested: usize, available: usize },

  /// A break target lies outside the movable part of the arena.
  BreakOutOfRange { target: usize, start: usize, top: usize },

  /// A zero-length mapping was requested.
  InvalidLength { length: usize },

  /// The address-space manager refused an operation.
  Vspace(VspaceError),

  /// Mappings are never returned.
  UnmapUnsupported { addr: usize, length: usize },

  /// Switching modes is only allowed before the first allocation.
  ModeLocked { active: ModeKind, requested: ModeKind },

  /// A configuration value could not be used.
  InvalidConfig { key: &'static str, reason: &'static str },

  /// The region would wrap around the end of the address space.
  RegionOverflow { origin: usize, capacity: usize },

  /// Restoring the original mapping after a failed remap failed as well.
  RestoreFailed { addr: usize, source: VspaceError },
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::NotConfigured
      | Error::Misaligned { .. }
      | Error::Unsupported { .. }
      | Error::RegionOverflow { .. } => ErrorKind::Fatal,
      Error::OutOfMemory { .. }
      | Error::BreakOutOfRange { .. }
      | Error::InvalidLength { .. }
      | Error::Vspace(_)
      | Error::UnmapUnsupported { .. } => ErrorKind::Recoverable,
      Error::ModeLocked { .. } | Error::InvalidConfig { .. } => ErrorKind::Configuration,
      Error::RestoreFailed { .. } => ErrorKind::Unrecoverable,
    }
  }

  /// The `errno` value reported for this failure by the mapping calls.
  pub fn errno(&self) -> libc::c_int {
    match self {
      Error::InvalidLength { .. }
      | Error::Misaligned { .. }
      | Error::InvalidConfig { .. }
      | Error::RegionOverflow { .. } => libc::EINVAL,
      Error::UnmapUnsupported { .. } | Error::Unsupported { .. } | Error::NotConfigured => {
        libc::ENOSYS
      }
      Error::ModeLocked { .. } => libc::EBUSY,
      Error::OutOfMemory { .. }
      | Error::BreakOutOfRange { .. }
      | Error::Vspace(_)
      | Error::RestoreFailed { .. } => libc::ENOMEM,
    }
  }
}

impl fmt::Display for Error {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Error::NotConfigured => {
        write!(f, "using malloc requires setting up a morecore region first")
      }
      Error::Misaligned { what, value } => {
        write!(f, "{what} {value:#x} is not 4 KiB aligned")
      }
      Error::Unsupported { operation, reason } => {
        write!(f, "{operation}: {reason} is not implemented")
      }
      Error::OutOfMemory {
        requested,
        available,
      } => write!(f, "out of memory, have {available:#x}, need {requested:#x}"),
      Error::BreakOutOfRange { target, start, top } => {
        write!(f, "invalid break {target:#x}, must lie in [{start:#x}, {top:#x}]")
      }
      Error::InvalidLength { length } => write!(f, "invalid mapping length {length:#x}"),
      Error::Vspace(err) => write!(f, "address space manager failed: {err}"),
      Error::UnmapUnsupported { addr, length } => write!(
        f,
        "munmap({addr:#x}, {length:#x}) is unsupported; \
         this may have been called due to a large allocation being released"
      ),
      Error::ModeLocked { active, requested } => write!(
        f,
        "cannot switch from {active} to {requested} mode after allocations were made"
      ),
      Error::InvalidConfig { key, reason } => write!(f, "invalid {key}: {reason}"),
      Error::RegionOverflow { origin, capacity } => {
        write!(f, "morecore buffer {origin:#x} of size {capacity:#x} wraps the address space")
      }
      Error::RestoreFailed { addr, source } => {
        write!(f, "failed to restore mapping at {addr:#x} after remap failure: {source}")
      }
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Vspace(err) | Error::RestoreFailed { source: err, .. } => Some(err),
      _ => None,
    }
  }
}

impl From<VspaceError> for Error {
  fn from(err: VspaceError) -> Self {
    Error::Vspace(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kinds() {
    assert_eq!(Error::NotConfigured.kind(), ErrorKind::Fatal);
    assert_eq!(
      Error::OutOfMemory {
        requested: 0x2000,
        available: 0x1000
      }
      .kind(),
      ErrorKind::Recoverable
    );
    assert_eq!(
      Error::ModeLocked {
        active: ModeKind::Static,
        requested: ModeKind::Dynamic
      }
      .kind(),
      ErrorKind::Configuration
    );
    assert_eq!(
      Error::RestoreFailed {
        addr: 0x1000,
        source: VspaceError::Injected
      }
      .kind(),
      ErrorKind::Unrecoverable
    );
  }

  #[test]
  fn test_vspace_errors_convert_and_chain() {
    use std::error::Error as _;

    let err: Error = VspaceError::NoFrames.into();
    assert_eq!(err.kind(), ErrorKind::Recoverable);
    assert_eq!(err.errno(), libc::ENOMEM);
    assert!(err.source().is_some());
  }

  #[test]
  fn test_display() {
    let err = Error::OutOfMemory {
      requested: 0x3000,
      available: 0x2000,
    };
    assert_eq!(err.to_string(), "out of memory, have 0x2000, need 0x3000");
  }
}
