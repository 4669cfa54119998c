//! # morecore - A Page-Granular Memory Broker for libc
//!
//! This crate backs the dynamic-memory system calls of a C standard library
//! (`brk`, `mmap`, `mmap2`, `mremap`, `munmap`) on systems whose kernel only
//! offers either a fixed, pre-reserved chunk of address space or a
//! capability-based address-space manager that commits page frames on request.
//!
//! ## Overview
//!
//! The broker runs in one of two modes.
//!
//! **Static mode** hands out a single arena. The break grows up from the
//! bottom, anonymous mappings are carved down from the top:
//!
//! ```text
//!   Static Arena:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                                                                      │
//!   │   ┌───────────────┬──────────────────────────────┬────┬────┬─────┐   │
//!   │   │   brk heap    │          free space          │ M3 │ M2 │ M1  │   │
//!   │   └───────────────┴──────────────────────────────┴────┴────┴─────┘   │
//!   │   ▲               ▲                              ▲               ▲   │
//!   │   │               │                              │               │   │
//!   │ origin          base                            top             end  │
//!   │                (break)                                               │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Moving the break redraws the line between heap and free space.
//!   Each mmap takes whole pages from just below the previous one.
//! ```
//!
//! **Dynamic mode** asks an [`AddressSpace`] manager for frames. The break
//! commits one page at a time inside a reservation made up front, mappings get
//! fresh pages wherever the manager puts them, and `mremap` moves the frames of
//! a mapping into a larger range without copying:
//!
//! ```text
//!   mremap(old, 2 pages, 4 pages):
//!
//!   old  ┌────┬────┐                 new  ┌────┬────┬────┬────┐
//!        │ F1 │ F2 │   ── unmap ──►        │ F1 │ F2 │ N1 │ N2 │
//!        └────┴────┘   (keep F1, F2)       └────┴────┴────┴────┘
//!                                           moved      fresh
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   morecore
//!   ├── align      - Page size and alignment macros (page_align!, is_page_aligned!)
//!   ├── frame      - Frame and Reservation values
//!   ├── vspace     - AddressSpace trait for the external manager
//!   ├── sim        - SimVspace, an in-memory AddressSpace
//!   ├── region     - Static arena bookkeeping
//!   ├── morecore   - Morecore context, setup and mode switching
//!   ├── brk        - brk emulation
//!   ├── mmap       - mmap, mmap2, munmap emulation
//!   ├── mremap     - mremap emulation
//!   ├── config     - Runtime configuration
//!   ├── error      - Error, ErrorKind
//!   └── shim       - extern "C" entry points over a process-wide instance
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use morecore::{MapFlags, Morecore, Protection, SimVspace};
//!
//! let mut morecore: Morecore<SimVspace> = Morecore::new();
//! morecore.setup_region(0x1000_0000 as *mut u8, 0x4000).unwrap();
//!
//! assert_eq!(morecore.brk(0), Ok(0x1000_0000));
//!
//! let chunk = morecore
//!     .mmap(0, 0x1000, Protection::READ, MapFlags::PRIVATE | MapFlags::ANONYMOUS, -1, 0)
//!     .unwrap();
//! assert_eq!(chunk, 0x1000_3000);
//! ```
//!
//! ## Errors
//!
//! Every failure carries an [`ErrorKind`]. Recoverable failures become the
//! sentinels the libc expects. Fatal misuse (calls before setup, misaligned
//! arguments, unsupported request variants) aborts the process at the C
//! boundary.
//!
//! ## Limitations
//!
//! - **No reclaiming**: `munmap` always fails, the static arena never shrinks
//! - **Whole pages only**: every chunk is 4 KiB aligned and sized
//! - **Grow-only remap**: `mremap` must be allowed to move and may not shrink
//! - **One instance per lock**: a [`Morecore`] is driven through `&mut self`
//!
//! ## Safety
//!
//! The broker never dereferences the addresses it manages. Callers of
//! [`Morecore::setup_region`] must keep the area alive for as long as anything
//! allocated from it is in use.

pub mod align;
mod brk;
pub mod config;
mod error;
mod frame;
mod mmap;
mod morecore;
mod mremap;
mod region;
pub mod shim;
pub mod sim;
mod vspace;

pub use config::Config;
pub use error::{Error, ErrorKind, ModeKind, Result};
pub use frame::{Frame, Reservation};
pub use mmap::{MapFlags, Protection};
pub use morecore::Morecore;
pub use mremap::RemapFlags;
pub use region::Region;
pub use sim::{SimOp, SimVspace};
pub use vspace::{AddressSpace, UnmapMode, VspaceError};
