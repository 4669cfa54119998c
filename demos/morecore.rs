use std::alloc::{self, Layout};

use morecore::{MapFlags, Morecore, Protection, RemapFlags, SimVspace, align::PAGE_SIZE};

const ARENA_BYTES: usize = 16 * PAGE_SIZE;

fn anon() -> MapFlags {
  MapFlags::PRIVATE | MapFlags::ANONYMOUS
}

fn rw() -> Protection {
  Protection::READ | Protection::WRITE
}

/// Prints where the break, the free space and the mappings currently are.
fn print_arena(
  label: &str,
  morecore: &Morecore<SimVspace>,
) {
  if let Some(arena) = morecore.arena() {
    println!(
      "[{}] origin = {:#x}, base = {:#x}, top = {:#x}, end = {:#x}, free = {:#x}",
      label,
      arena.origin(),
      arena.base(),
      arena.top(),
      arena.end(),
      arena.free_bytes(),
    );
  }
}

fn static_mode() {
  println!("== static mode ==");

  // A real, page-aligned buffer so the handed out chunks can be written to.
  let layout = Layout::from_size_align(ARENA_BYTES, PAGE_SIZE).unwrap();
  let buffer = unsafe { alloc::alloc_zeroed(layout) };
  assert!(!buffer.is_null());

  let mut morecore: Morecore<SimVspace> = Morecore::new();
  morecore.setup_region(buffer, ARENA_BYTES).unwrap();
  print_arena("setup", &morecore);

  // --------------------------------------------------------------------
  // 1) Grow the break by two pages, the way malloc does for small chunks.
  // --------------------------------------------------------------------
  let base = morecore.brk(0).unwrap();
  let new_base = morecore.brk(base + 2 * PAGE_SIZE).unwrap();
  println!("\n[1] brk {base:#x} -> {new_base:#x}");
  unsafe { (base as *mut u64).write(0xDEADBEEF) };
  print_arena("1", &morecore);

  // --------------------------------------------------------------------
  // 2) Large mallocs turn into anonymous mappings from the top.
  // --------------------------------------------------------------------
  let first = morecore.mmap(0, 3 * PAGE_SIZE, rw(), anon(), -1, 0).unwrap();
  let second = morecore.mmap(0, 100, rw(), anon(), -1, 0).unwrap();
  println!("\n[2] mmap 3 pages at {first:#x}, 100 bytes at {second:#x}");
  unsafe { std::ptr::write_bytes(second as *mut u8, 0xAB, 100) };
  print_arena("2", &morecore);

  // --------------------------------------------------------------------
  // 3) Ask for more than is left.
  // --------------------------------------------------------------------
  match morecore.mmap(0, ARENA_BYTES, rw(), anon(), -1, 0) {
    Ok(chunk) => println!("\n[3] unexpectedly got {chunk:#x}"),
    Err(err) => println!("\n[3] {err} (errno {})", err.errno()),
  }

  // --------------------------------------------------------------------
  // 4) Nothing is ever given back.
  // --------------------------------------------------------------------
  if let Err(err) = morecore.munmap(first, 3 * PAGE_SIZE) {
    println!("\n[4] {err}");
  }

  // The arena lives until the process exits.
}

fn dynamic_mode() {
  println!("\n== dynamic mode ==");

  let mut morecore: Morecore<SimVspace> = Morecore::new();
  morecore
    .install_vspace_reserving(SimVspace::new(), 64 * PAGE_SIZE)
    .unwrap();

  let start = morecore.brk(0).unwrap();
  let end = morecore.brk(start + 3 * PAGE_SIZE + 1).unwrap();
  println!("[1] brk {start:#x} -> {end:#x}");

  let mapping = morecore.mmap(0, 2 * PAGE_SIZE, rw(), anon(), -1, 0).unwrap();
  println!("[2] mmap 2 pages at {mapping:#x}");

  let moved = morecore
    .mremap(mapping, 2 * PAGE_SIZE, 6 * PAGE_SIZE, RemapFlags::MAYMOVE, None)
    .unwrap();
  let vspace = morecore.vspace().unwrap();
  println!(
    "[3] mremap to 6 pages at {moved:#x}, {} pages mapped, {} frames alive",
    vspace.mapped_pages(),
    vspace.live_frames(),
  );
}

fn main() {
  static_mode();
  dynamic_mode();
}
