/// Size of a small page, the only granularity the broker hands out.
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;

/// Number of low address bits covered by a page.
pub const PAGE_BITS: usize = 12;

/// Rounds the given byte count up to the next page boundary.
///
/// # Examples
///
/// ```rust
/// use morecore::page_align;
///
/// assert_eq!(page_align!(0), 0);
/// assert_eq!(page_align!(1), 4096);
/// assert_eq!(page_align!(4096), 4096);
/// assert_eq!(page_align!(4097), 8192);
/// ```
#[macro_export]
macro_rules! page_align {
  ($value:expr) => {
    ($value + $crate::align::PAGE_SIZE - 1) & !($crate::align::PAGE_SIZE - 1)
  };
}

/// Evaluates to `true` when the value sits on a page boundary.
#[macro_export]
macro_rules! is_page_aligned {
  ($value:expr) => {
    ($value & ($crate::align::PAGE_SIZE - 1)) == 0
  };
}

/// Number of whole pages needed to hold `bytes`.
pub const fn bytes_to_pages(bytes: usize) -> usize {
  bytes.div_ceil(PAGE_SIZE)
}
