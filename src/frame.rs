/// A physical page backing one virtual page of a mapping.
///
/// `cap` is the capability slot naming the frame and `cookie` is the opaque
/// value the address-space manager keeps alongside it. Both are needed to put
/// the frame back into an address space without copying its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
  pub cap: usize,
  pub cookie: usize,
}

impl Frame {
  pub fn new(
    cap: usize,
    cookie: usize,
  ) -> Self {
    Self { cap, cookie }
  }
}

/// Exclusive claim on a virtual address range, issued by an address-space
/// manager. Pages can only be committed inside a range the caller holds a
/// reservation for.
///
/// The token is deliberately not `Clone`: handing it back through
/// [`AddressSpace::free_reservation`](crate::AddressSpace::free_reservation)
/// consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
  id: u64,
}

impl Reservation {
  pub fn new(id: u64) -> Self {
    Self { id }
  }

  pub fn id(&self) -> u64 {
    self.id
  }
}
