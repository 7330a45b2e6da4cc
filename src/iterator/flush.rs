use super::{EntryRef, NodePtr, SkipList};

/// A forward-only iterator used to flush a sealed [`SkipList`] to disk.
///
/// Bounds do not apply. The iterator keeps a running total of the arena bytes
/// of the entries it has walked over, so a flush can report its progress.
pub struct FlushIter<'a, C> {
  list: &'a SkipList<C>,
  nd: NodePtr,
  bytes_iterated: u64,
}

impl<C> core::fmt::Debug for FlushIter<'_, C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("FlushIter")
      .field("bytes_iterated", &self.bytes_iterated)
      .finish()
  }
}

impl<'a, C> FlushIter<'a, C> {
  #[inline]
  pub(crate) fn new(list: &'a SkipList<C>) -> Self {
    Self {
      list,
      nd: list.head(),
      bytes_iterated: 0,
    }
  }

  /// Seeks position at the first entry in the list.
  ///
  /// The byte count is not reset.
  #[inline]
  pub fn first(&mut self) -> Option<EntryRef<'a>> {
    self.nd = self.list.head();
    self.next()
  }

  /// Returns the number of arena bytes of every entry visited so far,
  /// alignment padding included.
  #[inline]
  pub const fn bytes_iterated(&self) -> u64 {
    self.bytes_iterated
  }
}

impl<'a, C> Iterator for FlushIter<'a, C> {
  type Item = EntryRef<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.nd == self.list.tail() {
      return None;
    }

    // Safety: the current node is allocated by the list's arena.
    unsafe {
      self.nd = self.list.get_next(self.nd, 0);
      if self.nd == self.list.tail() {
        return None;
      }

      self.bytes_iterated += self.list.alloc_size(self.nd) as u64;
      Some(self.list.entry(self.nd))
    }
  }
}
