use core::cmp;

use super::{
  list::{SkipList, SEARCH_TRAILER},
  node::NodePtr,
  Comparator,
};

mod flush;
pub use flush::FlushIter;


/// The number of forward steps [`Iter::seek_ge`] probes from the current
/// position before falling back to a full descent, when asked to try seeking
/// using next.
const NUM_NEXTS: usize = 5;

bitflags::bitflags! {
  /// Flags that adjust the behavior of [`Iter::seek_ge`].
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
  pub struct SeekGeFlags: u8 {
    /// The caller expects the target to be a few entries ahead of the current
    /// position, so the iterator probes forward with `next` before descending
    /// from the top of the list. The result is the same either way.
    const TRY_SEEK_USING_NEXT = 1;
  }
}

/// A borrowed view of one entry of the [`SkipList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef<'a> {
  key: &'a [u8],
  trailer: u64,
  value: &'a [u8],
}

impl<'a> EntryRef<'a> {
  #[inline]
  pub(crate) const fn new(key: &'a [u8], trailer: u64, value: &'a [u8]) -> Self {
    Self {
      key,
      trailer,
      value,
    }
  }

  /// Returns the user key.
  #[inline]
  pub const fn key(&self) -> &'a [u8] {
    self.key
  }

  /// Returns the trailer.
  #[inline]
  pub const fn trailer(&self) -> u64 {
    self.trailer
  }

  /// Returns the value.
  #[inline]
  pub const fn value(&self) -> &'a [u8] {
    self.value
  }
}

/// A bidirectional cursor over the [`SkipList`], bounded by user keys in
/// `[lower, upper)`.
///
/// The iterator starts before the first entry. Positioning methods return the
/// entry they land on, or `None` once the iterator reaches the head or the
/// tail sentinel. Running into a bound is not an error: the iterator parks on
/// the sentinel past that bound.
///
/// Only the bound in the direction of travel is checked: [`seek_ge`](Iter::seek_ge),
/// [`first`](Iter::first) and [`next`](Iter::next) check the upper bound,
/// [`seek_lt`](Iter::seek_lt), [`last`](Iter::last) and [`prev`](Iter::prev) the
/// lower one. Callers clamp seek keys to the opposite bound themselves.
///
/// Entries added concurrently may or may not be observed, but an observed entry
/// is always complete. An iterator is driven by one thread; clone it to get an
/// independent cursor at the same position.
pub struct Iter<'a, C> {
  list: &'a SkipList<C>,
  nd: NodePtr,
  kv: Option<EntryRef<'a>>,
  lower: Option<&'a [u8]>,
  upper: Option<&'a [u8]>,
}

impl<C> Clone for Iter<'_, C> {
  #[inline]
  fn clone(&self) -> Self {
    Self {
      list: self.list,
      nd: self.nd,
      kv: self.kv,
      lower: self.lower,
      upper: self.upper,
    }
  }
}

impl<C> core::fmt::Debug for Iter<'_, C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Iter")
      .field("entry", &self.kv)
      .field("lower", &self.lower)
      .field("upper", &self.upper)
      .finish()
  }
}

impl<'a, C> Iter<'a, C> {
  #[inline]
  pub(crate) fn new(list: &'a SkipList<C>, lower: Option<&'a [u8]>, upper: Option<&'a [u8]>) -> Self {
    Self {
      list,
      nd: list.head(),
      kv: None,
      lower,
      upper,
    }
  }

  /// Returns the entry at the current position, or `None` if the iterator is
  /// on a sentinel.
  #[inline]
  pub const fn entry(&self) -> Option<EntryRef<'a>> {
    self.kv
  }

  /// Returns the lower bound of the iterator.
  #[inline]
  pub const fn lower_bound(&self) -> Option<&'a [u8]> {
    self.lower
  }

  /// Returns the upper bound of the iterator.
  #[inline]
  pub const fn upper_bound(&self) -> Option<&'a [u8]> {
    self.upper
  }

  /// Sets the lower and upper bounds of the iterator.
  ///
  /// The result of [`next`](Iter::next) and [`prev`](Iter::prev) is undefined
  /// until the iterator has been repositioned with `seek_ge`, `seek_prefix_ge`,
  /// `seek_lt`, `first` or `last`.
  #[inline]
  pub fn set_bounds(&mut self, lower: Option<&'a [u8]>, upper: Option<&'a [u8]>) {
    self.lower = lower;
    self.upper = upper;
  }

  /// Returns `true` if the iterator is positioned at the head sentinel.
  #[inline]
  pub fn at_head(&self) -> bool {
    self.nd == self.list.head()
  }

  /// Returns `true` if the iterator is positioned at the tail sentinel.
  #[inline]
  pub fn at_tail(&self) -> bool {
    self.nd == self.list.tail()
  }
}

impl<'a, C: Comparator> Iter<'a, C> {
  /// Moves the iterator to the first entry whose user key is greater than or
  /// equal to `key`, the newest version of that key. Returns the entry if the
  /// iterator is pointing at a valid entry, and `None` otherwise.
  ///
  /// Only the upper bound is checked. It is up to the caller to ensure that
  /// `key` is greater than or equal to the lower bound.
  pub fn seek_ge(&mut self, key: &[u8], flags: SeekGeFlags) -> Option<EntryRef<'a>> {
    if flags.contains(SeekGeFlags::TRY_SEEK_USING_NEXT) {
      if let Some(res) = self.try_seek_using_next(key) {
        return res;
      }
    }

    // Safety: the head is the start of every level.
    let (_, nd, _) = unsafe { self.seek_for_base_splice(key) };
    self.nd = nd;
    if self.at_tail() {
      self.kv = None;
      return None;
    }
    self.decode_upper_bounded()
  }

  /// Moves the iterator to the first entry whose user key is greater than or
  /// equal to `key`. The list has no prefix index, so this is [`seek_ge`](Iter::seek_ge).
  #[inline]
  pub fn seek_prefix_ge(&mut self, _prefix: &[u8], key: &[u8], flags: SeekGeFlags) -> Option<EntryRef<'a>> {
    self.seek_ge(key, flags)
  }

  /// Moves the iterator to the last entry whose user key is less than `key`.
  /// Returns the entry if the iterator is pointing at a valid entry, and `None`
  /// otherwise.
  ///
  /// Only the lower bound is checked. It is up to the caller to ensure that
  /// `key` is less than the upper bound.
  pub fn seek_lt(&mut self, key: &[u8]) -> Option<EntryRef<'a>> {
    // Safety: the head is the start of every level.
    let (prev, _, _) = unsafe { self.seek_for_base_splice(key) };
    self.nd = prev;
    if self.at_head() {
      self.kv = None;
      return None;
    }
    self.decode_lower_bounded()
  }

  /// Seeks position at the first entry in the list. Returns the entry if the
  /// iterator is pointing at a valid entry, and `None` otherwise.
  ///
  /// Only the upper bound is checked.
  pub fn first(&mut self) -> Option<EntryRef<'a>> {
    // Safety: the head is allocated by the list's arena.
    self.nd = unsafe { self.list.get_next(self.list.head(), 0) };
    if self.at_tail() {
      self.kv = None;
      return None;
    }
    self.decode_upper_bounded()
  }

  /// Seeks position at the last entry in the list. Returns the entry if the
  /// iterator is pointing at a valid entry, and `None` otherwise.
  ///
  /// Only the lower bound is checked.
  pub fn last(&mut self) -> Option<EntryRef<'a>> {
    // Safety: the tail is allocated by the list's arena.
    self.nd = unsafe { self.list.get_prev(self.list.tail(), 0) };
    if self.at_head() {
      self.kv = None;
      return None;
    }
    self.decode_lower_bounded()
  }

  /// Advances to the next position. Returns the entry if the iterator is
  /// pointing at a valid entry, and `None` otherwise. An iterator at the tail
  /// stays there.
  #[allow(clippy::should_implement_trait)]
  pub fn next(&mut self) -> Option<EntryRef<'a>> {
    if self.at_tail() {
      return None;
    }

    // Safety: the current node is allocated by the list's arena.
    self.nd = unsafe { self.list.get_next(self.nd, 0) };
    if self.at_tail() {
      self.kv = None;
      return None;
    }
    self.decode_upper_bounded()
  }

  /// Moves to the previous position. Returns the entry if the iterator is
  /// pointing at a valid entry, and `None` otherwise. An iterator at the head
  /// stays there.
  pub fn prev(&mut self) -> Option<EntryRef<'a>> {
    if self.at_head() {
      return None;
    }

    // Safety: the current node is allocated by the list's arena.
    self.nd = unsafe { self.list.get_prev(self.nd, 0) };
    if self.at_head() {
      self.kv = None;
      return None;
    }
    self.decode_lower_bounded()
  }

  /// Advances to the first entry of the next prefix, skipping the remaining
  /// versions of the current user key. `succ_key` is the smallest user key of
  /// the next prefix.
  #[inline]
  pub fn next_prefix(&mut self, succ_key: &[u8]) -> Option<EntryRef<'a>> {
    self.seek_ge(succ_key, SeekGeFlags::TRY_SEEK_USING_NEXT)
  }

  /// Steps forward at most [`NUM_NEXTS`] times looking for the first user key
  /// that is not less than `key`. Returns `None` when a full descent is needed.
  fn try_seek_using_next(&mut self, key: &[u8]) -> Option<Option<EntryRef<'a>>> {
    // Probe only from a real entry that sorts before the target.
    let cur = self.kv?;
    let mut less = self.list.comparator().compare(cur.key(), key) == cmp::Ordering::Less;
    if !less {
      return None;
    }

    for _ in 0..NUM_NEXTS {
      match self.next() {
        // Iterator is done.
        None => return Some(None),
        Some(ent) => {
          less = self.list.comparator().compare(ent.key(), key) == cmp::Ordering::Less;
          if !less {
            return Some(Some(ent));
          }
        }
      }
    }

    None
  }

  /// Finds the base level splice around the search key of `key`.
  ///
  /// ## Safety
  /// - The list must have been constructed, its head spans every level.
  unsafe fn seek_for_base_splice(&self, key: &[u8]) -> (NodePtr, NodePtr, bool) {
    let list = self.list;
    let mut level = list.height() as usize - 1;
    let mut prev = list.head();

    loop {
      let (p, next, found) = list.find_splice_for_level(key, SEARCH_TRAILER, level, prev);
      prev = p;

      if found {
        if level != 0 {
          // next is pointing at the target node, but we need to find previous on
          // the bottom level.
          prev = list.get_prev(next, 0);
        }
        return (prev, next, true);
      }

      if level == 0 {
        return (prev, next, false);
      }

      level -= 1;
    }
  }

  /// Decodes the current node, parking the iterator on the tail if the node is
  /// at or past the upper bound.
  #[inline]
  fn decode_upper_bounded(&mut self) -> Option<EntryRef<'a>> {
    // Safety: the caller moved the iterator onto a real node.
    let ent = unsafe { self.list.entry(self.nd) };
    if let Some(upper) = self.upper {
      if self.list.comparator().compare(upper, ent.key()) != cmp::Ordering::Greater {
        self.nd = self.list.tail();
        self.kv = None;
        return None;
      }
    }

    self.kv = Some(ent);
    self.kv
  }

  /// Decodes the current node, parking the iterator on the head if the node is
  /// before the lower bound.
  #[inline]
  fn decode_lower_bounded(&mut self) -> Option<EntryRef<'a>> {
    // Safety: the caller moved the iterator onto a real node.
    let ent = unsafe { self.list.entry(self.nd) };
    if let Some(lower) = self.lower {
      if self.list.comparator().compare(lower, ent.key()) == cmp::Ordering::Greater {
        self.nd = self.list.head();
        self.kv = None;
        return None;
      }
    }

    self.kv = Some(ent);
    self.kv
  }
}
