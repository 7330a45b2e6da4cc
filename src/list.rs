use core::{
  cmp,
  sync::atomic::{AtomicU32, Ordering},
};

use crossbeam_utils::{Backoff, CachePadded};

use super::{
  arena::Arena,
  error::Error,
  iterator::{FlushIter, Iter},
  node::{Node, NodePtr},
  options::Options,
  random_height, Ascend, Comparator, MAX_HEIGHT,
};

#[cfg(test)]
mod tests;

/// The trailer of a search key. Trailers sort in descending order, so a
/// search key sorts before every entry sharing its user key.
pub(crate) const SEARCH_TRAILER: u64 = u64::MAX;

/// A fast, concurrent, ARENA based skiplist that supports forward and
/// backward iteration. It is the write buffer (memtable) of an LSM-Tree.
///
/// Entries are ordered by user key under the comparator `C`, then by trailer
/// in descending order, so the newest version of a user key comes first.
///
/// Keys and values are immutable once added to the skiplist and deletion is
/// not supported. Instead, higher-level code is expected to add new entries
/// that shadow existing entries (with larger trailers) and perform deletion
/// via tombstones.
///
/// Nodes are never freed one by one, so no memory reclamation scheme (hazard
/// pointers, epochs) is needed: the whole arena goes away with the list.
/// Supporting deletion would require one.
pub struct SkipList<C = Ascend> {
  arena: Arena,
  head: NodePtr,
  tail: NodePtr,

  /// Current height. 1 <= height <= max_height. CAS.
  height: CachePadded<AtomicU32>,
  len: CachePadded<AtomicU32>,

  opts: Options,

  /// Tests set this to yield inside the race windows of insertion.
  #[cfg(test)]
  testing: bool,

  cmp: C,
}

impl<C> core::fmt::Debug for SkipList<C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("SkipList")
      .field("arena", &self.arena)
      .field("height", &self.height())
      .field("len", &self.len())
      .field("opts", &self.opts)
      .finish()
  }
}

// --------------------------------Public Methods--------------------------------
impl<C> SkipList<C> {
  /// Returns the height of the tallest tower linked so far, at least 1.
  #[inline]
  pub fn height(&self) -> u32 {
    self.height.load(Ordering::Acquire)
  }

  /// Returns the arena backing this skiplist.
  #[inline]
  pub const fn arena(&self) -> &Arena {
    &self.arena
  }

  /// Returns the number of arena bytes in use, sentinels included.
  #[inline]
  pub fn size(&self) -> usize {
    self.arena.size()
  }

  /// Returns the capacity of the arena, sentinels included.
  #[inline]
  pub const fn capacity(&self) -> usize {
    self.arena.capacity()
  }

  /// Returns the number of bytes still available in the arena.
  #[inline]
  pub fn remaining(&self) -> usize {
    self.arena.remaining()
  }

  /// Returns the number of entries in the skiplist.
  #[inline]
  pub fn len(&self) -> usize {
    self.len.load(Ordering::Acquire) as usize
  }

  /// Returns true if the skiplist is empty.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns the options the skiplist was created with.
  #[inline]
  pub const fn options(&self) -> &Options {
    &self.opts
  }

  /// Returns the comparator of the skiplist.
  #[inline]
  pub const fn comparator(&self) -> &C {
    &self.cmp
  }
}

impl SkipList {
  /// Creates a new skiplist with room for `capacity` bytes of entries.
  ///
  /// `capacity` counts bytes for nodes, keys and values, not entries. The
  /// sentinels are allocated on top of it.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use arena_skl::SkipList;
  ///
  /// let list = SkipList::new(1 << 20).unwrap();
  /// list.add(b"key", 1, b"value").unwrap();
  /// ```
  #[inline]
  pub fn new(capacity: u32) -> Result<Self, Error> {
    Self::with_options(Options::new().with_capacity(capacity))
  }

  /// Like [`SkipList::new`], but with [`Options`].
  #[inline]
  pub fn with_options(opts: Options) -> Result<Self, Error> {
    Self::with_options_and_comparator(opts, Ascend)
  }

  /// Returns the maximum number of arena bytes a single [`add`](SkipList::add)
  /// of a key of `key_size` bytes and a value of `value_size` bytes can consume.
  ///
  /// A memtable can use this to reserve room before writing.
  #[inline]
  pub const fn max_node_size(key_size: u32, value_size: u32) -> u64 {
    Node::MAX_NODE_SIZE as u64 + key_size as u64 + value_size as u64 + Node::ALIGNMENT as u64 - 1
  }
}

impl<C: Comparator> SkipList<C> {
  /// Like [`SkipList::new`], but with a custom [`Comparator`].
  #[inline]
  pub fn with_comparator(capacity: u32, cmp: C) -> Result<Self, Error> {
    Self::with_options_and_comparator(Options::new().with_capacity(capacity), cmp)
  }

  /// Like [`SkipList::new`], but with [`Options`] and a custom [`Comparator`].
  pub fn with_options_and_comparator(opts: Options, cmp: C) -> Result<Self, Error> {
    let max_height = opts.max_height() as u32;
    let cap = (opts.capacity() as usize).saturating_add(Self::overhead(max_height));
    let arena = Arena::new(cap);
    let (head, tail) = Self::new_sentinels(&arena, max_height)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(cap = arena.capacity(), max_height, "created skiplist");

    Ok(Self {
      arena,
      head,
      tail,
      height: CachePadded::new(AtomicU32::new(1)),
      len: CachePadded::new(AtomicU32::new(0)),
      opts,
      #[cfg(test)]
      testing: false,
      cmp,
    })
  }

  /// Clears the skiplist so its arena can be reused by a new generation of
  /// entries. Requires exclusive access: no iterator or inserter can be alive.
  pub fn reset(&mut self) -> Result<(), Error> {
    self.arena.reset();
    let (head, tail) = Self::new_sentinels(&self.arena, self.opts.max_height() as u32)?;
    self.head = head;
    self.tail = tail;
    *self.height.get_mut() = 1;
    *self.len.get_mut() = 0;

    #[cfg(feature = "tracing")]
    tracing::debug!(cap = self.arena.capacity(), "reset skiplist");
    Ok(())
  }

  /// Adds the key, trailer and value to the skiplist.
  ///
  /// Entries are copied into the arena, the caller's buffers can be dropped
  /// right after the call.
  ///
  /// # Errors
  ///
  /// - Returns `Error::Duplicated`, if the key and trailer already exist.
  /// - Returns `Error::Full`, if there isn't enough room in the arena.
  /// - Returns `Error::KeyTooLarge`, `Error::ValueTooLarge` or `Error::EntryTooLarge`,
  ///   if the entry exceeds the configured limits.
  #[inline]
  pub fn add(&self, key: &[u8], trailer: u64, value: &[u8]) -> Result<(), Error> {
    self.inserter().add(key, trailer, value)
  }

  /// Returns an [`Inserter`], which caches the splice of its last insertion.
  /// Feeding it keys in ascending order skips most of the top-down search.
  #[inline]
  pub fn inserter(&self) -> Inserter<'_, C> {
    Inserter::new(self)
  }

  /// Returns an unbounded iterator over the skiplist. The iterator is not
  /// positioned: call one of the seek methods, `first` or `last`.
  #[inline]
  pub fn iter(&self) -> Iter<'_, C> {
    Iter::new(self, None, None)
  }

  /// Returns an iterator over the user keys in `[lower, upper)`.
  ///
  /// Only relative steps and the positioning methods documented to do so
  /// enforce the bounds, see [`Iter`].
  #[inline]
  pub fn iter_with_bounds<'a>(
    &'a self,
    lower: Option<&'a [u8]>,
    upper: Option<&'a [u8]>,
  ) -> Iter<'a, C> {
    Iter::new(self, lower, upper)
  }

  /// Returns a forward-only iterator for flushing the skiplist, which tracks
  /// how many arena bytes it has walked over.
  #[inline]
  pub fn flush_iter(&self) -> FlushIter<'_, C> {
    FlushIter::new(self)
  }
}

// --------------------------------Crate Methods--------------------------------
impl<C> SkipList<C> {
  #[inline]
  pub(crate) const fn head(&self) -> NodePtr {
    self.head
  }

  #[inline]
  pub(crate) const fn tail(&self) -> NodePtr {
    self.tail
  }

  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena.
  #[inline]
  pub(crate) unsafe fn get_prev(&self, nd: NodePtr, height: usize) -> NodePtr {
    if nd.is_null() {
      return NodePtr::NULL;
    }

    let offset = nd.prev_offset(&self.arena, height);
    self.node_ptr(offset)
  }

  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena.
  #[inline]
  pub(crate) unsafe fn get_next(&self, nd: NodePtr, height: usize) -> NodePtr {
    if nd.is_null() {
      return NodePtr::NULL;
    }

    let offset = nd.next_offset(&self.arena, height);
    self.node_ptr(offset)
  }

  /// ## Safety
  ///
  /// - `offset` must be 0 or the offset of a node allocated by the arena.
  #[inline]
  unsafe fn node_ptr(&self, offset: u32) -> NodePtr {
    let ptr = self.arena.get_pointer(offset as usize);
    debug_assert_eq!(self.arena.get_pointer_offset(ptr), offset);
    NodePtr::new(ptr, offset)
  }

  /// Returns the key, trailer and value of a node.
  ///
  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena and is not null.
  #[inline]
  pub(crate) unsafe fn entry(&self, nd: NodePtr) -> crate::EntryRef<'_> {
    let node = nd.as_ref();
    crate::EntryRef::new(
      node.get_key(&self.arena),
      node.trailer,
      node.get_value(&self.arena),
    )
  }

  /// Returns the arena bytes consumed by a node.
  ///
  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena and is not null.
  #[inline]
  pub(crate) unsafe fn alloc_size(&self, nd: NodePtr) -> u32 {
    nd.as_ref().alloc_size
  }

  #[inline]
  const fn overhead(max_height: u32) -> usize {
    // The reserved nil offset plus the head and tail sentinels.
    1 + 2 * Node::sentinel_size(max_height)
  }

  fn new_sentinels(arena: &Arena, max_height: u32) -> Result<(NodePtr, NodePtr), Error> {
    let head = Node::new_sentinel_ptr(arena, max_height)?;
    let tail = Node::new_sentinel_ptr(arena, max_height)?;

    // Safety: both sentinels were just allocated with max_height levels.
    unsafe {
      for i in 0..max_height as usize {
        head.init_tower(arena, i, 0, tail.offset);
        tail.init_tower(arena, i, head.offset, 0);
      }
    }
    Ok((head, tail))
  }
}

impl<C: Comparator> SkipList<C> {
  fn insert_in(
    &self,
    key: &[u8],
    trailer: u64,
    value: &[u8],
    ins: &mut Inserter<'_, C>,
  ) -> Result<(), Error> {
    if key.len() as u64 > self.opts.max_key_size() as u64 {
      return Err(Error::KeyTooLarge(key.len() as u64));
    }

    if value.len() as u64 > self.opts.max_value_size() as u64 {
      return Err(Error::ValueTooLarge(value.len() as u64));
    }

    // Safety: the inserter is bound to this list, so every cached splice
    // points at nodes allocated by self.arena.
    if unsafe { self.find_splice(key, trailer, ins) } {
      return Err(Error::Duplicated);
    }

    #[cfg(test)]
    if self.testing {
      // Widen the window between computing the splice and linking into it.
      std::thread::yield_now();
    }

    let (nd, height) = self.new_node(key, trailer, value)?;

    // Link bottom up: a node visible at level i must already be visible at
    // every level below i.
    let mut invalidate_splice = false;

    for i in 0..(height as usize) {
      let Splice { mut prev, mut next } = ins.spl[i];

      if prev.is_null() {
        // A level above the cached height, start from the sentinels.
        debug_assert!(next.is_null(), "next is expected to be nil, since prev is nil");

        prev = self.head;
        next = self.tail;
      }

      // prev <-> nd <-> next: point nd at both neighbours, publish nd with a CAS
      // on prev.next, then swing next.prev over to nd.
      let backoff = Backoff::new();

      // Safety: prev, next and nd are all allocated by self.arena, and the
      // tower of each of them is at least i + 1 levels high.
      unsafe {
        loop {
          nd.init_tower(&self.arena, i, prev.offset, next.offset);

          // A stale next.prev either belongs to a writer that linked next but
          // has not swung its prev link yet, or means a node went in between
          // prev and next. Only the first case has prev.next == next, and then
          // the prev link is repaired on that writer's behalf.
          let next_prev_offset = next.prev_offset(&self.arena, i);
          if next_prev_offset != prev.offset {
            let prev_next_offset = prev.next_offset(&self.arena, i);
            if prev_next_offset == next.offset {
              next.cas_prev_offset(&self.arena, i, next_prev_offset, prev.offset);
            }
          }

          if prev.cas_next_offset(&self.arena, i, next.offset, nd.offset) {
            // nd is published at level i. A lagging next.prev is tolerated,
            // later writers repair it.
            #[cfg(test)]
            if self.testing {
              std::thread::yield_now();
            }

            next.cas_prev_offset(&self.arena, i, prev.offset, nd.offset);
            break;
          }

          #[cfg(feature = "tracing")]
          tracing::trace!(level = i, "link CAS lost a race, recomputing splice");

          // Lost the race at this level. Search again from prev on the same
          // level only, the levels below stay linked.
          backoff.spin();
          let (p, n, found) = self.find_splice_for_level(key, trailer, i, prev);
          if found {
            if i != 0 {
              unreachable!("how can another thread have inserted a node at a non-base level?");
            }

            return Err(Error::Duplicated);
          }

          invalidate_splice = true;
          prev = p;
          next = n;
        }
      }
    }

    if invalidate_splice {
      ins.height = 0;
    } else {
      // nd now sits right after every cached prev, which makes it the best
      // guess for the next ascending key.
      for spl in ins.spl.iter_mut().take(height as usize) {
        spl.prev = nd;
      }
    }

    self.len.fetch_add(1, Ordering::Release);
    Ok(())
  }

  fn new_node(&self, key: &[u8], trailer: u64, value: &[u8]) -> Result<(NodePtr, u32), Error> {
    let height = random_height(self.opts.max_height() as u32);
    let nd = Node::new_node_ptr(&self.arena, height, key, trailer, value)?;

    // Losing this race is fine, the winner raised the height at least as far.
    let mut list_height = self.height();
    while height > list_height {
      match self.height.compare_exchange_weak(
        list_height,
        height,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          #[cfg(feature = "tracing")]
          tracing::trace!(from = list_height, to = height, "raised skiplist height");
          break;
        }
        Err(h) => list_height = h,
      }
    }
    Ok((nd, height))
  }

  /// Fills the inserter's splices for `key` from the top level down, reusing
  /// the cached splice when it still brackets the key. Returns whether the
  /// key and trailer are already in the list.
  ///
  /// ## Safety:
  /// - All of splices in the inserter must be contains node ptrs are allocated by the current skiplist.
  unsafe fn find_splice(&self, key: &[u8], trailer: u64, ins: &mut Inserter<'_, C>) -> bool {
    let list_height = self.height();
    let mut level = 0;

    let mut prev = self.head;
    if ins.height < list_height {
      // The list grew taller since the splice was cached, start over.
      ins.height = list_height;
      level = ins.height as usize;
    } else {
      // Find the lowest level whose cached pair is still adjacent, and reuse
      // it only if it strictly brackets the key. A key equal to either end
      // needs a full search so that duplicates are reported.
      while level < list_height as usize {
        let spl = ins.spl[level];
        if self.get_next(spl.prev, level) != spl.next {
          level += 1;
          continue;
        }

        let after_prev =
          spl.prev == self.head || self.compare_node(spl.prev, key, trailer) == cmp::Ordering::Greater;
        let before_next =
          spl.next == self.tail || self.compare_node(spl.next, key, trailer) == cmp::Ordering::Less;
        if after_prev && before_next {
          prev = spl.prev;
        } else {
          level = list_height as usize;
        }
        break;
      }
    }

    let mut found = false;
    for lvl in (0..level).rev() {
      let (p, next, f) = self.find_splice_for_level(key, trailer, lvl, prev);
      prev = p;
      found = f;
      ins.spl[lvl] = Splice { prev, next };
    }

    found
  }

  /// Walks right from `start` at `level` until the successor is not less than
  /// `key`, returning `(prev, next, found)` where `found` tells whether `next`
  /// holds exactly the key and trailer.
  ///
  /// ## Safety
  /// - `level` is less than the height of the sentinels.
  /// - `start` must be allocated by self's arena, must not be the tail, and must sort before the key.
  pub(crate) unsafe fn find_splice_for_level(
    &self,
    key: &[u8],
    trailer: u64,
    level: usize,
    start: NodePtr,
  ) -> (NodePtr, NodePtr, bool) {
    let mut prev = start;

    loop {
      let next = self.get_next(prev, level);
      if next == self.tail || next.is_null() {
        return (prev, self.tail, false);
      }

      match self.compare_node(next, key, trailer) {
        cmp::Ordering::Less => return (prev, next, false),
        cmp::Ordering::Equal => return (prev, next, true),
        cmp::Ordering::Greater => prev = next,
      }
    }
  }

  /// Compares the key and trailer against the node's: `Less` means the key
  /// sorts before the node.
  ///
  /// ## Safety
  /// - The caller must ensure that the node is allocated by the arena and is not a sentinel.
  #[inline]
  unsafe fn compare_node(&self, nd: NodePtr, key: &[u8], trailer: u64) -> cmp::Ordering {
    let node = nd.as_ref();
    match self.cmp.compare(key, node.get_key(&self.arena)) {
      // User-key equality, larger trailers sort first.
      cmp::Ordering::Equal => node.trailer.cmp(&trailer),
      ord => ord,
    }
  }
}

/// Inserter caches the splice of its last insertion into a [`SkipList`].
///
/// When keys are added in ascending order, the cached splice usually still
/// brackets the next key, which saves most of the top-down search. The cache is
/// only a hint: a stale one is detected and recomputed, so any key order is
/// correct.
pub struct Inserter<'a, C> {
  list: &'a SkipList<C>,
  spl: [Splice; MAX_HEIGHT],
  height: u32,
}

impl<C> core::fmt::Debug for Inserter<'_, C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Inserter")
      .field("height", &self.height)
      .finish()
  }
}

impl<'a, C> Inserter<'a, C> {
  #[inline]
  fn new(list: &'a SkipList<C>) -> Self {
    Self {
      list,
      spl: [Splice::default(); MAX_HEIGHT],
      height: 0,
    }
  }
}

impl<C: Comparator> Inserter<'_, C> {
  /// Adds the key, trailer and value to the skiplist this inserter is bound to.
  ///
  /// See [`SkipList::add`] for the errors.
  #[inline]
  pub fn add(&mut self, key: &[u8], trailer: u64, value: &[u8]) -> Result<(), Error> {
    let list = self.list;
    list.insert_in(key, trailer, value, self)
  }
}

/// The boundary pair of nodes around a key at one level.
#[derive(Debug, Clone, Copy)]
struct Splice {
  prev: NodePtr,
  next: NodePtr,
}

impl Default for Splice {
  #[inline]
  fn default() -> Self {
    Self {
      prev: NodePtr::NULL,
      next: NodePtr::NULL,
    }
  }
}
