use core::{
  mem, ptr,
  sync::atomic::{AtomicU32, Ordering},
};

use super::{arena::Arena, error::Error, MAX_HEIGHT};

/// One level of a node's tower.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct Link {
  pub(crate) next_offset: AtomicU32,
  pub(crate) prev_offset: AtomicU32,
}

impl Link {
  pub(crate) const SIZE: usize = mem::size_of::<Self>();

  #[inline]
  fn init(&self, prev_offset: u32, next_offset: u32) {
    self.next_offset.store(next_offset, Ordering::Relaxed);
    self.prev_offset.store(prev_offset, Ordering::Relaxed);
  }
}

/// A handle to a node: the node's arena offset, and the pointer it resolves to.
#[derive(Debug)]
pub(crate) struct NodePtr {
  pub(crate) ptr: *const Node,
  pub(crate) offset: u32,
}

// Safety: a NodePtr is only an address inside an arena, which is Send + Sync.
unsafe impl Send for NodePtr {}
unsafe impl Sync for NodePtr {}

impl Clone for NodePtr {
  #[inline]
  fn clone(&self) -> Self {
    *self
  }
}

impl Copy for NodePtr {}

impl PartialEq for NodePtr {
  #[inline]
  fn eq(&self, other: &Self) -> bool {
    self.offset == other.offset
  }
}

impl Eq for NodePtr {}

impl NodePtr {
  pub(crate) const NULL: Self = Self {
    ptr: ptr::null(),
    offset: 0,
  };

  #[inline]
  pub(crate) const fn new(ptr: *const u8, offset: u32) -> Self {
    Self {
      ptr: ptr.cast(),
      offset,
    }
  }

  #[inline]
  pub(crate) fn is_null(&self) -> bool {
    self.ptr.is_null()
  }

  /// ## Safety
  /// - the pointer must be valid
  #[inline]
  pub(crate) const unsafe fn as_ref<'a>(&self) -> &'a Node {
    &*self.ptr
  }

  /// ## Safety
  /// - The node must be allocated by `arena`, and `idx` must be less than its height.
  #[inline]
  pub(crate) unsafe fn tower<'a>(&self, arena: &'a Arena, idx: usize) -> &'a Link {
    let tower_ptr_offset = self.offset as usize + Node::SIZE + idx * Link::SIZE;
    &*arena.get_pointer(tower_ptr_offset).cast()
  }

  /// ## Safety
  /// - The node must be allocated by `arena`, and `idx` must be less than its height.
  /// - The level must not be published yet.
  #[inline]
  pub(crate) unsafe fn init_tower(&self, arena: &Arena, idx: usize, prev_offset: u32, next_offset: u32) {
    self.tower(arena, idx).init(prev_offset, next_offset);
  }

  /// ## Safety
  /// - The node must be allocated by `arena`, and `idx` must be less than its height.
  #[inline]
  pub(crate) unsafe fn next_offset(&self, arena: &Arena, idx: usize) -> u32 {
    self.tower(arena, idx).next_offset.load(Ordering::Acquire)
  }

  /// ## Safety
  /// - The node must be allocated by `arena`, and `idx` must be less than its height.
  #[inline]
  pub(crate) unsafe fn prev_offset(&self, arena: &Arena, idx: usize) -> u32 {
    self.tower(arena, idx).prev_offset.load(Ordering::Acquire)
  }

  /// ## Safety
  /// - The node must be allocated by `arena`, and `idx` must be less than its height.
  #[inline]
  pub(crate) unsafe fn cas_next_offset(&self, arena: &Arena, idx: usize, old: u32, new: u32) -> bool {
    self
      .tower(arena, idx)
      .next_offset
      .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// ## Safety
  /// - The node must be allocated by `arena`, and `idx` must be less than its height.
  #[inline]
  pub(crate) unsafe fn cas_prev_offset(&self, arena: &Arena, idx: usize, old: u32, new: u32) -> bool {
    self
      .tower(arena, idx)
      .prev_offset
      .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}

/// The fixed header of a node.
///
/// The header is immutable once the node is published. The key bytes and then
/// the value bytes are stored right after the tower.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct Node {
  pub(crate) trailer: u64,
  // Immutable. No need to lock to access key.
  pub(crate) key_offset: u32,
  // Immutable. No need to lock to access key.
  pub(crate) key_size: u32,
  // Immutable. The value follows the key.
  pub(crate) value_size: u32,
  // Bytes consumed from the arena, alignment padding included.
  pub(crate) alloc_size: u32,
  // ** DO NOT REMOVE BELOW COMMENT**
  // The below field will be attached after the node, have to comment out
  // this field, because each node will not use the full height, the code will
  // not allocate the full size of the tower.
  //
  // Most nodes do not need to use the full height of the tower, since the
  // probability of each successive level decreases exponentially. Because
  // these elements are never accessed, they do not need to be allocated.
  // Therefore, when a node is allocated in the arena, its memory footprint
  // is deliberately truncated to not include unneeded tower elements.
  //
  // All accesses to elements should use CAS operations, with no need to lock.
  // pub(crate) tower: [Link; height],
}

impl Node {
  pub(crate) const SIZE: usize = mem::size_of::<Self>();

  pub(crate) const ALIGNMENT: u32 = mem::align_of::<Self>() as u32;

  pub(crate) const MAX_NODE_SIZE: usize = Self::SIZE + MAX_HEIGHT * Link::SIZE;

  /// Size of the header plus a tower of `height` levels.
  #[inline]
  pub(crate) const fn node_size(height: u32) -> usize {
    Self::SIZE + height as usize * Link::SIZE
  }

  /// Arena bytes a sentinel of `height` levels may consume.
  #[inline]
  pub(crate) const fn sentinel_size(height: u32) -> usize {
    Self::node_size(height) + Self::ALIGNMENT as usize - 1
  }

  /// Allocates a node with `height` levels, copies `key` and `value` into the
  /// arena and returns a handle to it. Every tower level starts unlinked.
  pub(crate) fn new_node_ptr(
    arena: &Arena,
    height: u32,
    key: &[u8],
    trailer: u64,
    value: &[u8],
  ) -> Result<NodePtr, Error> {
    if height < 1 || height > MAX_HEIGHT as u32 {
      panic!("height cannot be less than one or greater than the max height");
    }

    let key_size = key.len() as u64;
    if key_size > u32::MAX as u64 {
      return Err(Error::KeyTooLarge(key_size));
    }

    let value_size = value.len() as u64;
    if value_size > u32::MAX as u64 {
      return Err(Error::ValueTooLarge(value_size));
    }

    let node_size = Self::node_size(height) as u64;
    let entry_size = node_size + key_size + value_size;
    if entry_size > u32::MAX as u64 {
      return Err(Error::EntryTooLarge(entry_size));
    }

    let (node_offset, alloc_size) = arena.alloc(entry_size as u32, Self::ALIGNMENT)?;
    let key_offset = node_offset + node_size as u32;

    // Safety: the range [node_offset, node_offset + entry_size) was just
    // reserved, nobody else can observe it until the node is linked.
    unsafe {
      let ptr = arena.get_pointer_mut(node_offset as usize);
      ptr.cast::<Node>().write(Node {
        trailer,
        key_offset,
        key_size: key_size as u32,
        value_size: value_size as u32,
        alloc_size,
      });

      let nd = NodePtr::new(ptr, node_offset);
      for i in 0..height as usize {
        nd.init_tower(arena, i, 0, 0);
      }

      arena
        .get_bytes_mut(key_offset as usize, key_size as usize)
        .copy_from_slice(key);
      arena
        .get_bytes_mut(key_offset as usize + key_size as usize, value_size as usize)
        .copy_from_slice(value);
      Ok(nd)
    }
  }

  /// Allocates a head or tail sentinel: no key, no value, `height` levels.
  #[inline]
  pub(crate) fn new_sentinel_ptr(arena: &Arena, height: u32) -> Result<NodePtr, Error> {
    Self::new_node_ptr(arena, height, &[], 0, &[])
  }

  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena.
  #[inline]
  pub(crate) unsafe fn get_key<'a>(&self, arena: &'a Arena) -> &'a [u8] {
    arena.get_bytes(self.key_offset as usize, self.key_size as usize)
  }

  /// ## Safety
  ///
  /// - The caller must ensure that the node is allocated by the arena.
  #[inline]
  pub(crate) unsafe fn get_value<'a>(&self, arena: &'a Arena) -> &'a [u8] {
    arena.get_bytes(
      (self.key_offset + self.key_size) as usize,
      self.value_size as usize,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_layout() {
    assert_eq!(Link::SIZE, 8);
    assert_eq!(Node::SIZE % Node::ALIGNMENT as usize, 0);
    assert_eq!(Node::node_size(MAX_HEIGHT as u32), Node::MAX_NODE_SIZE);
  }

  #[test]
  fn test_new_node() {
    let arena = Arena::new(1024);
    let nd = Node::new_node_ptr(&arena, 3, b"key", 7, b"value").unwrap();
    assert_eq!(nd.offset % Node::ALIGNMENT, 0);
    unsafe {
      let node = nd.as_ref();
      assert_eq!(node.get_key(&arena), b"key");
      assert_eq!(node.get_value(&arena), b"value");
      assert_eq!(node.trailer, 7);
      assert_eq!(
        node.alloc_size as usize,
        Node::node_size(3) + 8 + Node::ALIGNMENT as usize - 1
      );
      for i in 0..3 {
        assert_eq!(nd.next_offset(&arena, i), 0);
        assert_eq!(nd.prev_offset(&arena, i), 0);
      }

      assert!(nd.cas_next_offset(&arena, 1, 0, 42));
      assert!(!nd.cas_next_offset(&arena, 1, 0, 43));
      assert_eq!(nd.next_offset(&arena, 1), 42);
      assert!(nd.cas_prev_offset(&arena, 2, 0, 9));
      assert_eq!(nd.prev_offset(&arena, 2), 9);
    }
  }

  #[test]
  fn test_new_node_full() {
    let arena = Arena::new(Node::node_size(1) + 4);
    let err = Node::new_node_ptr(&arena, 1, b"k", 0, b"v").unwrap_err();
    assert!(matches!(err, Error::Full(_)));
    assert_eq!(arena.size(), 1);
  }

  #[test]
  fn test_empty_key_and_value() {
    let arena = Arena::new(1024);
    let nd = Node::new_sentinel_ptr(&arena, MAX_HEIGHT as u32).unwrap();
    unsafe {
      let node = nd.as_ref();
      assert!(node.get_key(&arena).is_empty());
      assert!(node.get_value(&arena).is_empty());
    }
    assert!(!nd.is_null());
    assert!(NodePtr::NULL.is_null());
  }
}
