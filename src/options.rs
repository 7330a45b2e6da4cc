use super::MAX_HEIGHT;

/// Options for [`SkipList`](crate::SkipList).
#[viewit::viewit(vis_all = "pub(super)", getters(skip), setters(skip))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Options {
  capacity: u32,
  max_key_size: u32,
  max_value_size: u32,
  max_height: u8,
}

impl Default for Options {
  #[inline]
  fn default() -> Options {
    Options::new()
  }
}

impl Options {
  /// The default capacity of the ARENA, 4 MiB.
  pub const DEFAULT_CAPACITY: u32 = 4 << 20;

  /// Creates a new set of options with the default values.
  #[inline]
  pub const fn new() -> Self {
    Self {
      capacity: Self::DEFAULT_CAPACITY,
      max_key_size: u32::MAX,
      max_value_size: u32::MAX,
      max_height: MAX_HEIGHT as u8,
    }
  }

  /// Set the number of bytes available for entries.
  ///
  /// The head and tail sentinels are allocated on top of this, so a
  /// capacity of `n` leaves `n` bytes for nodes, keys and values.
  ///
  /// The default capacity is [`Options::DEFAULT_CAPACITY`].
  ///
  /// ## Example
  ///
  /// ```rust
  /// use arena_skl::Options;
  ///
  /// let opts = Options::new().with_capacity(1024);
  /// assert_eq!(opts.capacity(), 1024);
  /// ```
  #[inline]
  pub const fn with_capacity(mut self, capacity: u32) -> Self {
    self.capacity = capacity;
    self
  }

  /// Set the maximum size of a key.
  ///
  /// The default is `u32::MAX`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use arena_skl::Options;
  ///
  /// let opts = Options::new().with_max_key_size(1024);
  /// ```
  #[inline]
  pub const fn with_max_key_size(mut self, size: u32) -> Self {
    self.max_key_size = size;
    self
  }

  /// Set the maximum size of a value.
  ///
  /// The default is `u32::MAX`.
  ///
  /// ## Example
  ///
  /// ```rust
  /// use arena_skl::Options;
  ///
  /// let opts = Options::new().with_max_value_size(1024);
  /// ```
  #[inline]
  pub const fn with_max_value_size(mut self, size: u32) -> Self {
    self.max_value_size = size;
    self
  }

  /// Set the maximum tower height, clamped to `1..=MAX_HEIGHT`.
  ///
  /// A lower maximum height makes the sentinels smaller, at the cost of
  /// longer searches once the list grows large.
  ///
  /// The default is [`MAX_HEIGHT`](crate::MAX_HEIGHT).
  ///
  /// ## Example
  ///
  /// ```rust
  /// use arena_skl::Options;
  ///
  /// let opts = Options::new().with_max_height(0);
  /// assert_eq!(opts.max_height(), 1);
  ///
  /// let opts = Options::new().with_max_height(u8::MAX);
  /// assert_eq!(opts.max_height() as usize, arena_skl::MAX_HEIGHT);
  /// ```
  #[inline]
  pub const fn with_max_height(mut self, height: u8) -> Self {
    self.max_height = if height == 0 {
      1
    } else if height as usize > MAX_HEIGHT {
      MAX_HEIGHT as u8
    } else {
      height
    };
    self
  }

  /// Returns the number of bytes available for entries.
  #[inline]
  pub const fn capacity(&self) -> u32 {
    self.capacity
  }

  /// Returns the maximum size of a key.
  #[inline]
  pub const fn max_key_size(&self) -> u32 {
    self.max_key_size
  }

  /// Returns the maximum size of a value.
  #[inline]
  pub const fn max_value_size(&self) -> u32 {
    self.max_value_size
  }

  /// Returns the maximum tower height.
  #[inline]
  pub const fn max_height(&self) -> u8 {
    self.max_height
  }
}
