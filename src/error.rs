use crate::ArenaError;

/// Error type for the [`SkipList`](crate::SkipList).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// Indicates that the arena is full.
  ///
  /// The entries added so far are intact, but the list cannot take more:
  /// seal it and route subsequent writes to a fresh one.
  Full(ArenaError),

  /// Indicates that an entry with the same key and trailer already
  /// exists in the skiplist. As a low-level crate, duplicate entries are not directly supported and
  /// instead must be handled by the user.
  Duplicated,

  /// Indicates that the key is too large to be stored in the [`SkipList`](crate::SkipList).
  KeyTooLarge(u64),

  /// Indicates that the value is too large to be stored in the [`SkipList`](crate::SkipList).
  ValueTooLarge(u64),

  /// Indicates that the entry is too large to be stored in the [`SkipList`](crate::SkipList).
  EntryTooLarge(u64),
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::Full(e) => write!(f, "{e}"),
      Self::Duplicated => write!(f, "key already exists in the skiplist"),
      Self::KeyTooLarge(size) => write!(f, "key size {size} is too large"),
      Self::ValueTooLarge(size) => write!(f, "value size {size} is too large"),
      Self::EntryTooLarge(size) => write!(f, "entry size {size} is too large"),
    }
  }
}

impl std::error::Error for Error {}

impl From<ArenaError> for Error {
  #[inline]
  fn from(e: ArenaError) -> Self {
    Self::Full(e)
  }
}

impl Error {
  /// Returns `true` if the error is caused by an exhausted arena.
  #[inline]
  pub const fn is_full(&self) -> bool {
    matches!(self, Self::Full(_))
  }

  /// Returns `true` if the key and trailer are already in the skiplist.
  #[inline]
  pub const fn is_duplicated(&self) -> bool {
    matches!(self, Self::Duplicated)
  }
}
