#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![deny(missing_docs)]
#![allow(clippy::mut_from_ref, rustdoc::bare_urls)]

use core::cmp;

mod arena;
pub use arena::{Arena, ArenaError};

mod error;
pub use error::Error;

mod iterator;
pub use iterator::{EntryRef, FlushIter, Iter, SeekGeFlags};

mod list;
pub use list::{Inserter, SkipList};

mod node;

mod options;
pub use options::Options;

/// The maximum height of a node's tower, and therefore of the skiplist.
pub const MAX_HEIGHT: usize = 20;

/// Precompute the skiplist probabilities so that only a single random number
/// needs to be generated and so that the optimal pvalue can be used (inverse
/// of Euler's number).
const PROBABILITIES: [u32; MAX_HEIGHT] = {
  const P: f64 = 1.0 / core::f64::consts::E;

  let mut probabilities = [0; MAX_HEIGHT];
  let mut p = 1f64;

  let mut i = 0;
  while i < MAX_HEIGHT {
    probabilities[i] = ((u32::MAX as f64) * p) as u32;
    p *= P;
    i += 1;
  }

  probabilities
};

/// Draws a tower height in `1..=max_height`. Each extra level is kept with
/// probability `1/e`, independently of the key.
#[inline]
fn random_height(max_height: u32) -> u32 {
  let rnd: u32 = rand::random();
  let max_height = max_height.min(MAX_HEIGHT as u32) as usize;
  let mut h = 1;

  while h < max_height && rnd <= PROBABILITIES[h] {
    h += 1;
  }
  h as u32
}

/// Comparator is used for key-value database developers to define their own key comparison logic.
///
/// The comparator only orders user keys. Entries with equal user keys are
/// further ordered by their trailers, see [`SkipList`].
pub trait Comparator {
  /// Compares two byte slices.
  fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering;
}

impl<C: Comparator + ?Sized> Comparator for &C {
  #[inline]
  fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
    (**self).compare(a, b)
  }
}

impl<C: Comparator + ?Sized> Comparator for std::sync::Arc<C> {
  #[inline]
  fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
    (**self).compare(a, b)
  }
}

/// Ascend is a comparator that compares byte slices in ascending order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ascend;

impl Comparator for Ascend {
  #[inline]
  fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
    a.cmp(b)
  }
}

/// Descend is a comparator that compares byte slices in descending order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Descend;

impl Comparator for Descend {
  #[inline]
  fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
    b.cmp(a)
  }
}
