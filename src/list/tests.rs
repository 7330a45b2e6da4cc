use super::*;
use crate::SeekGeFlags;
use rand::seq::SliceRandom;
use std::{format, vec::Vec};

const ARENA_SIZE: u32 = 1 << 20;

#[cfg(miri)]
const N: usize = 5;
#[cfg(not(miri))]
const N: usize = 1000;

/// Only used for testing
fn key(i: usize) -> Vec<u8> {
  format!("{:05}", i).into_bytes()
}

/// Only used for testing
fn new_value(i: usize) -> Vec<u8> {
  format!("v{:05}", i).into_bytes()
}

/// Walks the whole list forward and backward, checking the internal key order
/// and that both directions agree.
fn assert_sorted<C: Comparator>(l: &SkipList<C>) -> usize {
  let mut forward = Vec::new();
  let mut it = l.iter();
  let mut ent = it.first();
  while let Some(e) = ent {
    forward.push((e.key().to_vec(), e.trailer()));
    ent = it.next();
  }

  for pair in forward.windows(2) {
    let (ak, at) = &pair[0];
    let (bk, bt) = &pair[1];
    match l.comparator().compare(ak, bk) {
      cmp::Ordering::Less => {}
      cmp::Ordering::Equal => assert!(at > bt, "trailers out of order for {:?}", ak),
      cmp::Ordering::Greater => panic!("{:?} sorts after {:?}", ak, bk),
    }
  }

  let mut backward = Vec::new();
  let mut ent = it.last();
  while let Some(e) = ent {
    backward.push((e.key().to_vec(), e.trailer()));
    ent = it.prev();
  }
  backward.reverse();
  assert_eq!(forward, backward);

  forward.len()
}

macro_rules! list_tests {
  ($($name:ident),+ $(,)?) => {
    $(
      paste::paste! {
        #[test]
        fn [< test_ $name >]() {
          $name(SkipList::new(ARENA_SIZE).unwrap());
        }

        #[test]
        fn [< test_ $name _height1 >]() {
          $name(
            SkipList::with_options(
              Options::new()
                .with_capacity(ARENA_SIZE)
                .with_max_height(1),
            )
            .unwrap(),
          );
        }

        #[test]
        fn [< test_ $name _testing >]() {
          let mut l = SkipList::new(ARENA_SIZE).unwrap();
          l.testing = true;
          $name(l);
        }
      }
    )+
  };
}

list_tests!(
  empty,
  basic,
  duplicate,
  trailer_order,
  inserter_ascending,
  inserter_random_order,
  inserter_duplicate,
  concurrent_basic,
  concurrent_one_key,
  concurrent_same_entry,
  concurrent_inserters,
  concurrent_read_write,
);

fn empty(l: SkipList) {
  assert!(l.is_empty());
  assert_eq!(l.len(), 0);
  assert_eq!(l.height(), 1);

  let mut it = l.iter();
  assert!(it.at_head());
  assert!(it.first().is_none());
  assert!(it.at_tail());
  assert!(it.last().is_none());
  assert!(it.at_head());
  assert!(it.seek_ge(b"aaa", SeekGeFlags::empty()).is_none());
  assert!(it.seek_lt(b"aaa").is_none());
  assert!(l.flush_iter().next().is_none());
}

fn basic(l: SkipList) {
  // Try adding values.
  l.add(b"key1", 0, &new_value(1)).unwrap();
  l.add(b"key3", 0, &new_value(3)).unwrap();
  l.add(b"key2", 0, &new_value(2)).unwrap();
  assert_eq!(l.len(), 3);
  assert!(l.height() >= 1 && l.height() <= l.options().max_height() as u32);

  let mut it = l.iter();
  let ent = it.seek_ge(b"key", SeekGeFlags::empty()).unwrap();
  assert_eq!(ent.key(), b"key1");
  assert_eq!(ent.value(), new_value(1));

  let ent = it.seek_ge(b"key2", SeekGeFlags::empty()).unwrap();
  assert_eq!(ent.key(), b"key2");
  assert_eq!(ent.value(), new_value(2));
  assert_eq!(ent.trailer(), 0);

  let ent = it.seek_ge(b"key3", SeekGeFlags::empty()).unwrap();
  assert_eq!(ent.key(), b"key3");
  assert_eq!(ent.value(), new_value(3));

  assert!(it.seek_ge(b"key4", SeekGeFlags::empty()).is_none());
  assert_eq!(assert_sorted(&l), 3);
}

fn duplicate(l: SkipList) {
  l.add(b"key", 1, b"first").unwrap();
  let size = l.size();

  let err = l.add(b"key", 1, b"second").unwrap_err();
  assert_eq!(err, Error::Duplicated);
  assert_eq!(l.size(), size);
  assert_eq!(l.len(), 1);

  let mut it = l.iter();
  let ent = it.first().unwrap();
  assert_eq!(ent.value(), b"first");
  assert!(it.next().is_none());

  // Another version of the same user key is a new entry.
  l.add(b"key", 2, b"second").unwrap();
  assert_eq!(l.len(), 2);
}

fn trailer_order(l: SkipList) {
  l.add(b"a", 1, b"a1").unwrap();
  l.add(b"a", 3, b"a3").unwrap();
  l.add(b"b", 0, b"b0").unwrap();
  l.add(b"a", 2, b"a2").unwrap();
  l.add(b"a", u64::MAX, b"amax").unwrap();

  let got: Vec<Vec<u8>> = l.flush_iter().map(|ent| ent.value().to_vec()).collect();
  let want: Vec<Vec<u8>> = std::vec![
    b"amax".to_vec(),
    b"a3".to_vec(),
    b"a2".to_vec(),
    b"a1".to_vec(),
    b"b0".to_vec(),
  ];
  assert_eq!(got, want);

  // Seeks land on the newest version of a user key.
  let mut it = l.iter();
  let ent = it.seek_ge(b"a", SeekGeFlags::empty()).unwrap();
  assert_eq!(ent.trailer(), u64::MAX);
  let ent = it.seek_lt(b"b").unwrap();
  assert_eq!((ent.key(), ent.trailer()), (&b"a"[..], 1));
  assert!(it.seek_lt(b"a").is_none());
}

fn inserter_ascending(l: SkipList) {
  let mut ins = l.inserter();
  for i in 0..N {
    ins.add(&key(i), 0, &new_value(i)).unwrap();
  }
  assert_eq!(l.len(), N);
  assert_eq!(assert_sorted(&l), N);

  let mut it = l.iter();
  for i in 0..N {
    let ent = it.seek_ge(&key(i), SeekGeFlags::empty()).unwrap();
    assert_eq!(ent.key(), key(i));
    assert_eq!(ent.value(), new_value(i));
  }
}

fn inserter_random_order(l: SkipList) {
  let mut order: Vec<usize> = (0..N).collect();
  order.shuffle(&mut rand::rng());

  let mut ins = l.inserter();
  for &i in &order {
    ins.add(&key(i), i as u64, &new_value(i)).unwrap();
  }
  assert_eq!(assert_sorted(&l), N);

  let mut it = l.iter();
  let mut ent = it.first();
  for i in 0..N {
    let e = ent.unwrap();
    assert_eq!(e.key(), key(i));
    assert_eq!(e.trailer(), i as u64);
    ent = it.next();
  }
  assert!(ent.is_none());
}

fn inserter_duplicate(l: SkipList) {
  let mut ins = l.inserter();
  ins.add(b"a", 1, b"").unwrap();
  assert_eq!(ins.add(b"a", 1, b"").unwrap_err(), Error::Duplicated);

  ins.add(b"b", 1, b"").unwrap();
  ins.add(b"c", 1, b"").unwrap();
  // The cached splice now sits past b.
  assert_eq!(ins.add(b"b", 1, b"").unwrap_err(), Error::Duplicated);
  assert_eq!(ins.add(b"c", 1, b"").unwrap_err(), Error::Duplicated);
  ins.add(b"b", 0, b"").unwrap();
  ins.add(b"b", 2, b"").unwrap();

  // Entries added through the list are seen by the inserter.
  l.add(b"d", 1, b"").unwrap();
  assert_eq!(ins.add(b"d", 1, b"").unwrap_err(), Error::Duplicated);

  assert_eq!(l.len(), 6);
  assert_eq!(assert_sorted(&l), 6);
}

fn concurrent_basic(l: SkipList) {
  std::thread::scope(|s| {
    for i in 0..N {
      let l = &l;
      s.spawn(move || {
        l.add(&key(i), 0, &new_value(i)).unwrap();
      });
    }
  });

  std::thread::scope(|s| {
    for i in 0..N {
      let l = &l;
      s.spawn(move || {
        let mut it = l.iter();
        let ent = it.seek_ge(&key(i), SeekGeFlags::empty()).unwrap();
        assert_eq!(ent.key(), key(i), "broken: {i}");
        assert_eq!(ent.value(), new_value(i), "broken: {i}");
      });
    }
  });

  assert_eq!(l.len(), N);
  assert_eq!(assert_sorted(&l), N);
}

fn concurrent_one_key(l: SkipList) {
  std::thread::scope(|s| {
    for i in 0..N {
      let l = &l;
      s.spawn(move || {
        l.add(b"thekey", i as u64, &new_value(i)).unwrap();
      });
    }
  });

  let mut it = l.iter();
  let mut ent = it.seek_ge(b"thekey", SeekGeFlags::empty());
  for i in (0..N).rev() {
    let e = ent.unwrap();
    assert_eq!(e.key(), b"thekey");
    assert_eq!(e.trailer(), i as u64);
    assert_eq!(e.value(), new_value(i));
    ent = it.next();
  }
  assert!(ent.is_none());
  assert_eq!(assert_sorted(&l), N);
}

fn concurrent_same_entry(l: SkipList) {
  let wins = AtomicU32::new(0);
  std::thread::scope(|s| {
    for i in 0..N {
      let l = &l;
      let wins = &wins;
      s.spawn(move || match l.add(b"thekey", 7, &new_value(i)) {
        Ok(()) => {
          wins.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => assert_eq!(e, Error::Duplicated),
      });
    }
  });

  assert_eq!(wins.load(Ordering::SeqCst), 1);
  assert_eq!(l.len(), 1);
  assert_eq!(assert_sorted(&l), 1);
}

fn concurrent_inserters(l: SkipList) {
  const WRITERS: usize = 4;

  std::thread::scope(|s| {
    for w in 0..WRITERS {
      let l = &l;
      s.spawn(move || {
        let mut ins = l.inserter();
        // Writers interleave their keys, so every cached splice goes stale.
        for i in (w..N).step_by(WRITERS) {
          ins.add(&key(i), 0, &new_value(i)).unwrap();
        }
      });
    }
  });

  assert_eq!(l.len(), N);
  assert_eq!(assert_sorted(&l), N);
}

fn concurrent_read_write(l: SkipList) {
  const WRITERS: usize = 4;
  const READERS: usize = 4;

  let done = AtomicU32::new(0);
  std::thread::scope(|s| {
    for w in 0..WRITERS {
      let l = &l;
      let done = &done;
      s.spawn(move || {
        for i in 0..N {
          l.add(&key(i), w as u64, &new_value(i)).unwrap();
        }
        done.fetch_add(1, Ordering::Release);
      });
    }

    for _ in 0..READERS {
      let l = &l;
      let done = &done;
      s.spawn(move || {
        while done.load(Ordering::Acquire) < WRITERS as u32 {
          let mut it = l.iter();
          let mut prev: Option<(Vec<u8>, u64)> = None;
          let mut ent = it.first();
          while let Some(e) = ent {
            if let Some((pk, pt)) = &prev {
              assert!(
                (pk.as_slice(), core::cmp::Reverse(*pt)) < (e.key(), core::cmp::Reverse(e.trailer())),
                "observed out of order entries"
              );
            }
            assert_eq!(e.value(), new_value(
              core::str::from_utf8(e.key()).unwrap().parse().unwrap()
            ));
            prev = Some((e.key().to_vec(), e.trailer()));
            ent = it.next();
          }
        }
      });
    }
  });

  assert_eq!(l.len(), N * WRITERS);
  assert_eq!(assert_sorted(&l), N * WRITERS);
}

#[test]
fn test_full() {
  let l = SkipList::new(1000).unwrap();
  let mut found_arena_full = false;

  for i in 0..100 {
    if let Err(e) = l.add(&key(i), 0, &new_value(i)) {
      assert!(e.is_full());
      found_arena_full = true;
      break;
    }
  }

  assert!(found_arena_full);

  let e = l.add(b"someval", 0, &[]).unwrap_err();
  assert!(matches!(e, Error::Full(_)));

  // Nothing written before exhaustion is lost.
  let n = assert_sorted(&l);
  assert_eq!(n, l.len());
  assert!(n > 0);
}

#[test]
fn test_exhaustion_leaves_list_empty() {
  // Room for the sentinels plus a few bytes, less than one node.
  let l = SkipList::new(8).unwrap();
  let size = l.size();
  let e = l.add(b"k", 0, b"v").unwrap_err();
  assert!(e.is_full());
  assert_eq!(l.size(), size);
  assert!(l.is_empty());
  assert!(l.iter().first().is_none());
}

#[test]
fn test_key_and_value_too_large() {
  let l = SkipList::with_options(
    Options::new()
      .with_capacity(ARENA_SIZE)
      .with_max_key_size(4)
      .with_max_value_size(8),
  )
  .unwrap();
  let size = l.size();

  assert_eq!(
    l.add(b"12345", 0, b"").unwrap_err(),
    Error::KeyTooLarge(5)
  );
  assert_eq!(
    l.add(b"1234", 0, b"123456789").unwrap_err(),
    Error::ValueTooLarge(9)
  );
  assert_eq!(l.size(), size);

  l.add(b"1234", 0, b"12345678").unwrap();
  assert_eq!(l.len(), 1);
}

#[test]
fn test_height_limit() {
  let l = SkipList::with_options(
    Options::new()
      .with_capacity(ARENA_SIZE)
      .with_max_height(3),
  )
  .unwrap();
  for i in 0..N {
    l.add(&key(i), 0, &new_value(i)).unwrap();
  }
  assert!(l.height() <= 3);

  let l = SkipList::new(ARENA_SIZE).unwrap();
  for i in 0..N {
    l.add(&key(i), 0, &new_value(i)).unwrap();
  }
  assert!(l.height() >= 1 && l.height() <= MAX_HEIGHT as u32);
}

#[test]
fn test_max_node_size() {
  use rand::Rng;

  let l = SkipList::new(ARENA_SIZE).unwrap();
  let mut rng = rand::rng();
  for i in 0..N {
    let k = std::vec![b'k'; rng.random_range(0..64)];
    let v = std::vec![b'v'; rng.random_range(0..256)];
    let before = l.size();
    l.add(&k, i as u64, &v).unwrap();
    let used = (l.size() - before) as u64;
    assert!(used <= SkipList::max_node_size(k.len() as u32, v.len() as u32));
  }
}

#[test]
fn test_reset() {
  let mut l = SkipList::new(ARENA_SIZE).unwrap();
  let empty_size = l.size();
  for i in 0..N {
    l.add(&key(i), 0, &new_value(i)).unwrap();
  }

  l.reset().unwrap();
  assert!(l.is_empty());
  assert_eq!(l.height(), 1);
  assert_eq!(l.size(), empty_size);
  assert!(l.iter().first().is_none());

  l.add(b"again", 0, b"value").unwrap();
  let ent = l.iter().first().unwrap();
  assert_eq!(ent.key(), b"again");
  assert_eq!(ent.value(), b"value");
}

#[test]
fn test_capacity_excludes_sentinels() {
  let l = SkipList::new(1 << 10).unwrap();
  assert_eq!(l.remaining(), 1 << 10);
  assert!(l.capacity() > 1 << 10);
  assert_eq!(l.arena().capacity(), l.capacity());
}

#[test]
fn test_find_splice_for_level() {
  let l = SkipList::with_options(
    Options::new()
      .with_capacity(ARENA_SIZE)
      .with_max_height(1),
  )
  .unwrap();
  l.add(b"b", 1, b"").unwrap();
  l.add(b"d", 1, b"").unwrap();

  unsafe {
    let (prev, next, found) = l.find_splice_for_level(b"c", 1, 0, l.head());
    assert!(!found);
    assert_eq!(l.entry(prev).key(), b"b");
    assert_eq!(l.entry(next).key(), b"d");

    let (prev, next, found) = l.find_splice_for_level(b"d", 1, 0, l.head());
    assert!(found);
    assert_eq!(l.entry(prev).key(), b"b");
    assert_eq!(l.entry(next).key(), b"d");

    let (prev, next, found) = l.find_splice_for_level(b"a", 1, 0, l.head());
    assert!(!found);
    assert_eq!(prev, l.head());
    assert_eq!(l.entry(next).key(), b"b");

    let (prev, next, found) = l.find_splice_for_level(b"e", 1, 0, l.head());
    assert!(!found);
    assert_eq!(l.entry(prev).key(), b"d");
    assert_eq!(next, l.tail());
  }
}

#[test]
fn test_debug() {
  let l = SkipList::new(ARENA_SIZE).unwrap();
  let s = format!("{:?}", l);
  assert!(s.starts_with("SkipList"));
  assert!(format!("{:?}", l.inserter()).starts_with("Inserter"));
}
