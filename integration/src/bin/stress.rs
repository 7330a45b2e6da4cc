use arena_skl::*;
use integration::{big_value, key, new_value};
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

fn main() {
  {
    const N: usize = 1000;
    let l = Arc::new(SkipList::new(1 << 20).unwrap());
    for i in 0..N {
      let l = l.clone();
      std::thread::spawn(move || {
        l.add(&key(i), 0, &new_value(i)).unwrap();
        drop(l);
      });
    }
    while Arc::strong_count(&l) > 1 {}
    for i in 0..N {
      let l = l.clone();
      std::thread::spawn(move || {
        let k = key(i);
        let ent = l.iter().seek_ge(&k, SeekGeFlags::empty()).unwrap();
        assert_eq!(ent.key(), k, "broken: {i}");
        assert_eq!(ent.value(), new_value(i), "broken: {i}");
        drop(l);
      });
    }
    while Arc::strong_count(&l) > 1 {}
    assert_eq!(N, l.len());
  }

  {
    const N2: usize = 100;
    let l = Arc::new(SkipList::new(120 << 20).unwrap());
    for i in 0..N2 {
      let l = l.clone();
      std::thread::spawn(move || {
        l.add(&key(i), 0, &big_value(i)).unwrap();
      });
    }
    while Arc::strong_count(&l) > 1 {}
    assert_eq!(N2, l.len());
    for i in 0..N2 {
      let l = l.clone();
      std::thread::spawn(move || {
        let k = key(i);
        let ent = l.iter().seek_ge(&k, SeekGeFlags::empty()).unwrap();
        assert_eq!(ent.value(), big_value(i), "broken: {i}");
      });
    }
    while Arc::strong_count(&l) > 1 {}
  }

  {
    // Writers fill the memtable until it is full, readers scan it meanwhile.
    const WRITERS: usize = 8;
    const READERS: usize = 4;
    let l = Arc::new(SkipList::new(4 << 20).unwrap());
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
      .map(|_| {
        let l = l.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
          while !stop.load(Ordering::Acquire) {
            let mut it = l.iter();
            let mut prev: Option<Vec<u8>> = None;
            let mut ent = it.first();
            while let Some(e) = ent {
              if let Some(p) = &prev {
                assert!(p.as_slice() < e.key());
              }
              prev = Some(e.key().to_vec());
              ent = it.next();
            }
          }
        })
      })
      .collect();

    let writers: Vec<_> = (0..WRITERS)
      .map(|w| {
        let l = l.clone();
        std::thread::spawn(move || {
          let mut ins = l.inserter();
          let mut i = w;
          loop {
            match ins.add(&(i as u64).to_be_bytes(), 0, &new_value(i)) {
              Ok(()) => i += WRITERS,
              Err(e) if e.is_full() => break,
              Err(e) => panic!("{e}"),
            }
          }
        })
      })
      .collect();

    for w in writers {
      w.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    for r in readers {
      r.join().unwrap();
    }

    let n = l.flush_iter().count();
    assert_eq!(n, l.len());
    println!(
      "sealed memtable: {} entries, {} bytes, height {}",
      n,
      l.size(),
      l.height()
    );
  }
}
