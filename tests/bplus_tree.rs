//! Black-box coverage: drives the tree only through `crabtree::Index`,
//! never reaching into page/node internals, the way a real consumer would.

use crabtree::buffer_pool::BufferPoolConfig;
use crabtree::{BPlusTreeConfig, Index, Rid};
use rand::seq::SliceRandom;
use rand::thread_rng;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_config() -> BPlusTreeConfig {
    BPlusTreeConfig {
        leaf_max_size: 3,
        internal_max_size: 3,
        ..Default::default()
    }
}

#[test]
fn insert_search_over_many_splits() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let index = Index::open(dir.path(), small_config()).unwrap();

    for i in 0..500u64 {
        assert!(index.insert(i, Rid::new(1, i as u32), None).unwrap());
    }
    for i in 0..500u64 {
        assert_eq!(index.get(i, None).unwrap(), Some(Rid::new(1, i as u32)));
    }
    assert_eq!(index.get(500, None).unwrap(), None);
}

#[test]
fn duplicate_keys_are_rejected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let index = Index::open(dir.path(), small_config()).unwrap();

    assert!(index.insert(1, Rid::new(1, 0), None).unwrap());
    assert!(!index.insert(1, Rid::new(2, 0), None).unwrap());
    assert_eq!(index.get(1, None).unwrap(), Some(Rid::new(1, 0)));
}

#[test]
fn scan_yields_keys_in_order_after_shuffled_inserts() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let index = Index::open(dir.path(), small_config()).unwrap();

    let mut keys: Vec<u64> = (0..2000).collect();
    keys.shuffle(&mut thread_rng());
    for &k in &keys {
        index.insert(k, Rid::new(1, k as u32), None).unwrap();
    }

    let scanned: Vec<u64> = index.scan().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..2000).collect::<Vec<_>>());

    let from_1000: Vec<u64> = index.scan_from(1000).unwrap().map(|(k, _)| k).collect();
    assert_eq!(from_1000, (1000..2000).collect::<Vec<_>>());
}

#[test]
fn random_insert_and_delete_converges_to_empty() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let index = Index::open(dir.path(), small_config()).unwrap();

    let mut keys: Vec<u64> = (0..1000).collect();
    keys.shuffle(&mut thread_rng());
    for &k in &keys {
        assert!(index.insert(k, Rid::new(2, k as u32), None).unwrap());
    }

    let mut delete_order = keys.clone();
    delete_order.shuffle(&mut thread_rng());
    for (n, &k) in delete_order.iter().enumerate() {
        index.remove(k, None).unwrap();
        if n % 137 == 0 {
            for &check in delete_order.iter().skip(n + 1) {
                assert!(index.get(check, None).unwrap().is_some());
            }
        }
    }

    assert!(index.is_empty());
    for &k in &keys {
        assert_eq!(index.get(k, None).unwrap(), None);
    }
}

#[test]
fn concurrent_inserts_from_disjoint_ranges_all_land() {
    init_logging();
    use std::sync::Arc;
    use std::thread;

    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(Index::open(dir.path(), small_config()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for i in 0..200u64 {
                    let key = t * 200 + i;
                    index.insert(key, Rid::new(3, key as u32), None).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for key in 0..800u64 {
        assert_eq!(index.get(key, None).unwrap(), Some(Rid::new(3, key as u32)));
    }
}

#[test]
fn pool_of_30_frames_holds_99999_shuffled_keys_with_partial_deletion() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = BPlusTreeConfig {
        buffer_pool: BufferPoolConfig { pool_size: 30, k: 2 },
        ..Default::default()
    };
    let index = Index::open(dir.path(), config).unwrap();

    let mut keys: Vec<u64> = (1..=99_999).collect();
    keys.shuffle(&mut thread_rng());
    for &k in &keys {
        assert!(index.insert(k, Rid::new(1, k as u32), None).unwrap());
    }

    assert_eq!(index.scan().unwrap().count(), 99_999);
    for &k in &keys {
        assert!(index.get(k, None).unwrap().is_some());
    }

    for k in 1..=98_999u64 {
        index.remove(k, None).unwrap();
    }

    let remaining: Vec<u64> = index.scan_from(99_000).unwrap().map(|(k, _)| k).collect();
    assert_eq!(remaining, (99_000..=99_999).collect::<Vec<_>>());
    assert_eq!(remaining.len(), 1000);

    for k in 99_000..=99_999u64 {
        index.remove(k, None).unwrap();
    }
    assert!(index.is_empty());
}
