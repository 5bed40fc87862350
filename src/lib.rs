//! A concurrent, latch-crabbed B+tree index over a fixed-size buffer pool.
//!
//! The pieces: [`page`] defines the fixed-size page and its latch,
//! [`disk`] persists pages to a directory of per-page files, [`buffer_pool`]
//! pins pages into a bounded set of in-memory frames and evicts with
//! LRU-K, and [`index`] lays out and navigates the tree itself. [`Index`]
//! wires all four into one handle.

pub mod buffer_pool;
pub mod config;
pub mod disk;
pub mod error;
pub mod index;
pub mod latch;
pub mod page;
pub mod txn;

use std::path::Path;
use std::sync::Arc;

pub use config::BPlusTreeConfig;
pub use index::btree::BPlusTree;
pub use index::comparator::{AscendingComparator, KeyComparator};
pub use index::iterator::BPlusTreeIterator;
pub use index::node::Rid;
pub use index::Key;
pub use txn::Txn;

/// Traces a hot-path step at `trace` level without the caller needing to
/// format a string when logging is compiled out at a higher level.
#[macro_export]
macro_rules! printdbg {
    ($($arg:tt)*) => {
        log::trace!($($arg)*)
    };
}

/// The top-level handle: a buffer pool and a tree sharing it. Returns
/// `anyhow::Result` at this boundary so callers don't need to depend on
/// [`error::Error`] directly; internals still propagate the concrete enum.
pub struct Index {
    tree: BPlusTree,
}

impl Index {
    pub fn open(dir: impl AsRef<Path>, config: BPlusTreeConfig) -> anyhow::Result<Self> {
        let bpm = Arc::new(buffer_pool::BufferPoolManager::new(dir, config.buffer_pool)?);
        let tree = BPlusTree::new(
            bpm,
            Arc::new(AscendingComparator),
            config.leaf_max_size,
            config.internal_max_size,
        )?;
        Ok(Self { tree })
    }

    pub fn open_with_comparator(
        dir: impl AsRef<Path>,
        config: BPlusTreeConfig,
        comparator: Arc<dyn KeyComparator>,
    ) -> anyhow::Result<Self> {
        let bpm = Arc::new(buffer_pool::BufferPoolManager::new(dir, config.buffer_pool)?);
        let tree = BPlusTree::new(bpm, comparator, config.leaf_max_size, config.internal_max_size)?;
        Ok(Self { tree })
    }

    pub fn insert(&self, key: Key, rid: Rid, txn: Option<&mut Txn>) -> anyhow::Result<bool> {
        Ok(self.tree.insert(key, rid, txn)?)
    }

    pub fn remove(&self, key: Key, txn: Option<&mut Txn>) -> anyhow::Result<()> {
        Ok(self.tree.remove(key, txn)?)
    }

    pub fn get(&self, key: Key, txn: Option<&mut Txn>) -> anyhow::Result<Option<Rid>> {
        Ok(self.tree.get_value(key, txn)?)
    }

    pub fn scan(&self) -> anyhow::Result<BPlusTreeIterator> {
        Ok(self.tree.iter()?)
    }

    pub fn scan_from(&self, key: Key) -> anyhow::Result<BPlusTreeIterator> {
        Ok(self.tree.iter_from(key)?)
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_insert_get_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = BPlusTreeConfig {
            leaf_max_size: 4,
            internal_max_size: 4,
            ..Default::default()
        };
        let index = Index::open(dir.path(), config).unwrap();

        assert!(index.is_empty());
        for i in 0..20u64 {
            assert!(index.insert(i, Rid::new(1, i as u32), None).unwrap());
        }
        assert!(!index.insert(5, Rid::new(2, 0), None).unwrap());
        assert_eq!(index.get(5, None).unwrap(), Some(Rid::new(1, 5)));

        let all: Vec<_> = index.scan().unwrap().map(|(k, _)| k).collect();
        assert_eq!(all, (0..20).collect::<Vec<_>>());

        for i in 0..20u64 {
            index.remove(i, None).unwrap();
        }
        assert!(index.is_empty());
    }
}
