//! Forward iteration over the leaf chain.
//!
//! Grounded on the teacher crate's `indexes::b_plus_tree::btree_iterator`,
//! but deliberately weaker about concurrency: no latch is held between
//! `next()` calls. Each step fetches and read-latches its current leaf only
//! for the instant it takes to copy out one entry (or hop to the next leaf
//! via `next_leaf_page_id`), then unpins. A concurrent insert or delete
//! elsewhere in the tree can therefore interleave with a live iterator; the
//! only guarantee is that every key present for the iterator's entire
//! lifetime, and never removed during it, is eventually yielded once.

use crate::buffer_pool::BufferPoolManager;
use crate::index::node::{LeafNode, Rid};
use crate::index::Key;
use crate::latch::{LatchGuard, LatchMode};
use crate::page::{PageId, INVALID_PAGE_ID};
use std::sync::Arc;

pub struct BPlusTreeIterator {
    bpm: Arc<BufferPoolManager>,
    current_leaf: PageId,
    index: usize,
}

impl BPlusTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, current_leaf: PageId, index: usize) -> Self {
        Self {
            bpm,
            current_leaf,
            index,
        }
    }
}

impl Iterator for BPlusTreeIterator {
    type Item = (Key, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_leaf == INVALID_PAGE_ID {
                return None;
            }

            let handle = self.bpm.fetch(self.current_leaf).ok()?;
            let guard = LatchGuard::acquire(handle.latch(), LatchMode::Read);
            let leaf = LeafNode::from_bytes(unsafe { handle.data_mut() });
            let entries = leaf.entries();

            if self.index < entries.len() {
                let item = entries[self.index];
                self.index += 1;
                drop(guard);
                let _ = self.bpm.unpin(self.current_leaf, false);
                return Some(item);
            }

            let next_id = leaf.next_leaf_page_id();
            drop(guard);
            let _ = self.bpm.unpin(self.current_leaf, false);
            self.current_leaf = next_id;
            self.index = 0;
        }
    }
}
