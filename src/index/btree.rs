//! The concurrent B+tree itself.
//!
//! Grounded on the teacher crate's `indexes::b_plus_tree::BPlusTree`
//! (recursive search/insert/split) for the overall shape, generalized with
//! latch crabbing modeled on `src/latch/mod.rs`'s manual lock/unlock
//! discipline. Underflow handling (redistribute when the two siblings'
//! combined size can't still cover two full nodes, merge otherwise,
//! preferring the right sibling) follows the node-level `min_size`/`max_size`
//! accounting in [`crate::index::node`] rather than the reference C++ source
//! this crate's specification was distilled from
//! (`storage/index/b_plus_tree.cpp`), which has no merge/redistribution logic
//! on delete at all.

use crate::buffer_pool::{BufferPoolManager, FrameHandle};
use crate::error::{Error, Result};
use crate::index::comparator::KeyComparator;
use crate::index::node::{self, InternalNode, LeafNode, PageType, Rid};
use crate::index::Key;
use crate::latch::{LatchGuard, LatchMode};
use crate::page::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::txn::Txn;
use parking_lot::Mutex;
use std::sync::Arc;

/// A held write latch plus the frame it guards, kept on a stack while
/// crabbing down so an ancestor can still be rewritten if a split or merge
/// below it propagates up.
type Held = (FrameHandle, LatchGuard);

pub struct BPlusTree {
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// `HEADER_PAGE_ID` (page 0 itself is never allocated to tree content)
    /// stands for "tree is empty, no root page yet".
    root_page_id: Mutex<PageId>,
}

impl BPlusTree {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let handle = bpm.fetch(HEADER_PAGE_ID)?;
        let root_page_id = i32::from_le_bytes(unsafe { handle.data()[0..4].try_into().unwrap() });
        bpm.unpin(HEADER_PAGE_ID, false)?;

        Ok(Self {
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: Mutex::new(root_page_id),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == HEADER_PAGE_ID
    }

    /// A forward iterator over the whole tree, starting at the leftmost key.
    pub fn iter(&self) -> Result<crate::index::iterator::BPlusTreeIterator> {
        if self.is_empty() {
            return Ok(crate::index::iterator::BPlusTreeIterator::new(
                self.bpm.clone(),
                INVALID_PAGE_ID,
                0,
            ));
        }
        let leaf_id = self.leftmost_leaf()?;
        Ok(crate::index::iterator::BPlusTreeIterator::new(self.bpm.clone(), leaf_id, 0))
    }

    /// A forward iterator starting at the first key >= `key`.
    pub fn iter_from(&self, key: Key) -> Result<crate::index::iterator::BPlusTreeIterator> {
        if self.is_empty() {
            return Ok(crate::index::iterator::BPlusTreeIterator::new(
                self.bpm.clone(),
                INVALID_PAGE_ID,
                0,
            ));
        }
        let (leaf_id, index) = self.find_leaf_position(key)?;
        Ok(crate::index::iterator::BPlusTreeIterator::new(self.bpm.clone(), leaf_id, index))
    }

    fn leftmost_leaf(&self) -> Result<PageId> {
        let mut current = *self.root_page_id.lock();
        loop {
            let handle = self.bpm.fetch(current)?;
            let guard = LatchGuard::acquire(handle.latch(), LatchMode::Read);
            let pt = unsafe { node::page_type(handle.data()) };
            match pt {
                PageType::Leaf => {
                    drop(guard);
                    self.bpm.unpin(current, false)?;
                    return Ok(current);
                }
                PageType::Internal => {
                    let child = InternalNode::from_bytes(unsafe { handle.data_mut() }).child_at(0);
                    drop(guard);
                    self.bpm.unpin(current, false)?;
                    current = child;
                }
                PageType::Invalid => {
                    return Err(Error::Corruption(format!("page {current} has no node header")))
                }
            }
        }
    }

    fn find_leaf_position(&self, key: Key) -> Result<(PageId, usize)> {
        let mut current = *self.root_page_id.lock();
        loop {
            let handle = self.bpm.fetch(current)?;
            let guard = LatchGuard::acquire(handle.latch(), LatchMode::Read);
            let pt = unsafe { node::page_type(handle.data()) };
            match pt {
                PageType::Leaf => {
                    let leaf = LeafNode::from_bytes(unsafe { handle.data_mut() });
                    let idx = leaf.lower_bound(key, self.comparator.as_ref());
                    drop(guard);
                    self.bpm.unpin(current, false)?;
                    return Ok((current, idx));
                }
                PageType::Internal => {
                    let child = {
                        let internal = InternalNode::from_bytes(unsafe { handle.data_mut() });
                        let idx = internal.find_child_index(key, self.comparator.as_ref());
                        internal.child_at(idx)
                    };
                    drop(guard);
                    self.bpm.unpin(current, false)?;
                    current = child;
                }
                PageType::Invalid => {
                    return Err(Error::Corruption(format!("page {current} has no node header")))
                }
            }
        }
    }

    fn persist_root(&self, root_page_id: PageId) -> Result<()> {
        let handle = self.bpm.fetch(HEADER_PAGE_ID)?;
        let guard = LatchGuard::acquire(handle.latch(), LatchMode::Write);
        unsafe {
            handle.data_mut()[0..4].copy_from_slice(&root_page_id.to_le_bytes());
        }
        drop(guard);
        self.bpm.unpin(HEADER_PAGE_ID, true)
    }

    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let handle = self.bpm.fetch(page_id)?;
        let guard = LatchGuard::acquire(handle.latch(), LatchMode::Write);
        match unsafe { node::page_type(handle.data()) } {
            PageType::Leaf => {
                LeafNode::from_bytes(unsafe { handle.data_mut() }).set_parent_page_id(parent_id)
            }
            PageType::Internal => {
                InternalNode::from_bytes(unsafe { handle.data_mut() }).set_parent_page_id(parent_id)
            }
            PageType::Invalid => {
                return Err(Error::Corruption(format!("page {page_id} has no node header")))
            }
        }
        drop(guard);
        self.bpm.unpin(page_id, true)
    }

    // ---- search -----------------------------------------------------

    /// `txn` is accepted for API symmetry with `insert`/`remove` but unused:
    /// the read path takes a single latch at a time and never needs a
    /// pending-latch stack to thread through it.
    pub fn get_value(&self, key: Key, _txn: Option<&mut Txn>) -> Result<Option<Rid>> {
        if self.is_empty() {
            return Ok(None);
        }

        let root_id = *self.root_page_id.lock();
        let mut handle = self.bpm.fetch(root_id)?;
        let mut guard = LatchGuard::acquire(handle.latch(), LatchMode::Read);

        loop {
            let pt = unsafe { node::page_type(handle.data()) };
            match pt {
                PageType::Leaf => {
                    let leaf = LeafNode::from_bytes(unsafe { handle.data_mut() });
                    let result = leaf.find(key, self.comparator.as_ref());
                    drop(guard);
                    self.bpm.unpin(handle.page_id(), false)?;
                    return Ok(result);
                }
                PageType::Internal => {
                    let child_id = {
                        let node = InternalNode::from_bytes(unsafe { handle.data_mut() });
                        let idx = node.find_child_index(key, self.comparator.as_ref());
                        node.child_at(idx)
                    };
                    let child_handle = self.bpm.fetch(child_id)?;
                    let child_guard = LatchGuard::acquire(child_handle.latch(), LatchMode::Read);
                    drop(guard);
                    self.bpm.unpin(handle.page_id(), false)?;
                    handle = child_handle;
                    guard = child_guard;
                }
                PageType::Invalid => {
                    return Err(Error::Corruption(format!("page {} has no node header", handle.page_id())).into())
                }
            }
        }
    }

    // ---- insert -------------------------------------------------------

    pub fn insert(&self, key: Key, rid: Rid, mut txn: Option<&mut Txn>) -> Result<bool> {
        {
            let mut root_lock = self.root_page_id.lock();
            if *root_lock == HEADER_PAGE_ID {
                let handle = self.bpm.new_page()?;
                {
                    let mut leaf = LeafNode::from_bytes(unsafe { handle.data_mut() });
                    leaf.init(self.leaf_max_size, INVALID_PAGE_ID);
                    leaf.set_entries(&[(key, rid)]);
                }
                *root_lock = handle.page_id();
                drop(root_lock);
                self.persist_root(handle.page_id())?;
                self.bpm.unpin(handle.page_id(), true)?;
                return Ok(true);
            }
        }

        let (leaf_handle, leaf_guard, mut ancestors) =
            self.descend_write(key, |size, _min, max| size + 1 < max)?;
        if let Some(t) = txn.as_mut() {
            t.set_latches_held(ancestors.len() + 1);
        }

        let mut entries = {
            let leaf = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() });
            leaf.entries()
        };
        let idx = entries
            .iter()
            .position(|&(k, _)| !self.comparator.lt(k, key))
            .unwrap_or(entries.len());

        if idx < entries.len() && self.comparator.eq(entries[idx].0, key) {
            drop(leaf_guard);
            self.bpm.unpin(leaf_handle.page_id(), false)?;
            self.release_ancestors(ancestors)?;
            if let Some(t) = txn.as_mut() {
                t.set_latches_held(0);
            }
            return Ok(false);
        }
        entries.insert(idx, (key, rid));

        if entries.len() < self.leaf_max_size {
            LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&entries);
            drop(leaf_guard);
            self.bpm.unpin(leaf_handle.page_id(), true)?;
            self.release_ancestors(ancestors)?;
            if let Some(t) = txn.as_mut() {
                t.set_latches_held(0);
            }
            return Ok(true);
        }

        // Overfull: split. The new right sibling gets the upper half; its
        // first key becomes the separator pushed into the parent.
        let mid = entries.len().div_ceil(2);
        let (left, right) = entries.split_at(mid);
        let (parent_id, old_next) = {
            let leaf = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() });
            (leaf.parent_page_id(), leaf.next_leaf_page_id())
        };
        LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(left);

        let new_leaf_handle = self.bpm.new_page()?;
        {
            let mut new_leaf = LeafNode::from_bytes(unsafe { new_leaf_handle.data_mut() });
            new_leaf.init(self.leaf_max_size, parent_id);
            new_leaf.set_entries(right);
            new_leaf.set_next_leaf_page_id(old_next);
        }
        LeafNode::from_bytes(unsafe { leaf_handle.data_mut() })
            .set_next_leaf_page_id(new_leaf_handle.page_id());

        let sep_key = right[0].0;
        let left_id = leaf_handle.page_id();
        let right_id = new_leaf_handle.page_id();
        crate::printdbg!("split leaf {left_id} -> {left_id}, {right_id} at key {sep_key}");
        drop(leaf_guard);
        self.bpm.unpin(left_id, true)?;
        self.bpm.unpin(right_id, true)?;

        self.insert_into_parent(left_id, sep_key, right_id, &mut ancestors)?;
        if let Some(t) = txn.as_mut() {
            t.set_latches_held(0);
        }
        Ok(true)
    }

    fn release_ancestors(&self, ancestors: Vec<Held>) -> Result<()> {
        for (h, g) in ancestors {
            drop(g);
            self.bpm.unpin(h.page_id(), false)?;
        }
        Ok(())
    }

    /// Crabs down from the root acquiring write latches, pruning ancestors
    /// from the held stack whenever `is_safe(size, max_size)` says the
    /// current node cannot possibly need rewriting once its child's
    /// operation completes. Returns the leaf (handle, guard) plus whatever
    /// ancestors remain held.
    fn descend_write(
        &self,
        key: Key,
        is_safe: impl Fn(usize, usize, usize) -> bool,
    ) -> Result<(FrameHandle, LatchGuard, Vec<Held>)> {
        let root_lock = self.root_page_id.lock();
        let root_id = *root_lock;
        let handle = self.bpm.fetch(root_id)?;
        let guard = LatchGuard::acquire(handle.latch(), LatchMode::Write);
        drop(root_lock);

        let mut stack: Vec<Held> = vec![(handle, guard)];

        loop {
            let pt = {
                let (h, _) = stack.last().unwrap();
                unsafe { node::page_type(h.data()) }
            };

            if pt == PageType::Leaf {
                let safe = {
                    let (h, _) = stack.last().unwrap();
                    let leaf = LeafNode::from_bytes(unsafe { h.data_mut() });
                    is_safe(leaf.size(), leaf.min_size(), leaf.max_size())
                };
                if safe {
                    self.prune_to_last(&mut stack)?;
                }
                let (h, g) = stack.pop().unwrap();
                return Ok((h, g, stack));
            }

            let (child_id, safe) = {
                let (h, _) = stack.last().unwrap();
                let internal = InternalNode::from_bytes(unsafe { h.data_mut() });
                let idx = internal.find_child_index(key, self.comparator.as_ref());
                (
                    internal.child_at(idx),
                    is_safe(internal.size(), internal.min_size(), internal.max_size()),
                )
            };

            if safe {
                self.prune_to_last(&mut stack)?;
            }

            let child_handle = self.bpm.fetch(child_id)?;
            let child_guard = LatchGuard::acquire(child_handle.latch(), LatchMode::Write);
            stack.push((child_handle, child_guard));
        }
    }

    fn prune_to_last(&self, stack: &mut Vec<Held>) -> Result<()> {
        while stack.len() > 1 {
            let (h, g) = stack.remove(0);
            drop(g);
            self.bpm.unpin(h.page_id(), false)?;
        }
        Ok(())
    }

    /// Propagates a split upward: inserts `(sep_key, right_id)` into the
    /// parent of `left_id`, splitting that parent in turn if it overflows,
    /// walking `ancestors` until either an insertion fits or the chain is
    /// exhausted (growing a new root).
    fn insert_into_parent(
        &self,
        mut left_id: PageId,
        mut sep_key: Key,
        mut right_id: PageId,
        ancestors: &mut Vec<Held>,
    ) -> Result<()> {
        loop {
            match ancestors.pop() {
                None => {
                    let new_root = self.bpm.new_page()?;
                    {
                        let mut node = InternalNode::from_bytes(unsafe { new_root.data_mut() });
                        node.init(self.internal_max_size, INVALID_PAGE_ID);
                        node.set_entries(&[sep_key], &[left_id, right_id]);
                    }
                    self.set_parent(left_id, new_root.page_id())?;
                    self.set_parent(right_id, new_root.page_id())?;
                    {
                        let mut root_lock = self.root_page_id.lock();
                        *root_lock = new_root.page_id();
                    }
                    self.persist_root(new_root.page_id())?;
                    self.bpm.unpin(new_root.page_id(), true)?;
                    return Ok(());
                }
                Some((parent_handle, parent_guard)) => {
                    let (mut keys, mut children, grandparent_id) = {
                        let parent = InternalNode::from_bytes(unsafe { parent_handle.data_mut() });
                        (parent.keys(), parent.children(), parent.parent_page_id())
                    };
                    let pos = children
                        .iter()
                        .position(|&c| c == left_id)
                        .expect("left child of a fresh split must already be a child of its parent");
                    keys.insert(pos, sep_key);
                    children.insert(pos + 1, right_id);

                    if children.len() < self.internal_max_size {
                        InternalNode::from_bytes(unsafe { parent_handle.data_mut() })
                            .set_entries(&keys, &children);
                        drop(parent_guard);
                        self.bpm.unpin(parent_handle.page_id(), true)?;
                        self.release_ancestors(std::mem::take(ancestors))?;
                        return Ok(());
                    }

                    let mid = children.len() / 2;
                    let push_up_key = keys[mid - 1];
                    let (left_keys, right_keys_with_pushed) = keys.split_at(mid - 1);
                    let right_keys = &right_keys_with_pushed[1..];
                    let (left_children, right_children) = children.split_at(mid);

                    InternalNode::from_bytes(unsafe { parent_handle.data_mut() })
                        .set_entries(left_keys, left_children);
                    let parent_id = parent_handle.page_id();
                    drop(parent_guard);

                    let new_internal = self.bpm.new_page()?;
                    {
                        let mut node = InternalNode::from_bytes(unsafe { new_internal.data_mut() });
                        node.init(self.internal_max_size, grandparent_id);
                        node.set_entries(right_keys, right_children);
                    }
                    for &c in right_children {
                        self.set_parent(c, new_internal.page_id())?;
                    }

                    self.bpm.unpin(parent_id, true)?;
                    self.bpm.unpin(new_internal.page_id(), true)?;

                    left_id = parent_id;
                    right_id = new_internal.page_id();
                    sep_key = push_up_key;
                }
            }
        }
    }

    // ---- delete ---------------------------------------------------------

    pub fn remove(&self, key: Key, mut txn: Option<&mut Txn>) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let (leaf_handle, leaf_guard, mut ancestors) =
            self.descend_write(key, |size, min, _max| size > min)?;
        if let Some(t) = txn.as_mut() {
            t.set_latches_held(ancestors.len() + 1);
        }

        let mut entries = {
            let leaf = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() });
            leaf.entries()
        };
        let Some(pos) = entries.iter().position(|&(k, _)| self.comparator.eq(k, key)) else {
            drop(leaf_guard);
            self.bpm.unpin(leaf_handle.page_id(), false)?;
            self.release_ancestors(ancestors)?;
            if let Some(t) = txn.as_mut() {
                t.set_latches_held(0);
            }
            return Ok(());
        };
        entries.remove(pos);

        let is_root = ancestors.is_empty();
        let min_size = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).min_size();

        if is_root {
            if entries.is_empty() {
                let page_id = leaf_handle.page_id();
                drop(leaf_guard);
                self.bpm.unpin(page_id, true)?;
                self.bpm.delete_page(page_id)?;
                *self.root_page_id.lock() = HEADER_PAGE_ID;
                self.persist_root(HEADER_PAGE_ID)?;
            } else {
                LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&entries);
                drop(leaf_guard);
                self.bpm.unpin(leaf_handle.page_id(), true)?;
            }
            if let Some(t) = txn.as_mut() {
                t.set_latches_held(0);
            }
            return Ok(());
        }

        if entries.len() >= min_size {
            LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&entries);
            drop(leaf_guard);
            self.bpm.unpin(leaf_handle.page_id(), true)?;
            self.release_ancestors(ancestors)?;
            if let Some(t) = txn.as_mut() {
                t.set_latches_held(0);
            }
            return Ok(());
        }

        LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&entries);
        self.fix_leaf_underflow(leaf_handle, leaf_guard, &mut ancestors)?;
        if let Some(t) = txn.as_mut() {
            t.set_latches_held(0);
        }
        Ok(())
    }

    fn fix_leaf_underflow(
        &self,
        leaf_handle: FrameHandle,
        leaf_guard: LatchGuard,
        ancestors: &mut Vec<Held>,
    ) -> Result<()> {
        let (parent_handle, parent_guard) = ancestors.pop().expect("non-root leaf has a parent");
        let parent = InternalNode::from_bytes(unsafe { parent_handle.data_mut() });
        let children = parent.children();
        let my_index = children
            .iter()
            .position(|&c| c == leaf_handle.page_id())
            .expect("leaf must be a child of its parent");

        let max_size = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).max_size();
        let my_size = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).size();

        // Prefer the right sibling if this leaf isn't the parent's last
        // child; otherwise fall back to the left one.
        if my_index + 1 < children.len() {
            let right_id = children[my_index + 1];
            let right_handle = self.bpm.fetch(right_id)?;
            let right_guard = LatchGuard::acquire(right_handle.latch(), LatchMode::Write);
            let right_size = LeafNode::from_bytes(unsafe { right_handle.data_mut() }).size();

            if my_size + right_size >= max_size {
                let mut right_entries = LeafNode::from_bytes(unsafe { right_handle.data_mut() }).entries();
                let borrowed = right_entries.remove(0);
                LeafNode::from_bytes(unsafe { right_handle.data_mut() }).set_entries(&right_entries);

                let mut my_entries = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).entries();
                my_entries.push(borrowed);
                LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&my_entries);

                self.update_separator(&parent_handle, my_index, right_entries[0].0)?;

                drop((right_guard, leaf_guard));
                self.bpm.unpin(right_id, true)?;
                self.bpm.unpin(leaf_handle.page_id(), true)?;
                drop(parent_guard);
                self.bpm.unpin(parent_handle.page_id(), false)?;
                self.release_ancestors(std::mem::take(ancestors))?;
                return Ok(());
            }

            // Merge the right sibling into this leaf.
            let mut my_entries = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).entries();
            let right_entries = LeafNode::from_bytes(unsafe { right_handle.data_mut() }).entries();
            my_entries.extend(right_entries);
            let right_next = LeafNode::from_bytes(unsafe { right_handle.data_mut() }).next_leaf_page_id();
            LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&my_entries);
            LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_next_leaf_page_id(right_next);

            let dead_id = right_handle.page_id();
            drop(right_guard);
            self.bpm.unpin(dead_id, true)?;
            self.bpm.delete_page(dead_id)?;
            drop(leaf_guard);
            self.bpm.unpin(leaf_handle.page_id(), true)?;

            return self.remove_child_from_parent(parent_handle, parent_guard, my_index + 1, ancestors);
        }

        let left_id = children[my_index - 1];
        let left_handle = self.bpm.fetch(left_id)?;
        let left_guard = LatchGuard::acquire(left_handle.latch(), LatchMode::Write);
        let left_size = LeafNode::from_bytes(unsafe { left_handle.data_mut() }).size();

        if my_size + left_size >= max_size {
            let mut left_entries = LeafNode::from_bytes(unsafe { left_handle.data_mut() }).entries();
            let borrowed = left_entries.pop().unwrap();
            LeafNode::from_bytes(unsafe { left_handle.data_mut() }).set_entries(&left_entries);

            let mut my_entries = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).entries();
            my_entries.insert(0, borrowed);
            LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).set_entries(&my_entries);

            self.update_separator(&parent_handle, my_index - 1, my_entries[0].0)?;

            drop((left_guard, leaf_guard));
            self.bpm.unpin(left_id, true)?;
            self.bpm.unpin(leaf_handle.page_id(), true)?;
            drop(parent_guard);
            self.bpm.unpin(parent_handle.page_id(), false)?;
            self.release_ancestors(std::mem::take(ancestors))?;
            return Ok(());
        }

        // Merge this leaf into the left sibling.
        let mut left_entries = LeafNode::from_bytes(unsafe { left_handle.data_mut() }).entries();
        let my_entries = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).entries();
        left_entries.extend(my_entries);
        let my_next = LeafNode::from_bytes(unsafe { leaf_handle.data_mut() }).next_leaf_page_id();
        LeafNode::from_bytes(unsafe { left_handle.data_mut() }).set_entries(&left_entries);
        LeafNode::from_bytes(unsafe { left_handle.data_mut() }).set_next_leaf_page_id(my_next);

        let dead_id = leaf_handle.page_id();
        drop(leaf_guard);
        self.bpm.unpin(dead_id, true)?;
        self.bpm.delete_page(dead_id)?;
        drop(left_guard);
        self.bpm.unpin(left_id, true)?;

        self.remove_child_from_parent(parent_handle, parent_guard, my_index, ancestors)
    }

    /// Rewrites the separator key at `index` in an already write-latched
    /// parent, without releasing it.
    fn update_separator(&self, parent_handle: &FrameHandle, index: usize, new_key: Key) -> Result<()> {
        let mut parent = InternalNode::from_bytes(unsafe { parent_handle.data_mut() });
        let children = parent.children();
        let mut keys = parent.keys();
        keys[index] = new_key;
        parent.set_entries(&keys, &children);
        Ok(())
    }

    /// Removes the child at `child_index` (and the separator key to its
    /// left) from an already write-latched parent, handling the parent's
    /// own underflow if that drops it below its minimum, continuing up
    /// `ancestors`.
    fn remove_child_from_parent(
        &self,
        parent_handle: FrameHandle,
        parent_guard: LatchGuard,
        child_index: usize,
        ancestors: &mut Vec<Held>,
    ) -> Result<()> {
        let (mut keys, mut children) = {
            let parent = InternalNode::from_bytes(unsafe { parent_handle.data_mut() });
            (parent.keys(), parent.children())
        };
        children.remove(child_index);
        // The separator bordering the removed child: to its left, unless it
        // was the leftmost child, in which case it's the only separator it
        // had (key 0, which bordered it and its former right neighbor).
        let key_index = child_index.saturating_sub(1);
        keys.remove(key_index);

        let is_root = ancestors.is_empty();
        let min_size = InternalNode::from_bytes(unsafe { parent_handle.data_mut() }).min_size();

        if is_root {
            if children.len() == 1 {
                let only_child = children[0];
                drop(parent_guard);
                let dead_id = parent_handle.page_id();
                self.bpm.unpin(dead_id, true)?;
                self.bpm.delete_page(dead_id)?;
                self.set_parent(only_child, INVALID_PAGE_ID)?;
                *self.root_page_id.lock() = only_child;
                self.persist_root(only_child)?;
            } else {
                InternalNode::from_bytes(unsafe { parent_handle.data_mut() }).set_entries(&keys, &children);
                drop(parent_guard);
                self.bpm.unpin(parent_handle.page_id(), true)?;
            }
            return Ok(());
        }

        if children.len() >= min_size {
            InternalNode::from_bytes(unsafe { parent_handle.data_mut() }).set_entries(&keys, &children);
            drop(parent_guard);
            self.bpm.unpin(parent_handle.page_id(), true)?;
            self.release_ancestors(std::mem::take(ancestors))?;
            return Ok(());
        }

        InternalNode::from_bytes(unsafe { parent_handle.data_mut() }).set_entries(&keys, &children);
        self.fix_internal_underflow(parent_handle, parent_guard, ancestors)
    }

    fn fix_internal_underflow(
        &self,
        node_handle: FrameHandle,
        node_guard: LatchGuard,
        ancestors: &mut Vec<Held>,
    ) -> Result<()> {
        let (grandparent_handle, grandparent_guard) =
            ancestors.pop().expect("non-root internal node has a parent");
        let grandparent = InternalNode::from_bytes(unsafe { grandparent_handle.data_mut() });
        let children = grandparent.children();
        let my_index = children
            .iter()
            .position(|&c| c == node_handle.page_id())
            .expect("node must be a child of its parent");

        let max_size = InternalNode::from_bytes(unsafe { node_handle.data_mut() }).max_size();
        let my_size = InternalNode::from_bytes(unsafe { node_handle.data_mut() }).size();

        // Prefer the right sibling if this node isn't the parent's last
        // child; otherwise fall back to the left one.
        if my_index + 1 < children.len() {
            let right_id = children[my_index + 1];
            let right_handle = self.bpm.fetch(right_id)?;
            let right_guard = LatchGuard::acquire(right_handle.latch(), LatchMode::Write);
            let right_size = InternalNode::from_bytes(unsafe { right_handle.data_mut() }).size();
            let separator = grandparent.keys()[my_index];

            if my_size + right_size >= max_size {
                let (mut right_keys, mut right_children) = {
                    let right = InternalNode::from_bytes(unsafe { right_handle.data_mut() });
                    (right.keys(), right.children())
                };
                let borrowed_child = right_children.remove(0);
                let pushed_up_key = right_keys.remove(0);
                InternalNode::from_bytes(unsafe { right_handle.data_mut() })
                    .set_entries(&right_keys, &right_children);

                let (mut my_keys, mut my_children) = {
                    let me = InternalNode::from_bytes(unsafe { node_handle.data_mut() });
                    (me.keys(), me.children())
                };
                my_keys.push(separator);
                my_children.push(borrowed_child);
                InternalNode::from_bytes(unsafe { node_handle.data_mut() }).set_entries(&my_keys, &my_children);
                self.set_parent(borrowed_child, node_handle.page_id())?;

                self.update_separator(&grandparent_handle, my_index, pushed_up_key)?;

                drop((right_guard, node_guard));
                self.bpm.unpin(right_id, true)?;
                self.bpm.unpin(node_handle.page_id(), true)?;
                drop(grandparent_guard);
                self.bpm.unpin(grandparent_handle.page_id(), false)?;
                self.release_ancestors(std::mem::take(ancestors))?;
                return Ok(());
            }

            // Merge the right sibling into this node, pulling the separator
            // down between them.
            let (mut my_keys, mut my_children) = {
                let me = InternalNode::from_bytes(unsafe { node_handle.data_mut() });
                (me.keys(), me.children())
            };
            let (right_keys, right_children) = {
                let right = InternalNode::from_bytes(unsafe { right_handle.data_mut() });
                (right.keys(), right.children())
            };
            my_keys.push(separator);
            my_keys.extend(right_keys);
            my_children.extend(right_children.clone());
            InternalNode::from_bytes(unsafe { node_handle.data_mut() }).set_entries(&my_keys, &my_children);
            for &c in &right_children {
                self.set_parent(c, node_handle.page_id())?;
            }

            let dead_id = right_handle.page_id();
            drop(right_guard);
            self.bpm.unpin(dead_id, true)?;
            self.bpm.delete_page(dead_id)?;
            drop(node_guard);
            self.bpm.unpin(node_handle.page_id(), true)?;

            return self.remove_child_from_parent(grandparent_handle, grandparent_guard, my_index + 1, ancestors);
        }

        let left_id = children[my_index - 1];
        let left_handle = self.bpm.fetch(left_id)?;
        let left_guard = LatchGuard::acquire(left_handle.latch(), LatchMode::Write);
        let left_size = InternalNode::from_bytes(unsafe { left_handle.data_mut() }).size();
        let separator = grandparent.keys()[my_index - 1];

        if my_size + left_size >= max_size {
            let (mut left_keys, mut left_children) = {
                let left = InternalNode::from_bytes(unsafe { left_handle.data_mut() });
                (left.keys(), left.children())
            };
            let borrowed_child = left_children.pop().unwrap();
            let pushed_up_key = left_keys.pop().unwrap();
            InternalNode::from_bytes(unsafe { left_handle.data_mut() })
                .set_entries(&left_keys, &left_children);

            let (mut my_keys, mut my_children) = {
                let me = InternalNode::from_bytes(unsafe { node_handle.data_mut() });
                (me.keys(), me.children())
            };
            my_keys.insert(0, separator);
            my_children.insert(0, borrowed_child);
            InternalNode::from_bytes(unsafe { node_handle.data_mut() }).set_entries(&my_keys, &my_children);
            self.set_parent(borrowed_child, node_handle.page_id())?;

            self.update_separator(&grandparent_handle, my_index - 1, pushed_up_key)?;

            drop((left_guard, node_guard));
            self.bpm.unpin(left_id, true)?;
            self.bpm.unpin(node_handle.page_id(), true)?;
            drop(grandparent_guard);
            self.bpm.unpin(grandparent_handle.page_id(), false)?;
            self.release_ancestors(std::mem::take(ancestors))?;
            return Ok(());
        }

        // Merge this node into the left sibling, pulling the separator down
        // between them.
        let (mut left_keys, mut left_children) = {
            let left = InternalNode::from_bytes(unsafe { left_handle.data_mut() });
            (left.keys(), left.children())
        };
        let (my_keys, my_children) = {
            let me = InternalNode::from_bytes(unsafe { node_handle.data_mut() });
            (me.keys(), me.children())
        };
        left_keys.push(separator);
        left_keys.extend(my_keys);
        left_children.extend(my_children.clone());
        InternalNode::from_bytes(unsafe { left_handle.data_mut() }).set_entries(&left_keys, &left_children);
        for &c in &my_children {
            self.set_parent(c, left_id)?;
        }

        let dead_id = node_handle.page_id();
        drop(node_guard);
        self.bpm.unpin(dead_id, true)?;
        self.bpm.delete_page(dead_id)?;
        drop(left_guard);
        self.bpm.unpin(left_id, true)?;

        self.remove_child_from_parent(grandparent_handle, grandparent_guard, my_index, ancestors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPoolConfig;
    use crate::index::comparator::AscendingComparator;

    /// A tree with a tiny fanout (`leaf_max_size = internal_max_size = 3`)
    /// over a pool big enough that nothing evicts mid-test, to exercise
    /// splits and merges after a handful of operations.
    fn small_tree() -> BPlusTree {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.keep();
        let bpm = Arc::new(
            BufferPoolManager::new(path, BufferPoolConfig { pool_size: 16, k: 2 }).unwrap(),
        );
        BPlusTree::new(bpm, Arc::new(AscendingComparator), 3, 3).unwrap()
    }

    #[test]
    fn insert_sequence_over_several_splits_all_retrievable() {
        let t = small_tree();
        let mut txn = Txn::none();
        let keys = [1u64, 3, 5, 7, 9, 4, 10, 8, 6, 11];
        for &k in &keys {
            assert!(t.insert(k, Rid::new(1, k as u32), Some(&mut txn)).unwrap());
        }
        assert_eq!(txn.latches_held(), 0);
        for &k in &keys {
            assert_eq!(t.get_value(k, None).unwrap(), Some(Rid::new(1, k as u32)));
        }
    }

    #[test]
    fn remove_subset_leaves_the_rest_retrievable() {
        let t = small_tree();
        let keys = [1u64, 3, 5, 7, 9, 4, 10, 8, 6, 11];
        for &k in &keys {
            t.insert(k, Rid::new(1, k as u32), None).unwrap();
        }

        let mut txn = Txn::none();
        t.remove(5, Some(&mut txn)).unwrap();
        t.remove(6, Some(&mut txn)).unwrap();
        assert_eq!(txn.latches_held(), 0);

        for &k in &keys {
            let still_present = k != 5 && k != 6;
            assert_eq!(t.get_value(k, None).unwrap().is_some(), still_present);
        }
    }

    #[test]
    fn insert_then_remove_all_but_one_leaves_single_survivor() {
        let t = small_tree();
        for k in 1u64..=5 {
            t.insert(k, Rid::new(1, k as u32), None).unwrap();
        }
        for k in [1u64, 5, 3, 4] {
            t.remove(k, None).unwrap();
        }

        let remaining: Vec<u64> = t.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(remaining, vec![2]);
        assert_eq!(t.get_value(2, None).unwrap(), Some(Rid::new(1, 2)));
    }
}
