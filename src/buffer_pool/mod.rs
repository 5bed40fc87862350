//! The buffer pool manager: a fixed number of in-memory frames backed by
//! [`crate::disk::DiskManager`], with eviction decided by [`LruKReplacer`].
//!
//! Grounded on the teacher crate's `buffer_pool::BufferPoolManager`, with two
//! deliberate departures: there is no `lazy_static!` global singleton (each
//! [`BufferPoolManager`] is an independent, explicitly constructed instance,
//! so tests never share state), and eviction uses LRU-K instead of the
//! teacher's plain-LRU `priority-queue` replacer.

mod frame;
mod replacer;

pub use frame::{Frame, FrameId};
pub use replacer::LruKReplacer;

use crate::disk::DiskManager;
use crate::error::{Error, Result};
use crate::latch::Latch;
use crate::page::{PageId, PAGE_SIZE};
use parking_lot::FairMutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    /// The `k` in LRU-K: number of historical accesses tracked per frame.
    pub k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            k: 2,
        }
    }
}

struct Inner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    disk: DiskManager,
}

impl Inner {
    /// Finds a frame to serve a new page: a free frame if one exists,
    /// otherwise an eviction victim from the replacer, flushing it to disk
    /// first if it's dirty.
    fn acquire_frame(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(Error::BufferExhausted);
        };

        let frame = &mut self.frames[frame_id];
        crate::printdbg!("evicting frame {frame_id} (page {})", frame.page.page_id());
        if frame.page.is_dirty() {
            self.disk.write_page(&frame.page)?;
        }
        self.page_table.remove(&frame.page.page_id());
        Ok(frame_id)
    }

    fn handle_for(&mut self, frame_id: FrameId) -> FrameHandle {
        let frame = &mut self.frames[frame_id];
        FrameHandle {
            page_id: frame.page.page_id(),
            data: frame.page.raw_ptr(),
            latch: frame.page.latch(),
        }
    }
}

/// A live reference into one buffer pool frame, obtained while the pool
/// mutex was briefly held and valid for as long as the page stays pinned.
///
/// `frames` never grows or reallocates after construction, so pointers into
/// it are stable for the pool's whole lifetime; the page itself never moves
/// out of its frame. Reading or writing through `data`/`data_mut` without an
/// appropriate latch held is a logic bug in the caller, not a soundness
/// issue for the pointer itself.
pub struct FrameHandle {
    page_id: PageId,
    data: *mut [u8; PAGE_SIZE],
    latch: Arc<Latch>,
}

// SAFETY: the pointer addresses a frame slot pinned for the handle's
// lifetime and protected by `latch`; the handle carries no thread-confined
// state.
unsafe impl Send for FrameHandle {}

impl FrameHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn latch(&self) -> Arc<Latch> {
        self.latch.clone()
    }

    /// # Safety
    /// The caller must hold at least a read latch on this page for the
    /// duration of the borrow.
    pub unsafe fn data(&self) -> &[u8; PAGE_SIZE] {
        &*self.data
    }

    /// # Safety
    /// The caller must hold a write latch on this page for the duration of
    /// the borrow.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut [u8; PAGE_SIZE] {
        &mut *self.data
    }
}

pub struct BufferPoolManager {
    inner: FairMutex<Inner>,
}

impl BufferPoolManager {
    pub fn new(dir: impl AsRef<Path>, config: BufferPoolConfig) -> Result<Self> {
        let disk = DiskManager::new(dir)?;
        disk.ensure_header_page()?;
        let frames = (0..config.pool_size).map(Frame::new).collect::<Vec<_>>();
        let free_list = (0..config.pool_size).collect();
        let replacer = LruKReplacer::new(config.pool_size, config.k);

        Ok(Self {
            inner: FairMutex::new(Inner {
                frames,
                page_table: HashMap::with_capacity(config.pool_size),
                free_list,
                replacer,
                disk,
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Fetches an existing page, pinning it in a frame. Pages already
    /// resident just get their pin count bumped; otherwise a frame is
    /// acquired (evicting if necessary) and the page is read from disk.
    pub fn fetch(&self, page_id: PageId) -> Result<FrameHandle> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            inner.frames[frame_id].page.pin();
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Ok(inner.handle_for(frame_id));
        }

        let frame_id = inner.acquire_frame()?;
        let page = inner.disk.read_page(page_id)?;
        inner.frames[frame_id].page = page;
        inner.frames[frame_id].page.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(inner.handle_for(frame_id))
    }

    /// Allocates a brand-new page, pinned in a frame with zeroed contents.
    pub fn new_page(&self) -> Result<FrameHandle> {
        let mut inner = self.inner.lock();

        let frame_id = inner.acquire_frame()?;
        let page_id = inner.disk.allocate_page_id();
        inner.frames[frame_id].page.reset(page_id);
        inner.frames[frame_id].page.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(inner.handle_for(frame_id))
    }

    /// Unpins a page, optionally flagging it dirty. Once a page's pin count
    /// drops to zero it becomes a candidate for eviction.
    pub fn unpin(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let &frame_id = inner
            .page_table
            .get(&page_id)
            .ok_or(Error::InvalidPage(page_id))?;

        let frame = &mut inner.frames[frame_id];
        frame.page.unpin();
        if is_dirty {
            frame.page.mark_dirty();
        }
        if frame.page.pin_count() == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Deletes a page outright. Fails if the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            if inner.frames[frame_id].page.pin_count() > 0 {
                return Err(Error::PagePinned(page_id));
            }
            inner.page_table.remove(&page_id);
            inner.replacer.remove(frame_id);
            inner.frames[frame_id].page.reset(crate::page::INVALID_PAGE_ID);
            inner.free_list.push_back(frame_id);
        }

        inner.disk.delete_page(page_id)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        let &frame_id = inner
            .page_table
            .get(&page_id)
            .ok_or(Error::InvalidPage(page_id))?;
        inner.disk.write_page(&inner.frames[frame_id].page)?;
        inner.frames[frame_id].page.mark_clean();
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let ids: Vec<PageId> = inner.page_table.keys().copied().collect();
        for page_id in ids {
            let frame_id = inner.page_table[&page_id];
            inner.disk.write_page(&inner.frames[frame_id].page)?;
            inner.frames[frame_id].page.mark_clean();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(pool_size: usize) -> BufferPoolManager {
        let dir = tempfile::tempdir().unwrap();
        let config = BufferPoolConfig { pool_size, k: 2 };
        // Leak the tempdir so it outlives the pool for the test's duration;
        // fine for a short-lived unit test process.
        let path = dir.keep();
        BufferPoolManager::new(path, config).unwrap()
    }

    #[test]
    fn new_page_then_fetch_round_trips_data() {
        let bpm = pool(4);
        let handle = bpm.new_page().unwrap();
        let page_id = handle.page_id();
        unsafe {
            handle.data_mut()[0..4].copy_from_slice(&[9, 9, 9, 9]);
        }
        bpm.unpin(page_id, true).unwrap();

        let handle = bpm.fetch(page_id).unwrap();
        unsafe {
            assert_eq!(handle.data()[0..4], [9, 9, 9, 9]);
        }
        bpm.unpin(page_id, false).unwrap();
    }

    #[test]
    fn exhausting_pool_without_unpinning_errors() {
        let bpm = pool(2);
        let a = bpm.new_page().unwrap();
        let _b = bpm.new_page().unwrap();
        assert!(bpm.new_page().is_err());
        bpm.unpin(a.page_id(), false).unwrap();
        assert!(bpm.new_page().is_ok());
    }

    #[test]
    fn unpinned_page_is_evicted_to_make_room() {
        let bpm = pool(1);
        let a = bpm.new_page().unwrap();
        let a_id = a.page_id();
        unsafe {
            a.data_mut()[0] = 42;
        }
        bpm.unpin(a_id, true).unwrap();

        // Only one frame; allocating a second page must evict `a`.
        let b = bpm.new_page().unwrap();
        assert_ne!(a_id, b.page_id());
        bpm.unpin(b.page_id(), false).unwrap();

        let refetched = bpm.fetch(a_id).unwrap();
        unsafe {
            assert_eq!(refetched.data()[0], 42);
        }
    }

    #[test]
    fn deleting_a_pinned_page_is_rejected() {
        let bpm = pool(2);
        let a = bpm.new_page().unwrap();
        assert!(bpm.delete_page(a.page_id()).is_err());
        bpm.unpin(a.page_id(), false).unwrap();
        assert!(bpm.delete_page(a.page_id()).is_ok());
    }
}
