//! The fixed-size page abstraction the buffer pool hands out and the node
//! layout (`crate::index::node`) reinterprets.

use crate::latch::Latch;
use std::sync::Arc;

pub const PAGE_SIZE: usize = 4096;

pub type PageId = i32;

pub const INVALID_PAGE_ID: PageId = -1;

/// Page 0 is reserved for the directory mapping index name -> root page id.
pub const HEADER_PAGE_ID: PageId = 0;

/// A page living inside one buffer pool frame.
///
/// `pin_count`/`is_dirty` are frame bookkeeping, not part of the on-disk
/// image; only `data` is ever written to or read from disk.
pub struct Page {
    page_id: PageId,
    data: [u8; PAGE_SIZE],
    pin_count: u32,
    is_dirty: bool,
    latch: Arc<Latch>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            data: [0u8; PAGE_SIZE],
            pin_count: 0,
            is_dirty: false,
            latch: Arc::new(Latch::new()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, id: PageId) {
        self.page_id = id;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Panics if the pin count is already zero; an unpin without a matching
    /// pin is a programmer error in the caller, the same assumption the
    /// teacher's buffer pool makes.
    pub fn unpin(&mut self) {
        assert!(self.pin_count > 0, "page {} over-unpinned", self.page_id);
        self.pin_count -= 1;
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.mark_dirty();
        &mut self.data
    }

    /// Resets an in-place frame to a freshly allocated, zeroed page. Used
    /// when a frame is recycled for a new page id after eviction.
    pub fn reset(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.data = [0u8; PAGE_SIZE];
        self.is_dirty = false;
        // A fresh latch: any latch held by a previous occupant of this frame
        // must already be gone (the occupant can only be evicted at pin
        // count zero, and crabbing never holds a latch without a pin).
        self.latch = Arc::new(Latch::new());
    }

    pub fn latch(&self) -> Arc<Latch> {
        self.latch.clone()
    }

    /// Raw pointer to the byte buffer, for the buffer pool to hand out as a
    /// [`crate::buffer_pool::FrameHandle`] without holding the pool mutex for
    /// the lifetime of the borrow. Does not mark the page dirty; callers
    /// that write through it are responsible for reporting that on unpin.
    pub fn raw_ptr(&mut self) -> *mut [u8; PAGE_SIZE] {
        &mut self.data as *mut _
    }

    pub fn overwrite_from(&mut self, bytes: &[u8; PAGE_SIZE]) {
        self.data = *bytes;
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
