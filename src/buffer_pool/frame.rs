//! A buffer pool frame: a fixed slot holding one page plus the bookkeeping
//! the pool needs to decide whether the slot can be recycled.
//!
//! Grounded on the teacher crate's `buffer_pool::frame::Frame`, trimmed to
//! the fields this pool's `fetch`/`new_page`/`unpin` paths actually touch.

use crate::page::Page;

pub type FrameId = usize;

pub struct Frame {
    pub id: FrameId,
    pub page: Page,
}

impl Frame {
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            page: Page::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.page.page_id() == crate::page::INVALID_PAGE_ID
    }
}
