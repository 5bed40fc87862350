//! Page-level read/write latches.
//!
//! Latch crabbing needs to hold a latch across several function calls while
//! a page travels inside a [`crate::index::btree::PendingLatches`] stack, so
//! guards with borrowed lifetimes don't work here. This follows the
//! teacher's approach of reaching into `parking_lot`'s raw lock API to
//! lock/unlock manually, and pairing every manual lock with an explicit
//! unlock on every code path (including error paths).

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::RawRwLock;
use std::sync::Arc;

pub struct Latch {
    raw: RawRwLock,
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").finish_non_exhaustive()
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        Self {
            raw: RawRwLock::INIT,
        }
    }

    pub fn rlock(&self) {
        self.raw.lock_shared();
    }

    pub fn runlock(&self) {
        unsafe { self.raw.unlock_shared() };
    }

    pub fn wlock(&self) {
        self.raw.lock_exclusive();
    }

    pub fn wunlock(&self) {
        unsafe { self.raw.unlock_exclusive() };
    }

    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

/// Which latch mode a [`LatchGuard`] should release on drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Read,
    Write,
}

/// RAII release for a latch acquired through [`Latch::rlock`]/[`Latch::wlock`].
///
/// `Latch` itself does not hand out scoped guards (manual lock/unlock is the
/// point), so callers that want RAII wrap the raw calls in this type. It
/// owns an `Arc<Latch>` rather than borrowing, the same way the teacher's
/// index page pulls `latch: Arc<Latch>` out of the page it was fetched
/// from: a pending-latch stack needs to hold these independent of the page
/// guard's own borrow while crabbing down the tree.
pub struct LatchGuard {
    latch: Arc<Latch>,
    mode: LatchMode,
    released: bool,
}

impl LatchGuard {
    pub fn acquire(latch: Arc<Latch>, mode: LatchMode) -> Self {
        match mode {
            LatchMode::Read => latch.rlock(),
            LatchMode::Write => latch.wlock(),
        }
        Self {
            latch,
            mode,
            released: false,
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            match self.mode {
                LatchMode::Read => self.latch.runlock(),
                LatchMode::Write => self.latch.wunlock(),
            }
            self.released = true;
        }
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_block_detection() {
        let latch = Latch::new();
        assert!(!latch.is_locked());
        latch.wlock();
        assert!(latch.is_locked());
        latch.wunlock();
        assert!(!latch.is_locked());
    }

    #[test]
    fn guard_releases_on_drop() {
        let latch = Arc::new(Latch::new());
        {
            let _g = LatchGuard::acquire(latch.clone(), LatchMode::Write);
            assert!(latch.is_locked());
        }
        assert!(!latch.is_locked());
    }

    #[test]
    fn guard_explicit_release() {
        let latch = Arc::new(Latch::new());
        let g = LatchGuard::acquire(latch.clone(), LatchMode::Read);
        g.release();
        assert!(!latch.is_locked());
    }
}
