//! Error taxonomy for the buffer pool and B+tree core.
//!
//! Mirrors the teacher crate's hand-rolled `Display` impl rather than a
//! derive-macro error crate; `anyhow::Result` is still used at the
//! consumer-facing boundary (`BPlusTree::insert`/`remove`/`get_value`), but
//! code that needs to distinguish `BufferExhausted` from an I/O failure can
//! match on this enum directly.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// No evictable frame was available to satisfy a fetch/new_page.
    BufferExhausted,
    /// `delete_page` was called on a page that is still pinned.
    PagePinned(crate::page::PageId),
    /// A page id was used that does not exist on disk or in the pool.
    InvalidPage(crate::page::PageId),
    /// A detected violation of a node/tree invariant. Programmer error.
    Corruption(String),
    /// Propagated from the disk manager.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferExhausted => write!(f, "buffer pool exhausted: no evictable frame"),
            Error::PagePinned(id) => write!(f, "page {id} is still pinned"),
            Error::InvalidPage(id) => write!(f, "page {id} does not exist"),
            Error::Corruption(context) => write!(f, "invariant violation: {context}"),
            Error::Io(e) => write!(f, "disk I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
