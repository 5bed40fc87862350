//! Construction-time configuration, kept as plain structs with `Default`
//! impls in the teacher crate's style rather than a builder-macro crate.

use crate::buffer_pool::BufferPoolConfig;

#[derive(Debug, Clone)]
pub struct BPlusTreeConfig {
    pub buffer_pool: BufferPoolConfig,
    /// Maximum number of keys a leaf page may hold before it splits.
    pub leaf_max_size: usize,
    /// Maximum number of children an internal page may hold before it splits.
    pub internal_max_size: usize,
}

impl Default for BPlusTreeConfig {
    fn default() -> Self {
        Self {
            buffer_pool: BufferPoolConfig::default(),
            leaf_max_size: 128,
            internal_max_size: 128,
        }
    }
}
