use std::num::NonZeroUsize;

/// Capacity of each cache when none is given.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Options controlling how an ext3 image is opened.
///
/// Every cache is a bounded LRU; a size of zero is treated as one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ext3Options {
    /// Decoded inodes kept by inode number.
    pub inode_cache_size: usize,
    /// Raw blocks kept by block number.
    pub block_cache_size: usize,
    /// Resolved directories, and looked-up entries, kept by path.
    pub path_cache_size: usize,
}

impl Default for Ext3Options {
    fn default() -> Self {
        Self {
            inode_cache_size: DEFAULT_CACHE_SIZE,
            block_cache_size: DEFAULT_CACHE_SIZE,
            path_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// An LRU capacity for a configured cache size.
pub(crate) fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}
