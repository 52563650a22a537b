//! Records of indexed directories.
//!
//! The first block of an indexed directory holds a `.` entry (12 bytes), a `..` entry whose
//! record covers the rest of the block, a [`HashTreeHeader`] and the root [`HashTreeCount`]
//! followed by `count - 1` [`HashTreeEntry`] records. Interior nodes are blocks holding a single
//! empty directory entry followed by the same count/entry layout.

use std::mem::size_of;

use serde::{Deserialize, Serialize};

/// Byte offset of the [`HashTreeHeader`] in the first directory block.
pub const HASH_TREE_HEADER_OFFSET: usize = 24;

/// Byte offset of the count record in an interior node block.
pub const HASH_TREE_NODE_OFFSET: usize = 8;

pub const HASH_TREE_HEADER_SIZE: usize = 8;
const_assert!(size_of::<HashTreeHeader>() == HASH_TREE_HEADER_SIZE);

pub const HASH_TREE_ENTRY_SIZE: usize = 8;
const_assert!(size_of::<HashTreeCount>() == HASH_TREE_ENTRY_SIZE);
const_assert!(size_of::<HashTreeEntry>() == HASH_TREE_ENTRY_SIZE);

/// Deepest supported tree: the root plus two levels of interior nodes.
pub const MAX_INDIRECT_LEVELS: u8 = 2;

/// Header following the `.` and `..` entries of an indexed directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct HashTreeHeader {
    pub reserved: u32,
    pub hash_version: u8,
    /// Length of this header; the root entries start right after it.
    pub info_length: u8,
    /// Levels of interior nodes between the root and the leaves.
    pub indirect_levels: u8,
    pub unused_flags: u8,
}

/// The first record of every node: capacity, number of records in use (including this one),
/// and the block covering hashes below the first [`HashTreeEntry`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct HashTreeCount {
    pub limit: u16,
    pub count: u16,
    pub block: u32,
}

/// A hash-ranged child pointer. `block` is a logical block of the directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct HashTreeEntry {
    /// The smallest hash stored under `block`.
    pub min_hash: u32,
    pub block: u32,
}
