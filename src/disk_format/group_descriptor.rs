use std::mem::size_of;

use serde::{Deserialize, Serialize};

/// The number of bytes occupied by a group descriptor.
pub const GROUP_DESCRIPTOR_SIZE: usize = 32;
const_assert!(size_of::<GroupDescriptor>() == GROUP_DESCRIPTOR_SIZE);

/// One entry of the group descriptor table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct GroupDescriptor {
    /// Block holding the group's block allocation bitmap.
    pub block_bitmap: u32,
    /// Block holding the group's inode allocation bitmap.
    pub inode_bitmap: u32,
    /// First block of the group's inode table.
    pub inode_table: u32,
    pub unallocated_blocks: u16,
    pub unallocated_inodes: u16,
    pub num_directories: u16,
    pub padding: u16,
    pub reserved: [u8; 12],
}
