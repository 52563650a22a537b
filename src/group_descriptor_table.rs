use std::ops::Index;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::bitmap::AllocationBitmap;
use crate::disk_format::group_descriptor::{GroupDescriptor, GROUP_DESCRIPTOR_SIZE};
use crate::disk_format::superblock::Superblock;
use crate::storage::{BlockIo, RawBlockSource};

/// One block group: its descriptor and both of its allocation bitmaps.
#[derive(Clone, Debug)]
pub struct BlockGroup {
    pub descriptor: GroupDescriptor,
    pub block_bitmap: AllocationBitmap,
    pub inode_bitmap: AllocationBitmap,
}

/// The group descriptor table, one [`BlockGroup`] per group.
#[derive(Clone, Debug)]
pub struct GroupDescriptorTable {
    groups: Vec<BlockGroup>,
}

impl GroupDescriptorTable {
    /// Reads the table and every group's bitmaps.
    pub fn load<S: RawBlockSource>(
        device: &mut BlockIo<S>,
        superblock: &Superblock,
    ) -> Result<GroupDescriptorTable> {
        let group_count = superblock.group_count() as usize;
        let address = superblock.block_to_address(superblock.group_descriptor_table_block());

        info!("{group_count} block groups, descriptor table at {address}");

        let table = device
            .read_exact_at(address, group_count * GROUP_DESCRIPTOR_SIZE)
            .context("reading group descriptor table")?;

        let block_bitmap_len = superblock.block_size() as usize;
        let inode_bitmap_len = (superblock.inodes_per_group as usize).div_ceil(8);

        let groups = table
            .chunks_exact(GROUP_DESCRIPTOR_SIZE)
            .enumerate()
            .map(|(group, raw)| {
                let descriptor: GroupDescriptor = crate::disk_format::decode(raw, "group descriptor")?;
                debug!("group {group}: {descriptor:?}");

                let block_bitmap = device
                    .read_exact_at(
                        superblock.block_to_address(descriptor.block_bitmap),
                        block_bitmap_len,
                    )
                    .with_context(|| format!("reading block bitmap of group {group}"))?;

                let inode_bitmap = device
                    .read_exact_at(
                        superblock.block_to_address(descriptor.inode_bitmap),
                        inode_bitmap_len,
                    )
                    .with_context(|| format!("reading inode bitmap of group {group}"))?;

                Ok(BlockGroup {
                    descriptor,
                    block_bitmap: AllocationBitmap::new(block_bitmap),
                    inode_bitmap: AllocationBitmap::new(inode_bitmap),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GroupDescriptorTable { groups })
    }

    pub fn get(&self, group: u32) -> Option<&BlockGroup> {
        self.groups.get(group as usize)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockGroup> {
        self.groups.iter()
    }
}

/// Indexing with a group number the superblock never produced is a bug, so it panics.
impl Index<u32> for GroupDescriptorTable {
    type Output = BlockGroup;

    fn index(&self, group: u32) -> &BlockGroup {
        &self.groups[group as usize]
    }
}
