use anyhow::{bail, ensure, Context, Result};
use log::{debug, info};
use lru::LruCache;

use crate::disk_format::directory_entry::{DirectoryEntry, EntryFormat, FileType};
use crate::disk_format::inode::{
    Inode, InodeNumber, DOUBLE_INDIRECT, LEGACY_INODE_SIZE, NUM_DIRECT, SINGLE_INDIRECT,
    TRIPLE_INDIRECT,
};
use crate::disk_format::superblock::{Superblock, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::error::Ext3Error;
use crate::group_descriptor_table::{BlockGroup, GroupDescriptorTable};
use crate::options::{capacity, Ext3Options};
use crate::storage::{BlockIo, RawBlockSource};

/// Block numbers are 32 bits on disk.
pub type BlockNumber = u32;

/// An opened ext3 volume: the superblock plus everything hanging off it.
///
/// The group descriptor table is read on first use. Inodes and blocks are kept in bounded LRU
/// caches; a cache hit returns exactly what a fresh decode would.
pub struct Volume<S: RawBlockSource> {
    device: BlockIo<S>,
    superblock: Superblock,
    entry_format: EntryFormat,
    groups: Option<GroupDescriptorTable>,
    inode_cache: LruCache<InodeNumber, Inode>,
    block_cache: LruCache<BlockNumber, Vec<u8>>,
}

impl<S: RawBlockSource> Volume<S> {
    pub fn open(mut device: BlockIo<S>, options: &Ext3Options) -> Result<Volume<S>> {
        let raw = device
            .read_exact_at(SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)
            .context("reading superblock")?;
        let superblock = Superblock::parse(&raw)?;

        info!(
            "ext3 volume {:?} ({}): {} blocks of {} bytes, {} inodes",
            superblock.volume_name(),
            superblock.volume_uuid(),
            superblock.num_blocks,
            superblock.block_size(),
            superblock.num_inodes
        );
        info!(
            "{} groups; {} blocks and {} inodes per group",
            superblock.group_count(),
            superblock.blocks_per_group,
            superblock.inodes_per_group
        );

        let entry_format = superblock.entry_format();

        Ok(Volume {
            device,
            superblock,
            entry_format,
            groups: None,
            inode_cache: LruCache::new(capacity(options.inode_cache_size)),
            block_cache: LruCache::new(capacity(options.block_cache_size)),
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// The directory-entry shape used throughout this volume.
    pub fn entry_format(&self) -> EntryFormat {
        self.entry_format
    }

    pub fn block_size(&self) -> u64 {
        self.superblock.block_size()
    }

    pub fn device(&self) -> &BlockIo<S> {
        &self.device
    }

    /// The group descriptor table, reading it on first use.
    pub fn group_descriptors(&mut self) -> Result<&GroupDescriptorTable> {
        let table = match self.groups.take() {
            Some(table) => table,
            None => GroupDescriptorTable::load(&mut self.device, &self.superblock)?,
        };

        Ok(&*self.groups.insert(table))
    }

    pub fn group(&mut self, group: u32) -> Result<&BlockGroup> {
        self.group_descriptors()?
            .get(group)
            .ok_or_else(|| Ext3Error::Corrupt(format!("block group {group} does not exist")).into())
    }

    /// Decodes inode `number`.
    pub fn get_inode(&mut self, number: InodeNumber) -> Result<Inode> {
        if let Some(inode) = self.inode_cache.get(&number) {
            return Ok(*inode);
        }

        ensure!(
            number != 0 && number <= self.superblock.num_inodes,
            Ext3Error::Corrupt(format!("inode number {number} is out of range"))
        );

        let (group, index) = self.superblock.inode_num_to_group(number);
        let inode_table = self.group(group)?.descriptor.inode_table;
        let address = self.superblock.block_to_address(inode_table)
            + index as u64 * self.superblock.inode_size() as u64;

        debug!("inode {number}: group {group}, index {index}, address {address}");

        let raw = self
            .device
            .read_exact_at(address, LEGACY_INODE_SIZE)
            .with_context(|| format!("reading inode {number}"))?;
        let inode: Inode = crate::disk_format::decode(&raw, "inode")?;

        self.inode_cache.put(number, inode);

        Ok(inode)
    }

    /// Reads block `number`. Block 0 never holds file data, so it reads as zeros.
    pub fn get_block(&mut self, number: BlockNumber) -> Result<Vec<u8>> {
        if number == 0 {
            return Ok(vec![0; self.block_size() as usize]);
        }

        if let Some(block) = self.block_cache.get(&number) {
            return Ok(block.clone());
        }

        ensure!(
            number < self.superblock.num_blocks,
            Ext3Error::Corrupt(format!("block number {number} is out of range"))
        );

        let address = self.superblock.block_to_address(number);
        debug!("block {number}: address {address}");

        let block = self
            .device
            .read_exact_at(address, self.block_size() as usize)
            .with_context(|| format!("reading block {number}"))?;

        self.block_cache.put(number, block.clone());

        Ok(block)
    }

    /// Whether inode `number` is marked allocated in its group's bitmap.
    pub fn valid_inode(&mut self, number: InodeNumber) -> Result<bool> {
        let (group, index) = self.superblock.inode_num_to_group(number);
        self.group(group)?.inode_bitmap.is_allocated(index as usize)
    }

    /// Whether block `number` is marked allocated in its group's bitmap.
    pub fn valid_block(&mut self, number: BlockNumber) -> Result<bool> {
        let (group, index) = self.superblock.block_num_to_group(number);
        self.group(group)?.block_bitmap.is_allocated(index as usize)
    }

    /// The type of the file an entry points to.
    ///
    /// The entry's own type field is trusted when there is one; legacy entries, and entries
    /// whose field says "unknown", take the type from the inode.
    pub fn entry_type(&mut self, entry: &DirectoryEntry) -> Result<FileType> {
        match entry.file_type {
            Some(file_type) if file_type != FileType::Unknown => Ok(file_type),
            _ => Ok(self.get_inode(entry.inode)?.file_type()),
        }
    }

    /// The block holding logical block `logical` of a file, or 0 for a hole.
    pub fn block_pointer(&mut self, inode: &Inode, logical: u64) -> Result<BlockNumber> {
        let per_block = self.block_size() / 4;

        if logical < NUM_DIRECT as u64 {
            return Ok(inode.block[logical as usize]);
        }

        let logical = logical - NUM_DIRECT as u64;
        if logical < per_block {
            return self.follow_indirect(inode.block[SINGLE_INDIRECT], &[logical]);
        }

        let logical = logical - per_block;
        if logical < per_block * per_block {
            return self.follow_indirect(
                inode.block[DOUBLE_INDIRECT],
                &[logical / per_block, logical % per_block],
            );
        }

        let logical = logical - per_block * per_block;
        if logical < per_block * per_block * per_block {
            return self.follow_indirect(
                inode.block[TRIPLE_INDIRECT],
                &[
                    logical / (per_block * per_block),
                    logical / per_block % per_block,
                    logical % per_block,
                ],
            );
        }

        bail!(Ext3Error::Corrupt(format!(
            "logical block {} is beyond the triple indirect range",
            logical
        )))
    }

    /// Walks a chain of indirect blocks, one index per level.
    fn follow_indirect(&mut self, mut block: BlockNumber, indices: &[u64]) -> Result<BlockNumber> {
        for &index in indices {
            if block == 0 {
                return Ok(0);
            }

            let data = self.get_block(block)?;
            let at = index as usize * 4;
            block = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        }

        Ok(block)
    }

    /// Reads up to `len` bytes of a file's content at `offset`, clipped to the file size.
    pub fn read_range(&mut self, inode: &Inode, offset: u64, len: usize) -> Result<Vec<u8>> {
        if inode.uses_extents() {
            bail!(Ext3Error::Corrupt(
                "inode is extent-mapped, which ext3 does not use".into()
            ));
        }

        // Sparse files may be larger than the volume; only the requested blocks are read.
        let block_size = self.block_size();
        let end = offset.saturating_add(len as u64).min(inode.size());

        let mut data = Vec::with_capacity(end.saturating_sub(offset).min(len as u64) as usize);
        let mut position = offset;
        while position < end {
            let logical = position / block_size;
            let within = position % block_size;
            let chunk_end = ((logical + 1) * block_size).min(end);

            let pointer = self.block_pointer(inode, logical)?;
            let block = self.get_block(pointer)?;
            data.extend_from_slice(&block[within as usize..(chunk_end - logical * block_size) as usize]);

            position = chunk_end;
        }

        Ok(data)
    }

    /// The whole content of a file or directory.
    pub fn read_data(&mut self, inode: &Inode) -> Result<Vec<u8>> {
        self.read_range(inode, 0, inode.size() as usize)
    }

    /// The target of a symbolic link.
    pub fn read_symlink(&mut self, inode: &Inode) -> Result<Vec<u8>> {
        ensure!(
            inode.is_symlink(),
            Ext3Error::InvalidArgument("not a symbolic link".into())
        );

        if inode.is_fast_symlink() {
            Ok(inode.inline_data())
        } else {
            self.read_data(inode)
        }
    }

    pub fn close(self) -> Result<()> {
        self.device.close()
    }
}
