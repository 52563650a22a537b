use std::cell::OnceCell;
use std::collections::BTreeMap;

use anyhow::{ensure, Context, Result};
use log::{debug, warn};

use crate::disk_format::directory_entry::{
    DirectoryEntry, EntryFormat, FileType, DIRECTORY_ENTRY_HEADER_SIZE,
};
use crate::disk_format::hash_tree::{
    HashTreeCount, HashTreeEntry, HashTreeHeader, HASH_TREE_ENTRY_SIZE, HASH_TREE_HEADER_OFFSET,
    HASH_TREE_HEADER_SIZE, HASH_TREE_NODE_OFFSET, MAX_INDIRECT_LEVELS,
};
use crate::disk_format::inode::{Inode, InodeNumber};
use crate::error::Ext3Error;
use crate::storage::RawBlockSource;
use crate::volume::Volume;

/// Byte offset of the `..` entry in the first block of an indexed directory.
const DOT_DOT_OFFSET: usize = 12;

/// The decoded contents of one directory.
///
/// The entries are decoded on first use and kept for the life of the `Directory`.
pub struct Directory {
    inode_number: InodeNumber,
    inode: Inode,
    data: Vec<u8>,
    format: EntryFormat,
    block_size: usize,
    indexed: bool,
    entries: OnceCell<Entries>,
}

struct Entries {
    /// Live entries in on-disk order.
    list: Vec<DirectoryEntry>,
    /// Positions in `list`, by name. A name can appear more than once.
    by_name: BTreeMap<String, Vec<usize>>,
}

impl Directory {
    pub fn open<S: RawBlockSource>(
        volume: &mut Volume<S>,
        inode_number: InodeNumber,
    ) -> Result<Directory> {
        let inode = volume.get_inode(inode_number)?;
        ensure!(
            inode.is_dir(),
            Ext3Error::Corrupt(format!("inode {inode_number} is not a directory"))
        );

        let data = volume
            .read_data(&inode)
            .with_context(|| format!("reading directory {inode_number}"))?;
        let indexed = inode.is_indexed() && volume.superblock().has_dir_index();

        debug!(
            "directory {inode_number}: {} bytes{}",
            data.len(),
            if indexed { ", indexed" } else { "" }
        );

        Ok(Directory {
            inode_number,
            inode,
            data,
            format: volume.entry_format(),
            block_size: volume.block_size() as usize,
            indexed,
            entries: OnceCell::new(),
        })
    }

    pub fn inode_number(&self) -> InodeNumber {
        self.inode_number
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// Whether the directory carries a hash-tree index.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Live entries, in on-disk order, including `.` and `..`.
    pub fn entries(&self) -> Result<&[DirectoryEntry]> {
        Ok(&self.decoded()?.list)
    }

    /// Sorted entry names, without `.` and `..`.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .decoded()?
            .by_name
            .keys()
            .filter(|name| *name != "." && *name != "..")
            .cloned()
            .collect())
    }

    /// Looks up `name`. With a type filter, the first entry of that name whose type matches;
    /// otherwise the first entry of that name.
    pub fn find_entry<S: RawBlockSource>(
        &self,
        volume: &mut Volume<S>,
        name: &str,
        file_type: Option<FileType>,
    ) -> Result<Option<DirectoryEntry>> {
        let entries = self.decoded()?;
        let Some(positions) = entries.by_name.get(name) else {
            return Ok(None);
        };

        for &position in positions {
            let entry = &entries.list[position];

            match file_type {
                None => return Ok(Some(entry.clone())),
                Some(wanted) if volume.entry_type(entry)? == wanted => {
                    return Ok(Some(entry.clone()))
                }
                Some(_) => {}
            }
        }

        Ok(None)
    }

    /// The root of the hash-tree index, if the directory has one.
    pub fn hash_tree(&self) -> Result<Option<HashTreeRoot>> {
        if !self.indexed {
            return Ok(None);
        }

        HashTreeRoot::parse(self.block(0)?).map(Some)
    }

    fn decoded(&self) -> Result<&Entries> {
        if let Some(entries) = self.entries.get() {
            return Ok(entries);
        }

        let list = if self.indexed {
            match self.decode_indexed() {
                Ok(list) => list,
                Err(err) => {
                    warn!(
                        "directory {}: unusable hash-tree index ({err:#}), scanning linearly",
                        self.inode_number
                    );
                    decode_linear(&self.data, self.format)?
                }
            }
        } else {
            decode_linear(&self.data, self.format)?
        };

        let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (position, entry) in list.iter().enumerate() {
            by_name.entry(entry.name.clone()).or_default().push(position);
        }

        Ok(self.entries.get_or_init(|| Entries { list, by_name }))
    }

    /// Decodes `.` and `..` from the index root, then every leaf block the index reaches, in
    /// on-disk order.
    fn decode_indexed(&self) -> Result<Vec<DirectoryEntry>> {
        let root_block = self.block(0)?;
        let root = HashTreeRoot::parse(root_block)?;

        let dot = DirectoryEntry::parse(root_block, self.format)?;
        let dot_dot = DirectoryEntry::parse(&root_block[DOT_DOT_OFFSET..], self.format)?;
        ensure!(
            dot.name == "." && dot_dot.name == "..",
            Ext3Error::Corrupt("hash-tree root does not start with '.' and '..'".into())
        );

        let mut level = root.children();
        for depth in 0..root.header.indirect_levels {
            let mut next = Vec::new();

            for block in normalize(level) {
                ensure!(
                    block != 0,
                    Ext3Error::Corrupt(format!("hash-tree node at depth {depth} points at the root"))
                );

                let node = self.block(block)?;
                let (count, entries) = parse_node(node, HASH_TREE_NODE_OFFSET)?;
                next.push(count.block);
                next.extend(entries.iter().map(|entry| entry.block));
            }

            level = next;
        }

        let mut list = vec![dot, dot_dot];
        for block in normalize(level) {
            ensure!(
                block != 0,
                Ext3Error::Corrupt("hash-tree leaf points at the root".into())
            );

            list.extend(decode_linear(self.block(block)?, self.format)?);
        }

        Ok(list)
    }

    /// Logical block `block` of the directory's data.
    fn block(&self, block: u32) -> Result<&[u8]> {
        let start = block as usize * self.block_size;
        ensure!(
            start + self.block_size <= self.data.len(),
            Ext3Error::Corrupt(format!(
                "directory {} has no logical block {block}",
                self.inode_number
            ))
        );

        Ok(&self.data[start..start + self.block_size])
    }
}

/// Decodes every live entry in `data`, stopping once no whole header is left.
fn decode_linear(data: &[u8], format: EntryFormat) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while data.len() - offset >= DIRECTORY_ENTRY_HEADER_SIZE {
        let entry = DirectoryEntry::parse(&data[offset..], format)
            .with_context(|| format!("decoding directory entry at offset {offset}"))?;
        offset += entry.record_length as usize;

        if !entry.is_unused() {
            entries.push(entry);
        }
    }

    Ok(entries)
}

fn normalize(mut blocks: Vec<u32>) -> Vec<u32> {
    blocks.sort_unstable();
    blocks.dedup();
    blocks
}

/// Decodes the count record at `offset` and the entries after it.
fn parse_node(block: &[u8], offset: usize) -> Result<(HashTreeCount, Vec<HashTreeEntry>)> {
    let count: HashTreeCount =
        crate::disk_format::decode(&block[offset.min(block.len())..], "hash-tree count")?;

    let records = count.count as usize;
    ensure!(
        records >= 1 && records <= count.limit as usize,
        Ext3Error::Corrupt(format!(
            "hash-tree node holds {} of at most {} records",
            count.count, count.limit
        ))
    );
    ensure!(
        offset + records * HASH_TREE_ENTRY_SIZE <= block.len(),
        Ext3Error::Corrupt("hash-tree node overruns its block".into())
    );

    let entries = block[offset + HASH_TREE_ENTRY_SIZE..offset + records * HASH_TREE_ENTRY_SIZE]
        .chunks_exact(HASH_TREE_ENTRY_SIZE)
        .map(|raw| crate::disk_format::decode::<HashTreeEntry>(raw, "hash-tree entry"))
        .collect::<Result<Vec<_>>>()?;

    Ok((count, entries))
}

/// The root node of a hash-tree index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashTreeRoot {
    pub header: HashTreeHeader,
    pub count: HashTreeCount,
    /// Hash-ranged pointers, in increasing `min_hash` order.
    pub entries: Vec<HashTreeEntry>,
}

impl HashTreeRoot {
    /// Decodes the root from the first block of an indexed directory.
    pub fn parse(block: &[u8]) -> Result<HashTreeRoot> {
        ensure!(
            block.len() >= HASH_TREE_HEADER_OFFSET + HASH_TREE_HEADER_SIZE,
            Ext3Error::Corrupt("hash-tree root block is too short".into())
        );

        let header: HashTreeHeader =
            crate::disk_format::decode(&block[HASH_TREE_HEADER_OFFSET..], "hash-tree header")?;

        ensure!(
            header.indirect_levels <= MAX_INDIRECT_LEVELS,
            Ext3Error::Corrupt(format!(
                "hash tree has {} indirect levels",
                header.indirect_levels
            ))
        );
        ensure!(
            header.info_length as usize >= HASH_TREE_HEADER_SIZE,
            Ext3Error::Corrupt(format!(
                "hash-tree header length {} is too short",
                header.info_length
            ))
        );

        let (count, entries) =
            parse_node(block, HASH_TREE_HEADER_OFFSET + header.info_length as usize)?;

        Ok(HashTreeRoot {
            header,
            count,
            entries,
        })
    }

    /// Every block the root points to, starting with the one below the first hash.
    pub fn children(&self) -> Vec<u32> {
        std::iter::once(self.count.block)
            .chain(self.entries.iter().map(|entry| entry.block))
            .collect()
    }

    /// The logical block covering `hash`: the last entry whose `min_hash` is at most `hash`,
    /// or the count record's block for hashes below every entry.
    pub fn leaf_for_hash(&self, hash: u32) -> u32 {
        match self.entries.partition_point(|entry| entry.min_hash <= hash) {
            0 => self.count.block,
            n => self.entries[n - 1].block,
        }
    }
}
