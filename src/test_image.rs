//! Small ext3 images assembled in memory, for tests.
//!
//! Every image has 1 KiB blocks and a single block group:
//!
//! | block | contents |
//! |---|---|
//! | 0 | boot block |
//! | 1 | superblock |
//! | 2 | group descriptor table |
//! | 3 | block bitmap |
//! | 4 | inode bitmap |
//! | 5.. | inode table, then file data in inode order |
//!
//! Records are written with `bincode::serialize` on the same types the decoder reads.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::disk_format::directory_entry::{
    EntryFormat, FileType, LegacyEntryHeader, TypedEntryHeader, DIRECTORY_ENTRY_HEADER_SIZE,
};
use crate::disk_format::group_descriptor::GroupDescriptor;
use crate::disk_format::hash_tree::{
    HashTreeCount, HashTreeEntry, HashTreeHeader, HASH_TREE_HEADER_OFFSET, HASH_TREE_HEADER_SIZE,
    HASH_TREE_NODE_OFFSET,
};
use crate::disk_format::inode::{
    Inode, InodeNumber, DOUBLE_INDIRECT, FAST_SYMLINK_MAX, FLAG_INDEX, MODE_DIRECTORY,
    MODE_REGULAR, MODE_SYMLINK, NUM_BLOCK_POINTERS, NUM_DIRECT, ROOT_INODE, SINGLE_INDIRECT,
};
use crate::disk_format::superblock::{
    Superblock, COMPAT_DIR_INDEX, ERRORS_CONTINUE, INCOMPAT_FILE_TYPE, REVISION_DYNAMIC,
    RO_COMPAT_LARGE_FILE, RO_COMPAT_SPARSE_SUPER, STATE_CLEAN, SUPERBLOCK_SIGNATURE,
};
use crate::storage::{BlockIo, MemorySource};

const BLOCK_SIZE: usize = 1024;
const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;
const INODES_PER_GROUP: u32 = 256;
const LOST_AND_FOUND: InodeNumber = 11;
const FIRST_INODE: InodeNumber = 11;
const INODE_TABLE: u32 = 5;
/// Unused blocks left at the end of every image.
const SLACK_BLOCKS: u32 = 8;

pub(crate) const ATIME: u32 = 1_600_000_000;
pub(crate) const CTIME: u32 = 1_600_000_100;
pub(crate) const MTIME: u32 = 1_600_000_200;

/// Length of `/f1` in [`fixture`].
pub(crate) const F1_LEN: usize = 3000;

/// Deterministic, non-repeating-per-block content.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A valid superblock for a 1 KiB-block volume with typed directory entries.
pub(crate) fn sample_superblock() -> Superblock {
    let mut volume_name = [0; 16];
    volume_name[..7].copy_from_slice(b"fixture");

    Superblock {
        num_inodes: INODES_PER_GROUP,
        num_blocks: 1024,
        reserved_blocks: 51,
        unallocated_blocks: 900,
        unallocated_inodes: 200,
        first_data_block: 1,
        block_size_shift: 0,
        fragment_size_shift: 0,
        blocks_per_group: 8192,
        fragments_per_group: 8192,
        inodes_per_group: INODES_PER_GROUP,
        last_mount_time: MTIME,
        last_write_time: MTIME,
        mount_count: 3,
        max_mount_count: 20,
        signature: SUPERBLOCK_SIGNATURE,
        state: STATE_CLEAN,
        error_method: ERRORS_CONTINUE,
        minor_revision: 0,
        last_check_time: CTIME,
        check_interval: 0,
        creator_os: 0,
        major_revision: REVISION_DYNAMIC,
        reserved_uid: 0,
        reserved_gid: 0,
        first_inode: FIRST_INODE,
        inode_size: 128,
        block_group: 0,
        compat_flags: COMPAT_DIR_INDEX,
        incompat_flags: INCOMPAT_FILE_TYPE,
        ro_compat_flags: RO_COMPAT_SPARSE_SUPER | RO_COMPAT_LARGE_FILE,
        volume_id: [
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x0f, 0xed, 0xcb, 0xa9, 0x87, 0x65,
            0x43, 0x21,
        ],
        volume_name,
        last_mount_path: [[0; 32]; 2],
        algorithm_bitmap: 0,
        file_prealloc_blocks: 0,
        dir_prealloc_blocks: 0,
        padding1: 0,
        journal_id: [0; 16],
        journal_inode: 0,
        journal_device: 0,
        orphan_head: 0,
        hash_seed: [1, 2, 3, 4],
        default_hash_version: 1,
        padding2: 0,
        padding3: 0,
        default_mount_options: 0,
        first_meta_block_group: 0,
    }
}

/// One directory record of `record_length` bytes (or just header and name, if that is longer).
pub(crate) fn encode_entry(
    format: EntryFormat,
    inode: InodeNumber,
    name: &str,
    file_type: FileType,
    record_length: u16,
) -> Vec<u8> {
    let mut buf = match format {
        EntryFormat::Legacy => bincode::serialize(&LegacyEntryHeader {
            inode,
            record_length,
            name_length: name.len() as u16,
        }),
        EntryFormat::Typed => bincode::serialize(&TypedEntryHeader {
            inode,
            record_length,
            name_length: name.len() as u8,
            file_type: file_type as u8,
        }),
    }
    .unwrap();

    buf.extend_from_slice(name.as_bytes());
    buf.resize(buf.len().max(record_length as usize), 0);
    buf
}

/// The tree used by the end-to-end scenario:
///
/// ```text
/// /d1/s3  /d1/sC  /d2/link -> ../f1  /f1  /f2  /lost+found
/// ```
pub(crate) fn fixture() -> TestImage {
    let mut builder = ImageBuilder::new();

    let d1 = builder.mkdir(ROOT_INODE, "d1");
    let d2 = builder.mkdir(ROOT_INODE, "d2");
    builder.add_file(ROOT_INODE, "f1", pattern(F1_LEN));
    builder.add_file(ROOT_INODE, "f2", pattern(100));
    builder.add_file(d1, "s3", pattern(3));
    builder.add_file(d1, "sC", pattern(12));
    builder.symlink(d2, "link", "../f1");

    builder.build()
}

struct Entry {
    inode: InodeNumber,
    name: String,
    file_type: FileType,
}

/// Shape of a hash-tree index.
struct IndexShape {
    entries_per_leaf: usize,
    interior: bool,
}

enum Content {
    Directory {
        entries: Vec<Entry>,
        index: Option<IndexShape>,
    },
    File {
        data: Vec<u8>,
        /// Logical blocks left unallocated.
        holes: Vec<usize>,
    },
    Symlink(Vec<u8>),
}

struct Node {
    mode: u16,
    links: u16,
    content: Content,
}

pub(crate) struct ImageBuilder {
    format: EntryFormat,
    inode_size: u16,
    nodes: BTreeMap<InodeNumber, Node>,
    next_inode: InodeNumber,
}

impl ImageBuilder {
    /// An image holding only `/` and `/lost+found`.
    pub(crate) fn new() -> ImageBuilder {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_INODE, directory(ROOT_INODE, ROOT_INODE, None));
        nodes.insert(LOST_AND_FOUND, directory(LOST_AND_FOUND, ROOT_INODE, None));

        let mut builder = ImageBuilder {
            format: EntryFormat::Typed,
            inode_size: 128,
            nodes,
            next_inode: FIRST_INODE + 1,
        };
        builder.entries(ROOT_INODE).push(Entry {
            inode: LOST_AND_FOUND,
            name: "lost+found".into(),
            file_type: FileType::Directory,
        });
        builder.node(ROOT_INODE).links += 1;

        builder
    }

    /// Use directory entries without a type field.
    pub(crate) fn legacy_entries(mut self) -> ImageBuilder {
        self.format = EntryFormat::Legacy;
        self
    }

    pub(crate) fn inode_size(mut self, inode_size: u16) -> ImageBuilder {
        self.inode_size = inode_size;
        self
    }

    pub(crate) fn mkdir(&mut self, parent: InodeNumber, name: &str) -> InodeNumber {
        let inode = self.next_inode;
        self.add(parent, name, directory(inode, parent, None));
        self.node(parent).links += 1;
        inode
    }

    /// A directory with a hash-tree index over leaves of `entries_per_leaf` entries, with
    /// one level of interior nodes if `interior`.
    pub(crate) fn mkdir_indexed(
        &mut self,
        parent: InodeNumber,
        name: &str,
        entries_per_leaf: usize,
        interior: bool,
    ) -> InodeNumber {
        let inode = self.next_inode;
        let shape = IndexShape {
            entries_per_leaf,
            interior,
        };
        self.add(parent, name, directory(inode, parent, Some(shape)));
        self.node(parent).links += 1;
        inode
    }

    pub(crate) fn add_file(&mut self, parent: InodeNumber, name: &str, data: Vec<u8>) -> InodeNumber {
        self.add_sparse_file(parent, name, data, &[])
    }

    /// A file whose logical blocks `holes` are left unallocated. The caller keeps those
    /// ranges of `data` zeroed.
    pub(crate) fn add_sparse_file(
        &mut self,
        parent: InodeNumber,
        name: &str,
        data: Vec<u8>,
        holes: &[usize],
    ) -> InodeNumber {
        self.add(
            parent,
            name,
            Node {
                mode: MODE_REGULAR | 0o644,
                links: 1,
                content: Content::File {
                    data,
                    holes: holes.to_vec(),
                },
            },
        )
    }

    pub(crate) fn symlink(&mut self, parent: InodeNumber, name: &str, target: &str) -> InodeNumber {
        self.add(
            parent,
            name,
            Node {
                mode: MODE_SYMLINK | 0o777,
                links: 1,
                content: Content::Symlink(target.as_bytes().to_vec()),
            },
        )
    }

    /// An extra entry for an existing inode, with whatever type code is given.
    pub(crate) fn link(
        &mut self,
        parent: InodeNumber,
        name: &str,
        inode: InodeNumber,
        file_type: FileType,
    ) {
        self.entries(parent).push(Entry {
            inode,
            name: name.into(),
            file_type,
        });
    }

    fn add(&mut self, parent: InodeNumber, name: &str, node: Node) -> InodeNumber {
        let inode = self.next_inode;
        self.next_inode += 1;
        assert!(inode <= INODES_PER_GROUP, "test image is out of inodes");

        let file_type = FileType::from_mode(node.mode);
        self.entries(parent).push(Entry {
            inode,
            name: name.into(),
            file_type,
        });
        self.nodes.insert(inode, node);

        inode
    }

    fn node(&mut self, inode: InodeNumber) -> &mut Node {
        self.nodes.get_mut(&inode).expect("no such inode")
    }

    fn entries(&mut self, inode: InodeNumber) -> &mut Vec<Entry> {
        match &mut self.node(inode).content {
            Content::Directory { entries, .. } => entries,
            _ => panic!("inode {inode} is not a directory"),
        }
    }

    pub(crate) fn build(self) -> TestImage {
        let inode_table_blocks = INODES_PER_GROUP as usize * self.inode_size as usize / BLOCK_SIZE;
        let first_data_block = INODE_TABLE + inode_table_blocks as u32;

        let mut writer = BlockWriter {
            bytes: vec![0; first_data_block as usize * BLOCK_SIZE],
        };
        let mut inodes = Vec::new();
        let mut data_blocks = HashMap::new();
        let mut num_directories = 0;

        for (&number, node) in &self.nodes {
            let mut inode = Inode {
                mode: node.mode,
                links_count: node.links,
                atime: ATIME,
                ctime: CTIME,
                mtime: MTIME,
                ..Default::default()
            };

            let (size, blocks) = match &node.content {
                Content::Directory { entries, index } => {
                    num_directories += 1;
                    let blocks = match index {
                        Some(shape) => {
                            inode.flags |= FLAG_INDEX;
                            encode_indexed(entries, shape, self.format)
                        }
                        None => encode_linear(entries, self.format),
                    };
                    ((blocks.len() * BLOCK_SIZE) as u64, blocks.into_iter().map(Some).collect())
                }
                Content::File { data, holes } => {
                    let blocks = data
                        .chunks(BLOCK_SIZE)
                        .enumerate()
                        .map(|(logical, chunk)| {
                            (!holes.contains(&logical)).then(|| {
                                let mut block = chunk.to_vec();
                                block.resize(BLOCK_SIZE, 0);
                                block
                            })
                        })
                        .collect();
                    (data.len() as u64, blocks)
                }
                Content::Symlink(target) if target.len() < FAST_SYMLINK_MAX => {
                    let mut inline = target.clone();
                    inline.resize(FAST_SYMLINK_MAX, 0);
                    for (pointer, bytes) in inode.block.iter_mut().zip(inline.chunks_exact(4)) {
                        *pointer = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    }
                    (target.len() as u64, Vec::new())
                }
                Content::Symlink(target) => {
                    let mut block = target.clone();
                    block.resize(BLOCK_SIZE, 0);
                    (target.len() as u64, vec![Some(block)])
                }
            };

            inode.size_low = size as u32;
            inode.size_high = (size >> 32) as u32;

            if !blocks.is_empty() {
                let placed = writer.place(blocks);
                inode.block = placed.pointers;
                inode.sectors = placed.allocated * (BLOCK_SIZE / 512) as u32;
                data_blocks.insert(number, placed.data);
            }

            inodes.push((number, inode));
        }

        let used_blocks = writer.len();
        let num_blocks = used_blocks + SLACK_BLOCKS;
        writer.bytes.resize(num_blocks as usize * BLOCK_SIZE, 0);

        let mut image = TestImage {
            bytes: writer.bytes,
            layout: Layout {
                inode_table: INODE_TABLE,
                inodes_per_group: INODES_PER_GROUP,
                inode_size: self.inode_size as usize,
                data_blocks,
            },
        };

        for (number, inode) in &inodes {
            image.write_inode(*number, inode);
        }

        // block bitmap: bit i is block i + first_data_block
        let bitmap_at = image.block_offset(3);
        for block in 1..used_blocks {
            let bit = (block - 1) as usize;
            image.bytes[bitmap_at + bit / 8] |= 1 << (bit % 8);
        }

        // inode bitmap: the reserved inodes and every inode in use
        let bitmap_at = image.block_offset(4);
        let in_use = (1..FIRST_INODE)
            .chain(inodes.iter().map(|(number, _)| *number))
            .collect::<BTreeSet<_>>();
        for &number in &in_use {
            let bit = (number - 1) as usize;
            image.bytes[bitmap_at + bit / 8] |= 1 << (bit % 8);
        }

        let free_blocks = num_blocks - used_blocks;
        let free_inodes = INODES_PER_GROUP - in_use.len() as u32;

        let descriptor = GroupDescriptor {
            block_bitmap: 3,
            inode_bitmap: 4,
            inode_table: INODE_TABLE,
            unallocated_blocks: free_blocks as u16,
            unallocated_inodes: free_inodes as u16,
            num_directories,
            ..Default::default()
        };
        let at = image.block_offset(2);
        let raw = bincode::serialize(&descriptor).unwrap();
        image.bytes[at..at + raw.len()].copy_from_slice(&raw);

        let superblock = Superblock {
            num_blocks,
            unallocated_blocks: free_blocks,
            unallocated_inodes: free_inodes,
            reserved_blocks: 0,
            inode_size: self.inode_size,
            incompat_flags: match self.format {
                EntryFormat::Typed => INCOMPAT_FILE_TYPE,
                EntryFormat::Legacy => 0,
            },
            ..sample_superblock()
        };
        let raw = bincode::serialize(&superblock).unwrap();
        image.bytes[BLOCK_SIZE..BLOCK_SIZE + raw.len()].copy_from_slice(&raw);

        image
    }
}

fn directory(inode: InodeNumber, parent: InodeNumber, index: Option<IndexShape>) -> Node {
    Node {
        mode: MODE_DIRECTORY | 0o755,
        links: 2,
        content: Content::Directory {
            entries: vec![
                Entry {
                    inode,
                    name: ".".into(),
                    file_type: FileType::Directory,
                },
                Entry {
                    inode: parent,
                    name: "..".into(),
                    file_type: FileType::Directory,
                },
            ],
            index,
        },
    }
}

fn record_length(name: &str) -> usize {
    (DIRECTORY_ENTRY_HEADER_SIZE + name.len() + 3) & !3
}

/// Packs entries into blocks; the last record of each block runs to the end of the block.
fn encode_linear(entries: &[Entry], format: EntryFormat) -> Vec<Vec<u8>> {
    fn finish(block: &mut Vec<u8>, last: usize, blocks: &mut Vec<Vec<u8>>) {
        let stretched = (BLOCK_SIZE - last) as u16;
        block[last + 4..last + 6].copy_from_slice(&stretched.to_le_bytes());
        block.resize(BLOCK_SIZE, 0);
        blocks.push(std::mem::take(block));
    }

    let mut blocks = Vec::new();
    let mut block = Vec::new();
    let mut last = 0;

    for entry in entries {
        let len = record_length(&entry.name);
        if block.len() + len > BLOCK_SIZE {
            finish(&mut block, last, &mut blocks);
        }

        last = block.len();
        block.extend(encode_entry(
            format,
            entry.inode,
            &entry.name,
            entry.file_type,
            len as u16,
        ));
    }

    if block.is_empty() {
        // an empty leaf: one unused record spanning the block
        blocks.push(encode_entry(format, 0, "", FileType::Unknown, BLOCK_SIZE as u16));
    } else {
        finish(&mut block, last, &mut blocks);
    }

    blocks
}

/// Root block, optional interior node, then the leaves. Hashes are made up but increasing.
fn encode_indexed(entries: &[Entry], shape: &IndexShape, format: EntryFormat) -> Vec<Vec<u8>> {
    let (dots, rest) = entries.split_at(2);

    let mut leaves = rest
        .chunks(shape.entries_per_leaf)
        .map(|chunk| {
            let blocks = encode_linear(chunk, format);
            assert_eq!(blocks.len(), 1, "leaf overflows a block");
            blocks.into_iter().next().unwrap()
        })
        .collect::<Vec<_>>();
    if leaves.is_empty() {
        leaves.push(encode_linear(&[], format).remove(0));
    }

    let first_leaf = if shape.interior { 2 } else { 1 };
    let leaf_blocks = (first_leaf..first_leaf + leaves.len() as u32).collect::<Vec<_>>();

    let mut root = encode_entry(format, dots[0].inode, ".", FileType::Directory, 12);
    root.extend(encode_entry(
        format,
        dots[1].inode,
        "..",
        FileType::Directory,
        (BLOCK_SIZE - 12) as u16,
    ));

    let header = HashTreeHeader {
        hash_version: 1,
        info_length: HASH_TREE_HEADER_SIZE as u8,
        indirect_levels: shape.interior as u8,
        ..Default::default()
    };
    let raw = bincode::serialize(&header).unwrap();
    root[HASH_TREE_HEADER_OFFSET..HASH_TREE_HEADER_OFFSET + raw.len()].copy_from_slice(&raw);

    let root_records_at = HASH_TREE_HEADER_OFFSET + HASH_TREE_HEADER_SIZE;
    let root_limit = ((BLOCK_SIZE - root_records_at) / 8) as u16;
    let root_children = if shape.interior { vec![1] } else { leaf_blocks.clone() };
    let raw = node_records(&root_children, root_limit);
    root[root_records_at..root_records_at + raw.len()].copy_from_slice(&raw);

    let mut blocks = vec![root];

    if shape.interior {
        let mut node = encode_entry(format, 0, "", FileType::Unknown, BLOCK_SIZE as u16);
        let limit = ((BLOCK_SIZE - HASH_TREE_NODE_OFFSET) / 8) as u16;
        let raw = node_records(&leaf_blocks, limit);
        node[HASH_TREE_NODE_OFFSET..HASH_TREE_NODE_OFFSET + raw.len()].copy_from_slice(&raw);
        blocks.push(node);
    }

    blocks.extend(leaves);
    blocks
}

/// A count record followed by hash-ranged entries for `children[1..]`.
fn node_records(children: &[u32], limit: u16) -> Vec<u8> {
    let mut raw = bincode::serialize(&HashTreeCount {
        limit,
        count: children.len() as u16,
        block: children[0],
    })
    .unwrap();

    for (i, &block) in children.iter().enumerate().skip(1) {
        raw.extend(
            bincode::serialize(&HashTreeEntry {
                min_hash: (i as u32) << 24,
                block,
            })
            .unwrap(),
        );
    }

    raw
}

struct Placed {
    pointers: [u32; NUM_BLOCK_POINTERS],
    /// Physical data blocks in logical order, holes left out.
    data: Vec<u32>,
    /// Data and indirect blocks.
    allocated: u32,
}

/// Appends blocks to the image.
struct BlockWriter {
    bytes: Vec<u8>,
}

impl BlockWriter {
    fn len(&self) -> u32 {
        (self.bytes.len() / BLOCK_SIZE) as u32
    }

    fn append(&mut self, block: &[u8]) -> u32 {
        let number = self.len();
        self.bytes.extend_from_slice(block);
        self.bytes.resize((number as usize + 1) * BLOCK_SIZE, 0);
        number
    }

    fn append_pointers(&mut self, pointers: &[u32]) -> u32 {
        let raw = pointers
            .iter()
            .flat_map(|pointer| pointer.to_le_bytes())
            .collect::<Vec<_>>();
        self.append(&raw)
    }

    /// Writes a file's blocks and the indirect blocks mapping them.
    fn place(&mut self, blocks: Vec<Option<Vec<u8>>>) -> Placed {
        let mut pointers = [0; NUM_BLOCK_POINTERS];
        let mut data = Vec::new();
        let mut single = Vec::new();
        let mut double: Vec<Vec<u32>> = Vec::new();

        for (logical, block) in blocks.into_iter().enumerate() {
            let physical = match block {
                Some(block) => {
                    let number = self.append(&block);
                    data.push(number);
                    number
                }
                None => 0,
            };

            if logical < NUM_DIRECT {
                pointers[logical] = physical;
            } else if logical < NUM_DIRECT + POINTERS_PER_BLOCK {
                single.push(physical);
            } else {
                let index = logical - NUM_DIRECT - POINTERS_PER_BLOCK;
                assert!(index < POINTERS_PER_BLOCK * POINTERS_PER_BLOCK);
                if index % POINTERS_PER_BLOCK == 0 {
                    double.push(Vec::new());
                }
                double.last_mut().unwrap().push(physical);
            }
        }

        let mut allocated = data.len() as u32;

        if !single.is_empty() {
            pointers[SINGLE_INDIRECT] = self.append_pointers(&single);
            allocated += 1;
        }

        if !double.is_empty() {
            let children = double
                .iter()
                .map(|child| self.append_pointers(child))
                .collect::<Vec<_>>();
            allocated += children.len() as u32 + 1;
            pointers[DOUBLE_INDIRECT] = self.append_pointers(&children);
        }

        Placed {
            pointers,
            data,
            allocated,
        }
    }
}

pub(crate) struct Layout {
    pub(crate) inode_table: u32,
    pub(crate) inodes_per_group: u32,
    pub(crate) inode_size: usize,
    /// Data blocks of each inode, in logical order.
    pub(crate) data_blocks: HashMap<InodeNumber, Vec<u32>>,
}

pub(crate) struct TestImage {
    pub(crate) bytes: Vec<u8>,
    pub(crate) layout: Layout,
}

impl TestImage {
    pub(crate) fn device(&self) -> BlockIo<MemorySource> {
        BlockIo::new(MemorySource::new(self.bytes.clone(), 512)).unwrap()
    }

    pub(crate) fn block_offset(&self, block: u32) -> usize {
        block as usize * BLOCK_SIZE
    }

    pub(crate) fn inode_offset(&self, inode: InodeNumber) -> usize {
        self.block_offset(self.layout.inode_table)
            + (inode as usize - 1) * self.layout.inode_size
    }

    fn write_inode(&mut self, number: InodeNumber, inode: &Inode) {
        let at = self.inode_offset(number);
        let raw = bincode::serialize(inode).unwrap();
        self.bytes[at..at + raw.len()].copy_from_slice(&raw);
    }

    /// Rewrites inode `number` in place.
    pub(crate) fn update_inode<F: FnOnce(&mut Inode)>(&mut self, number: InodeNumber, update: F) {
        let at = self.inode_offset(number);
        let mut inode: Inode = bincode::deserialize(&self.bytes[at..]).unwrap();
        update(&mut inode);
        self.write_inode(number, &inode);
    }
}
