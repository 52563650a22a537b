use std::mem::size_of;

use anyhow::{bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::disk_format::directory_entry::EntryFormat;
use crate::disk_format::group_descriptor::GROUP_DESCRIPTOR_SIZE;
use crate::disk_format::inode::LEGACY_INODE_SIZE;
use crate::error::Ext3Error;

/// Byte offset of the superblock from the start of the image.
pub const SUPERBLOCK_OFFSET: u64 = 1024;

/// The number of bytes reserved for the superblock on disk.
pub const SUPERBLOCK_SIZE: usize = 1024;

/// The number of bytes decoded by [`Superblock`]. The rest of the on-disk record is reserved.
pub const SUPERBLOCK_DECODED_SIZE: usize = 264;
const_assert!(size_of::<Superblock>() == SUPERBLOCK_DECODED_SIZE);

/// The number of bytes needed by [`Superblock::probe`].
pub const SUPERBLOCK_PROBE_SIZE: usize = 62;
const_assert!(size_of::<SuperblockProbe>() == SUPERBLOCK_PROBE_SIZE);

pub const SUPERBLOCK_SIGNATURE: u16 = 0xef53;

/// Filesystem state bits.
pub const STATE_CLEAN: u16 = 0x0001;
pub const STATE_HAS_ERRORS: u16 = 0x0002;
pub const STATE_RECOVERING_ORPHANS: u16 = 0x0004;
pub const STATE_MAX: u16 = STATE_CLEAN | STATE_HAS_ERRORS | STATE_RECOVERING_ORPHANS;

/// Error handling methods.
pub const ERRORS_CONTINUE: u16 = 1;
pub const ERRORS_REMOUNT_READ_ONLY: u16 = 2;
pub const ERRORS_PANIC: u16 = 3;

/// Major revisions. Fields past `reserved_gid` are only meaningful for dynamic revisions.
pub const REVISION_ORIGINAL: u32 = 0;
pub const REVISION_DYNAMIC: u32 = 1;

/// Compatible feature flags.
pub const COMPAT_PREALLOC_DIR_BLOCKS: u32 = 0x0001;
pub const COMPAT_AFS_SERVER_INODES: u32 = 0x0002;
pub const COMPAT_HAS_JOURNAL: u32 = 0x0004;
pub const COMPAT_EXTENDED_ATTRIBUTES: u32 = 0x0008;
pub const COMPAT_RESIZE_INODE: u32 = 0x0010;
pub const COMPAT_DIR_INDEX: u32 = 0x0020;

/// Incompatible feature flags.
pub const INCOMPAT_COMPRESSION: u32 = 0x0001;
pub const INCOMPAT_FILE_TYPE: u32 = 0x0002;
pub const INCOMPAT_NEEDS_RECOVERY: u32 = 0x0004;
pub const INCOMPAT_JOURNAL_DEVICE: u32 = 0x0008;
pub const INCOMPAT_META_BG: u32 = 0x0010;
pub const INCOMPAT_EXTENTS: u32 = 0x0040;
pub const INCOMPAT_64BIT: u32 = 0x0080;
pub const INCOMPAT_FLEX_BG: u32 = 0x0200;

/// Read-only compatible feature flags.
pub const RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
pub const RO_COMPAT_LARGE_FILE: u32 = 0x0002;
pub const RO_COMPAT_BTREE_DIR: u32 = 0x0004;

/// The superblock, as laid out on disk (little-endian).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Superblock {
    pub num_inodes: u32,
    pub num_blocks: u32,
    /// Blocks reserved to keep the filesystem from filling up.
    pub reserved_blocks: u32,
    pub unallocated_blocks: u32,
    pub unallocated_inodes: u32,
    /// The block that block group zero starts at.
    pub first_data_block: u32,
    /// Block size, stored as the number of bits to shift 1024 left.
    pub block_size_shift: u32,
    /// Fragment size, stored as the number of bits to shift 1024 left.
    pub fragment_size_shift: u32,
    pub blocks_per_group: u32,
    pub fragments_per_group: u32,
    pub inodes_per_group: u32,
    pub last_mount_time: u32,
    pub last_write_time: u32,
    pub mount_count: u16,
    pub max_mount_count: u16,
    /// Always [`SUPERBLOCK_SIGNATURE`].
    pub signature: u16,
    /// `STATE_*` bits.
    pub state: u16,
    /// One of the `ERRORS_*` methods.
    pub error_method: u16,
    pub minor_revision: u16,
    pub last_check_time: u32,
    pub check_interval: u32,
    pub creator_os: u32,
    pub major_revision: u32,
    pub reserved_uid: u16,
    pub reserved_gid: u16,
    pub first_inode: u32,
    pub inode_size: u16,
    /// The group holding this copy of the superblock.
    pub block_group: u16,
    pub compat_flags: u32,
    pub incompat_flags: u32,
    pub ro_compat_flags: u32,
    pub volume_id: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mount_path: [[u8; 32]; 2],
    pub algorithm_bitmap: u32,
    pub file_prealloc_blocks: u8,
    pub dir_prealloc_blocks: u8,
    pub padding1: u16,
    pub journal_id: [u8; 16],
    pub journal_inode: u32,
    pub journal_device: u32,
    pub orphan_head: u32,
    pub hash_seed: [u32; 4],
    pub default_hash_version: u8,
    pub padding2: u8,
    pub padding3: u16,
    pub default_mount_options: u32,
    pub first_meta_block_group: u32,
}

/// The handful of superblock fields needed to tell whether an image is ext3 at all.
#[derive(Deserialize)]
#[repr(C)]
struct SuperblockProbe {
    _skipped: ([u8; 32], [u8; 24]),
    signature: u16,
    state: u16,
    error_method: u16,
}

impl Superblock {
    /// Checks the signature, state and error method of the superblock at the start of `buf`
    /// without decoding anything else. Never fails: a short or garbled buffer is just `false`.
    pub fn probe(buf: &[u8]) -> bool {
        match bincode::deserialize::<SuperblockProbe>(buf) {
            Ok(probe) => {
                probe.signature == SUPERBLOCK_SIGNATURE
                    && probe.state <= STATE_MAX
                    && probe.error_method <= ERRORS_PANIC
            }
            Err(_) => false,
        }
    }

    /// Decodes and validates the superblock at the start of `buf`.
    ///
    /// Anomalies the kernel would repair on its own (errors flag, orphan recovery) are only
    /// logged.
    pub fn parse(buf: &[u8]) -> Result<Superblock> {
        let superblock: Superblock = super::decode(buf, "superblock")?;

        if superblock.signature != SUPERBLOCK_SIGNATURE {
            bail!(Ext3Error::BadSignature(superblock.signature));
        }

        let state = superblock.state;
        if state > STATE_MAX {
            bail!(Ext3Error::BadState(state));
        }

        if state != STATE_CLEAN {
            if state & STATE_HAS_ERRORS != 0 {
                warn!("ext3 filesystem has errors");
            }

            if state & STATE_RECOVERING_ORPHANS != 0 {
                warn!("ext3 orphan inodes are being recovered");
            }

            if state & STATE_CLEAN == 0 {
                warn!("ext3 filesystem was not cleanly unmounted");
            }
        }

        if superblock.error_method > ERRORS_PANIC {
            bail!(Ext3Error::BadErrorMethod(superblock.error_method));
        }

        if superblock.incompat_flags & INCOMPAT_EXTENTS != 0 {
            bail!(Ext3Error::ExtentsUnsupported);
        }

        // anything larger would overflow the shift below; ext3 tops out at 64 KiB blocks
        if superblock.block_size_shift > 6 {
            bail!(Ext3Error::Corrupt(format!(
                "invalid block size shift: {}",
                superblock.block_size_shift
            )));
        }

        if superblock.blocks_per_group == 0 || superblock.inodes_per_group == 0 {
            bail!(Ext3Error::Corrupt(
                "block groups must contain blocks and inodes".into()
            ));
        }

        if superblock.is_dynamic() && (superblock.inode_size as usize) < LEGACY_INODE_SIZE {
            bail!(Ext3Error::Corrupt(format!(
                "inode size {} is smaller than an inode record",
                superblock.inode_size
            )));
        }

        Ok(superblock)
    }

    pub fn block_size(&self) -> u64 {
        1024 << self.block_size_shift
    }

    pub fn fragment_size(&self) -> u64 {
        1024u64.checked_shl(self.fragment_size_shift).unwrap_or(0)
    }

    /// The number of block groups: `num_blocks / blocks_per_group`, rounded up.
    pub fn group_count(&self) -> u32 {
        self.num_blocks.div_ceil(self.blocks_per_group)
    }

    pub fn is_dynamic(&self) -> bool {
        self.major_revision == REVISION_DYNAMIC
    }

    /// The size of one inode table record.
    pub fn inode_size(&self) -> usize {
        if self.is_dynamic() {
            self.inode_size as usize
        } else {
            LEGACY_INODE_SIZE
        }
    }

    pub fn uses_file_type_field(&self) -> bool {
        self.incompat_flags & INCOMPAT_FILE_TYPE != 0
    }

    /// The directory-entry wire shape in effect for the whole image.
    pub fn entry_format(&self) -> EntryFormat {
        if self.uses_file_type_field() {
            EntryFormat::Typed
        } else {
            EntryFormat::Legacy
        }
    }

    pub fn has_dir_index(&self) -> bool {
        self.compat_flags & COMPAT_DIR_INDEX != 0
    }

    pub fn has_journal(&self) -> bool {
        self.compat_flags & COMPAT_HAS_JOURNAL != 0
    }

    pub fn has_large_files(&self) -> bool {
        self.ro_compat_flags & RO_COMPAT_LARGE_FILE != 0
    }

    pub fn free_bytes(&self) -> u64 {
        self.unallocated_blocks as u64 * self.block_size()
    }

    /// Byte address of `block`.
    ///
    /// The address that aliases the superblock itself is redirected past the superblock and
    /// the group descriptor table that follows it.
    pub fn block_to_address(&self, block: u32) -> u64 {
        let address = block as u64 * self.block_size();

        if address == SUPERBLOCK_OFFSET {
            address + (SUPERBLOCK_SIZE + GROUP_DESCRIPTOR_SIZE * self.group_count() as usize) as u64
        } else {
            address
        }
    }

    /// The group holding `block`, and the block's index within the group.
    pub fn block_num_to_group(&self, block: u32) -> (u32, u32) {
        let relative = block.saturating_sub(self.first_data_block);
        (
            relative / self.blocks_per_group,
            relative % self.blocks_per_group,
        )
    }

    /// The group holding `inode`, and the inode's index within the group. Inodes are
    /// one-indexed.
    pub fn inode_num_to_group(&self, inode: u32) -> (u32, u32) {
        let index = inode.saturating_sub(1);
        (index / self.inodes_per_group, index % self.inodes_per_group)
    }

    pub fn first_group_block(&self, group: u32) -> u32 {
        group * self.blocks_per_group + self.first_data_block
    }

    /// The block holding the group descriptor table.
    pub fn group_descriptor_table_block(&self) -> u32 {
        if self.block_size() == 1024 {
            2
        } else {
            1
        }
    }

    /// The volume name without its NUL padding.
    pub fn volume_name(&self) -> String {
        trim_nul(&self.volume_name)
    }

    /// The path the filesystem was last mounted at, without its NUL padding.
    pub fn last_mount_path(&self) -> String {
        trim_nul(&self.last_mount_path.concat())
    }

    /// The volume id formatted as a UUID.
    pub fn volume_uuid(&self) -> String {
        format_uuid(&self.volume_id)
    }
}

fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn format_uuid(id: &[u8; 16]) -> String {
    let hex = |range: std::ops::Range<usize>| {
        id[range]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    };

    format!(
        "{}-{}-{}-{}-{}",
        hex(0..4),
        hex(4..6),
        hex(6..8),
        hex(8..10),
        hex(10..16)
    )
}
