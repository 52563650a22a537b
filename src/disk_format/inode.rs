use std::mem::size_of;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::directory_entry::FileType;

/// Inode numbers are one-indexed; zero means "no inode".
pub type InodeNumber = u32;

/// The size of an inode record on original-revision filesystems, and the number of bytes of
/// each record we decode.
pub const LEGACY_INODE_SIZE: usize = 128;
const_assert!(size_of::<Inode>() == LEGACY_INODE_SIZE);

pub const ROOT_INODE: InodeNumber = 2;

pub const NUM_BLOCK_POINTERS: usize = 15;
pub const NUM_DIRECT: usize = 12;
pub const SINGLE_INDIRECT: usize = 12;
pub const DOUBLE_INDIRECT: usize = 13;
pub const TRIPLE_INDIRECT: usize = 14;

/// Symlink targets shorter than this are stored in the block pointer area.
pub const FAST_SYMLINK_MAX: usize = NUM_BLOCK_POINTERS * 4;

/// File type bits of `mode`.
pub const MODE_TYPE_MASK: u16 = 0xf000;
pub const MODE_FIFO: u16 = 0x1000;
pub const MODE_CHAR_DEVICE: u16 = 0x2000;
pub const MODE_DIRECTORY: u16 = 0x4000;
pub const MODE_BLOCK_DEVICE: u16 = 0x6000;
pub const MODE_REGULAR: u16 = 0x8000;
pub const MODE_SYMLINK: u16 = 0xa000;
pub const MODE_SOCKET: u16 = 0xc000;

/// The directory is indexed by a hash tree.
pub const FLAG_INDEX: u32 = 0x0000_1000;
/// The inode maps its data with extents (ext4).
pub const FLAG_EXTENTS: u32 = 0x0008_0000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Inode {
    /// file type and permission bits
    pub mode: u16,
    pub uid: u16,
    /// low 32 bits of the file size in bytes
    pub size_low: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// number of 512-byte sectors in use, including metadata blocks
    pub sectors: u32,
    pub flags: u32,
    pub os_specific1: u32,
    /// 12 direct pointers followed by single, double and triple indirect pointers
    pub block: [u32; NUM_BLOCK_POINTERS],
    pub generation: u32,
    pub file_acl: u32,
    /// high 32 bits of the size of regular files
    pub size_high: u32,
    pub fragment_address: u32,
    pub os_specific2: [u8; 12],
}

impl Inode {
    /// The file type encoded in the mode bits.
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    /// Permission bits, including setuid, setgid and sticky.
    pub fn permissions(&self) -> u16 {
        self.mode & !MODE_TYPE_MASK
    }

    /// The size in bytes. `size_high` only extends regular files; for directories that field
    /// holds the directory ACL.
    pub fn size(&self) -> u64 {
        if self.is_file() {
            (self.size_high as u64) << 32 | self.size_low as u64
        } else {
            self.size_low as u64
        }
    }

    pub fn uses_extents(&self) -> bool {
        self.flags & FLAG_EXTENTS != 0
    }

    pub fn is_indexed(&self) -> bool {
        self.flags & FLAG_INDEX != 0
    }

    /// Whether this is a symlink whose target lives inline in [`Self::block`].
    pub fn is_fast_symlink(&self) -> bool {
        let extended_attribute_sectors = if self.file_acl != 0 { self.sectors.min(8) } else { 0 };

        self.is_symlink()
            && (self.size() as usize) < FAST_SYMLINK_MAX
            && self.sectors == extended_attribute_sectors
    }

    /// The inline target of a fast symlink.
    pub fn inline_data(&self) -> Vec<u8> {
        let bytes = self
            .block
            .iter()
            .flat_map(|pointer| pointer.to_le_bytes())
            .collect::<Vec<_>>();

        bytes[..(self.size() as usize).min(FAST_SYMLINK_MAX)].to_vec()
    }

    pub fn accessed(&self) -> SystemTime {
        to_system_time(self.atime)
    }

    pub fn changed(&self) -> SystemTime {
        to_system_time(self.ctime)
    }

    pub fn modified(&self) -> SystemTime {
        to_system_time(self.mtime)
    }
}

fn to_system_time(seconds: u32) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(seconds as u64)
}
