use std::time::SystemTime;

use crate::disk_format::directory_entry::FileType;
use crate::disk_format::inode::{Inode, InodeNumber};

/// What `lstat` reports about one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub inode: InodeNumber,
    pub file_type: FileType,
    pub size: u64,
    pub permissions: u16,
    pub uid: u32,
    pub gid: u32,
    pub links: u16,
    /// Space in use, in 512-byte sectors.
    pub blocks: u64,
    /// The filesystem block size.
    pub block_size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Stat {
    pub fn new(number: InodeNumber, inode: &Inode, block_size: u64) -> Stat {
        // Linux keeps the high halves of the owner ids in the second OS-specific area
        let high = |at: usize| {
            u16::from_le_bytes([inode.os_specific2[at], inode.os_specific2[at + 1]]) as u32
        };

        Stat {
            inode: number,
            file_type: inode.file_type(),
            size: inode.size(),
            permissions: inode.permissions(),
            uid: high(4) << 16 | inode.uid as u32,
            gid: high(6) << 16 | inode.gid as u32,
            links: inode.links_count,
            blocks: inode.sectors as u64,
            block_size,
            atime: inode.accessed(),
            mtime: inode.modified(),
            ctime: inode.changed(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }
}

/// Whole-filesystem figures, as `statfs` reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub free_blocks: u64,
    /// Free blocks usable by unprivileged users.
    pub available_blocks: u64,
    pub inodes: u64,
    pub free_inodes: u64,
    pub block_size: u64,
    pub name_max: u32,
}
