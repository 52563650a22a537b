use std::fmt;
use std::mem::size_of;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use super::inode::{
    InodeNumber, MODE_BLOCK_DEVICE, MODE_CHAR_DEVICE, MODE_DIRECTORY, MODE_FIFO, MODE_REGULAR,
    MODE_SOCKET, MODE_SYMLINK, MODE_TYPE_MASK,
};
use crate::error::Ext3Error;

/// The number of bytes in a directory entry header. Both shapes have the same size; the
/// name follows the header.
pub const DIRECTORY_ENTRY_HEADER_SIZE: usize = 8;
const_assert!(size_of::<LegacyEntryHeader>() == DIRECTORY_ENTRY_HEADER_SIZE);
const_assert!(size_of::<TypedEntryHeader>() == DIRECTORY_ENTRY_HEADER_SIZE);

/// The maximum length of an entry name.
pub const MAX_NAME_LEN: usize = 255;

/// Which of the two directory-entry wire shapes an image uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryFormat {
    /// 16-bit name length, no type field.
    Legacy,
    /// 8-bit name length followed by an 8-bit file type code.
    Typed,
}

/// File type codes, as stored in typed directory entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileType {
    #[default]
    Unknown = 0,
    Regular = 1,
    Directory = 2,
    CharDevice = 3,
    BlockDevice = 4,
    Fifo = 5,
    Socket = 6,
    Symlink = 7,
}

impl FileType {
    /// The type named by a directory entry's type byte. Codes this decoder does not know read
    /// as [`FileType::Unknown`], which defers to the inode.
    pub fn from_code(code: u8) -> FileType {
        match code {
            1 => FileType::Regular,
            2 => FileType::Directory,
            3 => FileType::CharDevice,
            4 => FileType::BlockDevice,
            5 => FileType::Fifo,
            6 => FileType::Socket,
            7 => FileType::Symlink,
            _ => FileType::Unknown,
        }
    }

    /// The file type encoded in an inode's mode bits.
    pub fn from_mode(mode: u16) -> FileType {
        match mode & MODE_TYPE_MASK {
            MODE_FIFO => FileType::Fifo,
            MODE_CHAR_DEVICE => FileType::CharDevice,
            MODE_DIRECTORY => FileType::Directory,
            MODE_BLOCK_DEVICE => FileType::BlockDevice,
            MODE_REGULAR => FileType::Regular,
            MODE_SYMLINK => FileType::Symlink,
            MODE_SOCKET => FileType::Socket,
            _ => FileType::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FileType::Unknown => "unknown",
            FileType::Regular => "file",
            FileType::Directory => "directory",
            FileType::CharDevice => "char",
            FileType::BlockDevice => "block",
            FileType::Fifo => "fifo",
            FileType::Socket => "socket",
            FileType::Symlink => "symlink",
        };

        write!(f, "{name}")
    }
}

/// Directory entry header on images without the file type feature.
#[derive(Debug, Serialize, Deserialize)]
#[repr(C)]
pub struct LegacyEntryHeader {
    pub inode: u32,
    pub record_length: u16,
    pub name_length: u16,
}

/// Directory entry header on images with the file type feature.
#[derive(Debug, Serialize, Deserialize)]
#[repr(C)]
pub struct TypedEntryHeader {
    pub inode: u32,
    pub record_length: u16,
    pub name_length: u8,
    pub file_type: u8,
}

/// One decoded (name → inode) binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// The inode the entry points to. Zero marks an unused record.
    pub inode: InodeNumber,
    /// Distance to the next record.
    pub record_length: u16,
    pub name: String,
    /// The type recorded in the entry itself. Always `None` for [`EntryFormat::Legacy`]; may
    /// be stale for [`EntryFormat::Typed`], see [`crate::volume::Volume::entry_type`].
    pub file_type: Option<FileType>,
}

impl DirectoryEntry {
    /// Decodes the entry at the start of `buf`.
    ///
    /// Fails if the record length is zero (a scan could never move past it), too short to
    /// hold the name, or longer than `buf`.
    pub fn parse(buf: &[u8], format: EntryFormat) -> Result<DirectoryEntry> {
        let (inode, record_length, name_length, file_type) = match format {
            EntryFormat::Legacy => {
                let header: LegacyEntryHeader = super::decode(buf, "directory entry")?;
                (
                    header.inode,
                    header.record_length,
                    header.name_length as usize,
                    None,
                )
            }
            EntryFormat::Typed => {
                let header: TypedEntryHeader = super::decode(buf, "directory entry")?;
                (
                    header.inode,
                    header.record_length,
                    header.name_length as usize,
                    Some(FileType::from_code(header.file_type)),
                )
            }
        };

        ensure!(
            record_length != 0,
            Ext3Error::Corrupt("directory entry has a record length of 0".into())
        );

        let record_length_usize = record_length as usize;
        ensure!(
            DIRECTORY_ENTRY_HEADER_SIZE + name_length <= record_length_usize,
            Ext3Error::Corrupt(format!(
                "directory entry name ({name_length} bytes) overruns its record ({record_length} bytes)"
            ))
        );
        ensure!(
            record_length_usize <= buf.len(),
            Ext3Error::Corrupt(format!(
                "directory entry record ({record_length} bytes) overruns the directory data"
            ))
        );

        let name_bytes =
            &buf[DIRECTORY_ENTRY_HEADER_SIZE..DIRECTORY_ENTRY_HEADER_SIZE + name_length];

        Ok(DirectoryEntry {
            inode,
            record_length,
            name: String::from_utf8_lossy(name_bytes).into_owned(),
            file_type,
        })
    }

    /// Whether the record is an unused slot rather than a live binding.
    pub fn is_unused(&self) -> bool {
        self.inode == 0
    }

    pub fn is_dot_or_dot_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}
