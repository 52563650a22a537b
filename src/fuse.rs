use std::ffi::OsStr;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, FUSE_ROOT_ID,
};
use libc::{EINVAL, EROFS};
use log::{debug, warn};

use crate::disk_format::directory_entry::{self, DirectoryEntry};
use crate::disk_format::inode::{InodeNumber, ROOT_INODE};
use crate::error::Ext3Error;
use crate::ext3::Ext3Fs;
use crate::metadata::Stat;
use crate::storage::RawBlockSource;

/// Serves an [`Ext3Fs`] over FUSE, read-only.
///
/// FUSE reserves inode 1 for the mount root, so that number stands in for ext3's root inode.
pub struct Ext3Mount<S: RawBlockSource> {
    fs: Ext3Fs<S>,
    first_free_handle: u64,
}

impl<S: RawBlockSource> Ext3Mount<S> {
    const TTL: Duration = Duration::new(1, 0);
    const GENERATION: u64 = 1;

    pub fn new(fs: Ext3Fs<S>) -> Ext3Mount<S> {
        Ext3Mount {
            fs,
            first_free_handle: 0,
        }
    }

    fn get_attributes(&mut self, inum: InodeNumber) -> Result<FileAttr> {
        let stat = self.fs.stat_inode(inum)?;
        Ok(to_attr(&stat))
    }

    fn lookup_entry(&mut self, parent: InodeNumber, name: &OsStr) -> Result<Option<FileAttr>> {
        let Some(name) = name.to_str() else {
            bail!(Ext3Error::InvalidArgument(format!("{name:?} is not valid UTF-8")));
        };

        match self.fs.lookup(parent, name)? {
            Some(entry) => Ok(Some(self.get_attributes(entry.inode)?)),
            None => Ok(None),
        }
    }

    fn read_directory(
        &mut self,
        inum: InodeNumber,
        offset: usize,
    ) -> Result<Vec<(DirectoryEntry, directory_entry::FileType)>> {
        let entries = self.fs.read_dir_inode(inum)?;
        Ok(entries.into_iter().skip(offset).collect())
    }

    fn assign_file_handle(&mut self) -> u64 {
        let assigned = self.first_free_handle;
        self.first_free_handle += 1;

        assigned
    }
}

fn to_ext3_inode(ino: u64) -> InodeNumber {
    if ino == FUSE_ROOT_ID {
        ROOT_INODE
    } else {
        ino as InodeNumber
    }
}

fn to_fuse_inode(inum: InodeNumber) -> u64 {
    if inum == ROOT_INODE {
        FUSE_ROOT_ID
    } else {
        inum as u64
    }
}

fn to_kind(file_type: directory_entry::FileType) -> FileType {
    use directory_entry::FileType as Ext3Type;

    match file_type {
        Ext3Type::Directory => FileType::Directory,
        Ext3Type::Symlink => FileType::Symlink,
        Ext3Type::CharDevice => FileType::CharDevice,
        Ext3Type::BlockDevice => FileType::BlockDevice,
        Ext3Type::Fifo => FileType::NamedPipe,
        Ext3Type::Socket => FileType::Socket,
        Ext3Type::Regular | Ext3Type::Unknown => FileType::RegularFile,
    }
}

fn to_attr(stat: &Stat) -> FileAttr {
    FileAttr {
        ino: to_fuse_inode(stat.inode),
        size: stat.size,
        blocks: stat.blocks,
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: SystemTime::UNIX_EPOCH,
        kind: to_kind(stat.file_type),
        perm: stat.permissions,
        nlink: stat.links as u32,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        flags: 0,
        blksize: stat.block_size as u32,
    }
}

fn errno(err: &anyhow::Error) -> i32 {
    debug!("fuse request failed: {err:#}");
    Ext3Error::errno_of(err)
}

impl<S: RawBlockSource> Filesystem for Ext3Mount<S> {
    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.stat_fs();

        reply.statfs(
            stats.blocks,
            stats.free_blocks,
            stats.available_blocks,
            stats.inodes,
            stats.free_inodes,
            stats.block_size as u32,
            stats.name_max,
            stats.block_size as u32,
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_entry(to_ext3_inode(parent), name) {
            Ok(Some(attr)) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(EROFS);
            return;
        }

        let handle = self.assign_file_handle();
        reply.opened(handle, flags as u32);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, flags: i32, reply: ReplyOpen) {
        let handle = self.assign_file_handle();
        reply.opened(handle, flags as u32);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.get_attributes(to_ext3_inode(ino)) {
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(EROFS);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };

        match self
            .fs
            .read_inode_range(to_ext3_inode(ino), offset, size as usize)
        {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let offset = offset.max(0) as usize;
        let entries = match self.read_directory(to_ext3_inode(ino), offset) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(errno(&err));
                return;
            }
        };

        entries
            .into_iter()
            .enumerate()
            .try_for_each(|(i, (entry, file_type))| {
                let is_buffer_full = reply.add(
                    to_fuse_inode(entry.inode),
                    (offset + i + 1) as i64,
                    to_kind(file_type),
                    &entry.name,
                );

                if is_buffer_full {
                    return ControlFlow::Break(());
                }

                ControlFlow::Continue(())
            });

        reply.ok();
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.fs.readlink_inode(to_ext3_inode(ino)) {
            Ok(target) => reply.data(&target),
            Err(err) => reply.error(errno(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        warn!("refusing write to inode {ino}");
        reply.error(EROFS);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(EROFS);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(EROFS);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(EROFS);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _link: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(EROFS);
    }
}
