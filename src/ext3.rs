use std::io::SeekFrom;
use std::rc::Rc;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use log::debug;
use lru::LruCache;

use crate::directory::Directory;
use crate::disk_format::directory_entry::{DirectoryEntry, FileType, MAX_NAME_LEN};
use crate::disk_format::inode::{Inode, InodeNumber, ROOT_INODE};
use crate::disk_format::superblock::{Superblock, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::error::Ext3Error;
use crate::metadata::{FsStats, Stat};
use crate::options::{capacity, Ext3Options};
use crate::storage::{BlockIo, RawBlockSource};
use crate::volume::Volume;

/// A read-only ext3 filesystem, addressed by path.
///
/// Paths are absolute, `/`- or `\`-separated, and may carry a leading drive letter (`C:/x`),
/// which is ignored. `.` and `..` components are folded away before lookup, so `/d1/..` is
/// `/`. Resolved directories and looked-up entries are kept in bounded LRU caches keyed by the
/// normalized path; directories opened by inode number have a cache of their own.
pub struct Ext3Fs<S: RawBlockSource> {
    volume: Volume<S>,
    root: Rc<Directory>,
    dir_cache: LruCache<String, Rc<Directory>>,
    entry_cache: LruCache<String, Option<DirectoryEntry>>,
    inode_dir_cache: LruCache<InodeNumber, Rc<Directory>>,
    cache_hits: u64,
}

impl<S: RawBlockSource> Ext3Fs<S> {
    /// Whether `device` holds an ext3 superblock. Never fails; anything unreadable or
    /// malformed is `false`.
    pub fn matches(device: &mut BlockIo<S>) -> bool {
        let found = device
            .seek(SeekFrom::Start(SUPERBLOCK_OFFSET))
            .and_then(|_| device.read(SUPERBLOCK_SIZE));
        let _ = device.seek(SeekFrom::Start(0));

        match found {
            Ok(Some(raw)) => Superblock::probe(&raw) && Superblock::parse(&raw).is_ok(),
            _ => false,
        }
    }

    pub fn new(device: BlockIo<S>) -> Result<Ext3Fs<S>> {
        Self::with_options(device, Ext3Options::default())
    }

    pub fn with_options(device: BlockIo<S>, options: Ext3Options) -> Result<Ext3Fs<S>> {
        let mut volume = Volume::open(device, &options)?;
        let root = Directory::open(&mut volume, ROOT_INODE).context("opening root directory")?;

        Ok(Ext3Fs {
            volume,
            root: Rc::new(root),
            dir_cache: LruCache::new(capacity(options.path_cache_size)),
            entry_cache: LruCache::new(capacity(options.path_cache_size)),
            inode_dir_cache: LruCache::new(capacity(options.path_cache_size)),
            cache_hits: 0,
        })
    }

    pub fn volume(&mut self) -> &mut Volume<S> {
        &mut self.volume
    }

    pub fn root(&self) -> &Directory {
        &self.root
    }

    /// Number of lookups answered from the path caches.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn close(self) -> Result<()> {
        self.volume.close()
    }

    // Directory operations

    /// The names in directory `path`, sorted, or `None` if there is no such directory.
    pub fn dir_entries(&mut self, path: &str) -> Result<Option<Vec<String>>> {
        match self.get_dir(path)? {
            Some(dir) => dir.names().map(Some),
            None => Ok(None),
        }
    }

    /// Calls `visit` with each name in directory `path`. Returns whether the directory exists.
    pub fn dir_foreach<F: FnMut(&str)>(&mut self, path: &str, mut visit: F) -> Result<bool> {
        let Some(names) = self.dir_entries(path)? else {
            return Ok(false);
        };

        names.iter().for_each(|name| visit(name));

        Ok(true)
    }

    pub fn dir_exist(&mut self, path: &str) -> Result<bool> {
        Ok(self.get_dir(path)?.is_some())
    }

    pub fn dir_mkdir(&mut self, _path: &str, _permissions: u32) -> Result<()> {
        bail!(Ext3Error::ReadOnly("mkdir"))
    }

    pub fn dir_delete(&mut self, _path: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("rmdir"))
    }

    // File operations

    pub fn file_exist(&mut self, path: &str) -> Result<bool> {
        Ok(self.get_file(path)?.is_some())
    }

    pub fn file_size(&mut self, path: &str) -> Result<Option<u64>> {
        Ok(self.file_inode(path)?.map(|inode| inode.size()))
    }

    /// Whether `path` exists and is a directory.
    pub fn file_directory(&mut self, path: &str) -> Result<bool> {
        Ok(self.file_inode(path)?.is_some_and(|inode| inode.is_dir()))
    }

    /// Whether `path` exists and is a regular file.
    pub fn file_file(&mut self, path: &str) -> Result<bool> {
        Ok(self.file_inode(path)?.is_some_and(|inode| inode.is_file()))
    }

    /// Whether `path` exists and is a symbolic link.
    pub fn file_symlink(&mut self, path: &str) -> Result<bool> {
        Ok(self.file_inode(path)?.is_some_and(|inode| inode.is_symlink()))
    }

    pub fn file_atime(&mut self, path: &str) -> Result<Option<SystemTime>> {
        Ok(self.file_inode(path)?.map(|inode| inode.accessed()))
    }

    pub fn file_ctime(&mut self, path: &str) -> Result<Option<SystemTime>> {
        Ok(self.file_inode(path)?.map(|inode| inode.changed()))
    }

    pub fn file_mtime(&mut self, path: &str) -> Result<Option<SystemTime>> {
        Ok(self.file_inode(path)?.map(|inode| inode.modified()))
    }

    /// Metadata of `path` itself (links are not followed). Fails with
    /// [`Ext3Error::NotFound`] if it does not exist.
    pub fn file_lstat(&mut self, path: &str) -> Result<Stat> {
        let entry = self.require_file(path)?;
        self.stat_inode(entry.inode)
    }

    /// The target of symbolic link `path`.
    pub fn file_readlink(&mut self, path: &str) -> Result<Vec<u8>> {
        let entry = self.require_file(path)?;
        self.readlink_inode(entry.inode)
    }

    /// Up to `len` bytes of file `path` at `offset`.
    pub fn file_read(&mut self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let entry = self.require_file(path)?;
        self.read_inode_range(entry.inode, offset, len)
    }

    pub fn file_delete(&mut self, _path: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("unlink"))
    }

    pub fn file_chmod(&mut self, _permissions: u32, _path: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("chmod"))
    }

    pub fn file_chown(&mut self, _uid: u32, _gid: u32, _path: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("chown"))
    }

    pub fn file_rename(&mut self, _from: &str, _to: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("rename"))
    }

    pub fn file_link(&mut self, _from: &str, _to: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("link"))
    }

    pub fn file_make_symlink(&mut self, _target: &str, _path: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("symlink"))
    }

    pub fn file_truncate(&mut self, _path: &str, _len: u64) -> Result<()> {
        bail!(Ext3Error::ReadOnly("truncate"))
    }

    pub fn file_utime(&mut self, _atime: SystemTime, _mtime: SystemTime, _path: &str) -> Result<()> {
        bail!(Ext3Error::ReadOnly("utime"))
    }

    // Inode-addressed operations

    /// Looks `name` up in directory `parent`.
    pub fn lookup(&mut self, parent: InodeNumber, name: &str) -> Result<Option<DirectoryEntry>> {
        let dir = self.dir_by_inode(parent)?;
        dir.find_entry(&mut self.volume, name, None)
    }

    pub fn stat_inode(&mut self, number: InodeNumber) -> Result<Stat> {
        let inode = self.volume.get_inode(number)?;
        Ok(Stat::new(number, &inode, self.volume.block_size()))
    }

    /// The entries of directory `number` in on-disk order, each with its resolved type.
    pub fn read_dir_inode(&mut self, number: InodeNumber) -> Result<Vec<(DirectoryEntry, FileType)>> {
        let dir = self.dir_by_inode(number)?;

        dir.entries()?
            .iter()
            .map(|entry| Ok((entry.clone(), self.volume.entry_type(entry)?)))
            .collect()
    }

    pub fn read_inode_range(&mut self, number: InodeNumber, offset: u64, len: usize) -> Result<Vec<u8>> {
        let inode = self.volume.get_inode(number)?;
        if inode.is_dir() {
            bail!(Ext3Error::InvalidArgument(format!(
                "inode {number} is a directory"
            )));
        }

        self.volume.read_range(&inode, offset, len)
    }

    pub fn readlink_inode(&mut self, number: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.volume.get_inode(number)?;
        self.volume.read_symlink(&inode)
    }

    pub fn stat_fs(&self) -> FsStats {
        let superblock = self.volume.superblock();
        let free_blocks = superblock.unallocated_blocks as u64;

        FsStats {
            blocks: superblock.num_blocks as u64,
            free_blocks,
            available_blocks: free_blocks.saturating_sub(superblock.reserved_blocks as u64),
            inodes: superblock.num_inodes as u64,
            free_inodes: superblock.unallocated_inodes as u64,
            block_size: superblock.block_size(),
            name_max: MAX_NAME_LEN as u32,
        }
    }

    /// Directory `number`, decoded once and then served from the inode-keyed cache.
    fn dir_by_inode(&mut self, number: InodeNumber) -> Result<Rc<Directory>> {
        if number == ROOT_INODE {
            return Ok(Rc::clone(&self.root));
        }

        if let Some(cached) = self.inode_dir_cache.get(&number) {
            self.cache_hits += 1;
            return Ok(Rc::clone(cached));
        }

        let dir = Rc::new(Directory::open(&mut self.volume, number)?);
        self.inode_dir_cache.put(number, Rc::clone(&dir));

        Ok(dir)
    }

    // Path resolution

    /// Resolves directory `path`, or `None` if some component is missing or not a directory.
    fn get_dir(&mut self, path: &str) -> Result<Option<Rc<Directory>>> {
        self.resolve_dir(&segments(path))
    }

    /// Starts from the longest cached prefix of `names` and resolves the rest one component
    /// at a time, caching each directory on the way.
    fn resolve_dir(&mut self, names: &[&str]) -> Result<Option<Rc<Directory>>> {
        let mut dir = Rc::clone(&self.root);
        let mut resolved = 0;

        for end in (1..=names.len()).rev() {
            if let Some(cached) = self.dir_cache.get(&names[..end].join("/")) {
                self.cache_hits += 1;
                dir = Rc::clone(cached);
                resolved = end;
                break;
            }
        }

        for end in resolved + 1..=names.len() {
            let key = names[..end].join("/");
            let Some(entry) =
                dir.find_entry(&mut self.volume, names[end - 1], Some(FileType::Directory))?
            else {
                debug!("directory {key:?} not found");
                return Ok(None);
            };

            let next = self
                .dir_by_inode(entry.inode)
                .with_context(|| format!("opening directory {key:?}"))?;
            self.dir_cache.put(key, Rc::clone(&next));
            dir = next;
        }

        Ok(Some(dir))
    }

    /// Looks up the entry for `path`. The root itself is the `.` entry of the root directory.
    fn get_file(&mut self, path: &str) -> Result<Option<DirectoryEntry>> {
        let mut names = segments(path);
        let leaf = names.pop().unwrap_or(".");
        let key = names
            .iter()
            .chain(std::iter::once(&leaf))
            .copied()
            .collect::<Vec<_>>()
            .join("/");

        if let Some(cached) = self.entry_cache.get(&key) {
            self.cache_hits += 1;
            return Ok(cached.clone());
        }

        let entry = match self.resolve_dir(&names)? {
            Some(dir) => dir.find_entry(&mut self.volume, leaf, None)?,
            None => None,
        };

        self.entry_cache.put(key, entry.clone());

        Ok(entry)
    }

    fn require_file(&mut self, path: &str) -> Result<DirectoryEntry> {
        match self.get_file(path)? {
            Some(entry) => Ok(entry),
            None => bail!(Ext3Error::NotFound(path.to_string())),
        }
    }

    fn file_inode(&mut self, path: &str) -> Result<Option<Inode>> {
        match self.get_file(path)? {
            Some(entry) => self.volume.get_inode(entry.inode).map(Some),
            None => Ok(None),
        }
    }
}

/// The components of an absolute path, without a drive-letter prefix, empty components or
/// `.`. A `..` removes the component before it and stays at the root.
fn segments(path: &str) -> Vec<&str> {
    let path = match path.as_bytes() {
        [drive, b':', ..] if drive.is_ascii_alphabetic() => &path[2..],
        _ => path,
    };

    let mut names = Vec::new();
    for name in path.split(['/', '\\']) {
        match name {
            "" | "." => {}
            ".." => {
                names.pop();
            }
            name => names.push(name),
        }
    }

    names
}
