mod bitmap;
pub mod directory;
mod disk_format;
pub mod error;
pub mod ext3;
pub mod fuse;
pub mod group_descriptor_table;
pub mod metadata;
pub mod options;
pub mod storage;
pub mod volume;

#[cfg(test)]
mod test_image;

pub use disk_format::{directory_entry, group_descriptor, hash_tree, inode, superblock};
pub use error::Ext3Error;
pub use ext3::Ext3Fs;
pub use metadata::{FsStats, Stat};
pub use options::Ext3Options;
