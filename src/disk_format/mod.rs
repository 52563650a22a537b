/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// Directory entries in both on-disk shapes.
pub mod directory_entry;
/// Block group descriptors.
pub mod group_descriptor;
/// Indexed ("hash-tree") directory records.
pub mod hash_tree;
/// Inodes.
pub mod inode;
/// The superblock.
pub mod superblock;

/// Decode a little-endian, fixed-layout record from the start of `buf`.
///
/// Trailing bytes are ignored, so `buf` may be longer than the record.
pub(crate) fn decode<'a, T: serde::Deserialize<'a>>(buf: &'a [u8], what: &str) -> anyhow::Result<T> {
    use anyhow::Context;

    bincode::deserialize(buf).with_context(|| format!("decoding {what}"))
}
