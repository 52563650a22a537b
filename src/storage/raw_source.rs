use anyhow::Result;

/// A raw, block-addressable image: a file, a device, a loopback source.
///
/// Offsets and lengths are in bytes. Callers keep reads and writes within [`Self::size`] and
/// aligned to [`Self::block_size`], except for a trailing partial block.
pub trait RawBlockSource {
    /// Sector size in bytes.
    fn block_size(&self) -> u64;

    /// Total size in bytes.
    fn size(&self) -> u64;

    fn raw_read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn raw_write(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
