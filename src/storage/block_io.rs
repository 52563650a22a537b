use std::io::SeekFrom;
use std::ops::Range;

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::debug;

use super::raw_source::RawBlockSource;
use crate::error::Ext3Error;

/// The smallest read-ahead window, in sectors.
pub const MIN_SECTORS_TO_CACHE: u64 = 64;

/// Sector-granular access to a [`RawBlockSource`] with a single read-ahead window.
///
/// Every access is clipped to the end of the device; an access starting at or past the end
/// yields `None`. [`Self::read_at`] and [`Self::write_at`] take explicit offsets; the cursor
/// methods ([`Self::seek`], [`Self::read`], [`Self::write`]) wrap them for sequential use.
pub struct BlockIo<S: RawBlockSource> {
    source: S,
    sector_size: u64,
    size: u64,
    position: u64,
    /// Bytes of the sectors in `cache_range`.
    cache: Vec<u8>,
    /// Half-open range of cached sectors; empty when nothing is cached.
    cache_range: Range<u64>,
}

impl<S: RawBlockSource> BlockIo<S> {
    pub fn new(source: S) -> Result<Self> {
        let sector_size = source.block_size();
        ensure!(sector_size > 0, "block source reports a sector size of 0");

        let size = source.size();

        Ok(Self {
            source,
            sector_size,
            size,
            position: 0,
            cache: Vec::new(),
            cache_range: 0..0,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Size in sectors, counting a trailing partial sector.
    pub fn size_in_sectors(&self) -> u64 {
        self.size.div_ceil(self.sector_size)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Reads up to `len` bytes at `offset` through the read-ahead window.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.clip(offset, len) else {
            return Ok(None);
        };

        if len == 0 {
            return Ok(Some(Vec::new()));
        }

        let sectors = self.sector_span(offset, len);
        self.fill_cache(&sectors)?;

        let start = ((sectors.start - self.cache_range.start) * self.sector_size
            + offset % self.sector_size) as usize;

        Ok(Some(self.cache[start..start + len].to_vec()))
    }

    /// Reads exactly `len` bytes at `offset`. Running off the end of the device means the
    /// metadata pointing there is corrupt.
    pub fn read_exact_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self.read_at(offset, len)? {
            Some(data) if data.len() == len => Ok(data),
            _ => bail!(Ext3Error::Corrupt(format!(
                "{len} bytes at offset {offset} extend past the end of the device"
            ))),
        }
    }

    /// Writes up to `buf.len()` bytes at `offset`, returning how many were written.
    ///
    /// The covering sectors are read, patched and written back without going through the
    /// read-ahead window, which is dropped if it overlaps them.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<Option<usize>> {
        let Some(len) = self.clip(offset, buf.len()) else {
            return Ok(None);
        };

        if len == 0 {
            return Ok(Some(0));
        }

        let sectors = self.sector_span(offset, len);
        let mut patched = self.read_sectors(&sectors)?;

        let start = (offset % self.sector_size) as usize;
        patched[start..start + len].copy_from_slice(&buf[..len]);

        self.source
            .raw_write(&patched, sectors.start * self.sector_size)
            .context("writing sectors")?;

        if sectors.start < self.cache_range.end && self.cache_range.start < sectors.end {
            self.cache.clear();
            self.cache_range = 0..0;
        }

        Ok(Some(len))
    }

    /// Moves the cursor. No bounds are enforced here; out-of-range accesses are caught when
    /// reading or writing.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => (offset, 0),
            SeekFrom::Current(delta) => (self.position, delta),
            SeekFrom::End(delta) => (self.size, delta),
        };

        self.position = base
            .checked_add_signed(delta)
            .ok_or_else(|| anyhow!("seek to a negative or overflowing position"))?;

        Ok(self.position)
    }

    /// Reads up to `len` bytes at the cursor and advances it past them.
    pub fn read(&mut self, len: usize) -> Result<Option<Vec<u8>>> {
        let data = self.read_at(self.position, len)?;

        if let Some(data) = &data {
            self.position += data.len() as u64;
        }

        Ok(data)
    }

    /// Writes up to `buf.len()` bytes at the cursor and advances it past them.
    pub fn write(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        let written = self.write_at(self.position, buf)?;

        if let Some(written) = written {
            self.position += written as u64;
        }

        Ok(written)
    }

    /// Closes the underlying source.
    pub fn close(mut self) -> Result<()> {
        self.source.close()
    }

    /// The length of an access of `len` bytes at `offset` once clipped to the device.
    fn clip(&self, offset: u64, len: usize) -> Option<usize> {
        if offset >= self.size {
            return None;
        }

        Some(len.min((self.size - offset).try_into().unwrap_or(usize::MAX)))
    }

    /// The sectors covering `len > 0` bytes at `offset`.
    fn sector_span(&self, offset: u64, len: usize) -> Range<u64> {
        let first = offset / self.sector_size;
        let last = (offset + len as u64 - 1) / self.sector_size;

        first..last + 1
    }

    fn fill_cache(&mut self, sectors: &Range<u64>) -> Result<()> {
        if self.cache_range.contains(&sectors.start) && self.cache_range.contains(&(sectors.end - 1))
        {
            return Ok(());
        }

        let count = (sectors.end - sectors.start).max(MIN_SECTORS_TO_CACHE);
        let wanted = sectors.start..(sectors.start + count).min(self.size_in_sectors());
        debug!("read-ahead miss, caching sectors {wanted:?}");

        self.cache = self.read_sectors(&wanted)?;
        self.cache_range = wanted;

        Ok(())
    }

    /// Reads whole sectors, stopping at the end of the device.
    fn read_sectors(&self, sectors: &Range<u64>) -> Result<Vec<u8>> {
        let offset = sectors.start * self.sector_size;
        let end = (sectors.end * self.sector_size).min(self.size);
        let len = (end - offset) as usize;

        let buf = self
            .source
            .raw_read(offset, len)
            .with_context(|| format!("reading sectors {sectors:?}"))?;
        ensure!(
            buf.len() == len,
            "short read: wanted {len} bytes at {offset}, got {}",
            buf.len()
        );

        Ok(buf)
    }
}
