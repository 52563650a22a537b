use std::cell::Cell;

use anyhow::{ensure, Result};

use super::raw_source::RawBlockSource;

/// An image held in memory.
pub struct MemorySource {
    data: Vec<u8>,
    sector_size: u64,
    /// Number of `raw_read` calls served, for observing read-ahead.
    reads: Cell<usize>,
}

impl MemorySource {
    #[must_use]
    pub fn new(data: Vec<u8>, sector_size: u64) -> Self {
        Self {
            data,
            sector_size,
            reads: Cell::new(0),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl RawBlockSource for MemorySource {
    fn block_size(&self) -> u64 {
        self.sector_size
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn raw_read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = offset as usize;
        ensure!(
            start + len <= self.data.len(),
            "read of {len} bytes at {offset} is out of bounds"
        );

        self.reads.set(self.reads.get() + 1);
        Ok(self.data[start..start + len].to_vec())
    }

    fn raw_write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let start = offset as usize;
        ensure!(
            start + buf.len() <= self.data.len(),
            "write of {} bytes at {offset} is out of bounds",
            buf.len()
        );

        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}
