use std::fs::File;
use std::os::unix::prelude::FileExt;

use anyhow::{ensure, Context, Result};
use log::debug;

use super::raw_source::RawBlockSource;

/// The sector size assumed for image files.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

pub struct FileBackedSource {
    file: File,
    sector_size: u64,
    size: u64,
}

impl FileBackedSource {
    pub fn new(file: File) -> Result<Self> {
        Self::with_sector_size(file, DEFAULT_SECTOR_SIZE)
    }

    pub fn with_sector_size(file: File, sector_size: u64) -> Result<Self> {
        ensure!(sector_size > 0, "sector size must be positive");

        let size = file.metadata().context("reading image metadata")?.len();

        Ok(FileBackedSource {
            file,
            sector_size,
            size,
        })
    }
}

impl RawBlockSource for FileBackedSource {
    fn block_size(&self) -> u64 {
        self.sector_size
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn raw_read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        debug!("reading {len} bytes at {offset}");

        let mut buf = vec![0; len];
        self.file
            .read_exact_at(&mut buf, offset)
            .with_context(|| format!("reading {len} bytes at offset {offset}"))?;

        Ok(buf)
    }

    fn raw_write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file
            .write_all_at(buf, offset)
            .with_context(|| format!("writing {} bytes at offset {offset}", buf.len()))?;

        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        self.file.sync_all().context("syncing image file")
    }
}
