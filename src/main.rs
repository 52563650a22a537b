use anyhow::{bail, Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;
use std::fs::File;
use std::path::PathBuf;

use ext3view::fuse::Ext3Mount;
use ext3view::options::DEFAULT_CACHE_SIZE;
use ext3view::storage::{BlockIo, FileBackedSource, DEFAULT_SECTOR_SIZE};
use ext3view::{Ext3Fs, Ext3Options};

/// Mount an ext3 image read-only.
#[derive(Parser)]
struct Args {
    /// ext3 image file
    image: PathBuf,
    /// FUSE mountpoint
    mountpoint: PathBuf,
    /// Sector size of the image, in bytes
    #[arg(long, default_value_t = DEFAULT_SECTOR_SIZE)]
    sector_size: u64,
    /// Inodes kept in memory
    #[arg(long, default_value_t = DEFAULT_CACHE_SIZE)]
    inode_cache: usize,
    /// Blocks kept in memory
    #[arg(long, default_value_t = DEFAULT_CACHE_SIZE)]
    block_cache: usize,
    /// Resolved directories kept in memory
    #[arg(long, default_value_t = DEFAULT_CACHE_SIZE)]
    path_cache: usize,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = File::options()
        .read(true)
        .open(&args.image)
        .context("unable to open image file")?;
    let source = FileBackedSource::with_sector_size(image, args.sector_size)?;
    let mut device = BlockIo::new(source)?;

    if !Ext3Fs::matches(&mut device) {
        bail!("{} does not contain an ext3 filesystem", args.image.display());
    }

    let options = Ext3Options {
        inode_cache_size: args.inode_cache,
        block_cache_size: args.block_cache,
        path_cache_size: args.path_cache,
    };
    let mut fs = Ext3Fs::with_options(device, options)?;

    let volume_name = fs.volume().superblock().volume_name();
    info!("mounting {} at {}", args.image.display(), args.mountpoint.display());

    let mount_options = [
        MountOption::RO,
        MountOption::FSName(if volume_name.is_empty() {
            "ext3view".into()
        } else {
            volume_name
        }),
    ];
    fuser::mount2(Ext3Mount::new(fs), &args.mountpoint, &mount_options)
        .context("mounting filesystem")?;

    Ok(())
}
