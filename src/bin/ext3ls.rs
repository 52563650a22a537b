use std::{fs::File, path::PathBuf, time::SystemTime};

use anyhow::{bail, Result};
use clap::Parser;
use ext3view::{
    storage::{BlockIo, FileBackedSource, DEFAULT_SECTOR_SIZE},
    Ext3Error, Ext3Fs, Stat,
};

/// Inspect an ext3 image without mounting it.
#[derive(Parser)]
struct Args {
    /// ext3 image file
    image: PathBuf,
    /// Path inside the image
    #[arg(default_value = "/")]
    path: String,
    /// Print metadata for the path instead of listing it
    #[arg(long)]
    stat: bool,
    /// Sector size of the image, in bytes
    #[arg(long, default_value_t = DEFAULT_SECTOR_SIZE)]
    sector_size: u64,
}

fn seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |since| since.as_secs())
}

fn print_stat(path: &str, stat: &Stat) {
    println!("{path}");
    println!("  inode:  {}", stat.inode);
    println!("  type:   {}", stat.file_type);
    println!("  size:   {}", stat.size);
    println!("  mode:   {:o}", stat.permissions);
    println!("  owner:  {}:{}", stat.uid, stat.gid);
    println!("  links:  {}", stat.links);
    println!("  blocks: {}", stat.blocks);
    println!("  atime:  {}", seconds(stat.atime));
    println!("  mtime:  {}", seconds(stat.mtime));
    println!("  ctime:  {}", seconds(stat.ctime));
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = File::options().read(true).open(&args.image)?;
    let mut device = BlockIo::new(FileBackedSource::with_sector_size(image, args.sector_size)?)?;

    if !Ext3Fs::matches(&mut device) {
        bail!("{} does not contain an ext3 filesystem", args.image.display());
    }

    let mut fs = Ext3Fs::new(device)?;

    let superblock = fs.volume().superblock().clone();
    println!("volume:     {:?}", superblock.volume_name());
    println!("uuid:       {}", superblock.volume_uuid());
    println!("block size: {}", superblock.block_size());
    println!(
        "blocks:     {} ({} free)",
        superblock.num_blocks, superblock.unallocated_blocks
    );
    println!(
        "inodes:     {} ({} free)",
        superblock.num_inodes, superblock.unallocated_inodes
    );
    println!("groups:     {}", superblock.group_count());
    println!("free bytes: {}", superblock.free_bytes());
    println!("journal:    {}", superblock.has_journal());
    println!("large file: {}", superblock.has_large_files());
    println!("dir index:  {}", superblock.has_dir_index());

    for (number, group) in fs.volume().group_descriptors()?.iter().enumerate() {
        println!(
            "group {number}: blocks from {}, inode table at {}, {} free blocks, {} free inodes, {} directories",
            superblock.first_group_block(number as u32),
            group.descriptor.inode_table,
            group.descriptor.unallocated_blocks,
            group.descriptor.unallocated_inodes,
            group.descriptor.num_directories
        );
    }
    println!();

    if args.stat {
        match fs.file_lstat(&args.path) {
            Ok(stat) => print_stat(&args.path, &stat),
            Err(err) if Ext3Error::is_not_found(&err) => bail!("{}: not found", args.path),
            Err(err) => return Err(err),
        }
    } else if fs.dir_exist(&args.path)? {
        fs.dir_foreach(&args.path, |name| println!("{name}"))?;
    } else if fs.file_exist(&args.path)? {
        println!("{}", args.path);
    } else {
        bail!("{}: not found", args.path);
    }

    fs.close()
}
