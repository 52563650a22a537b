/// The cached, sector-granular block device.
mod block_io;
/// File-backed block sources.
mod file;
/// In-memory block sources.
mod memory;
/// The raw block source abstraction.
mod raw_source;

pub use block_io::*;
pub use file::*;
pub use memory::*;
pub use raw_source::*;
