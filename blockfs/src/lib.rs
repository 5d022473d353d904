//! A small inode filesystem stored in a flat image file.
//!
//! [`block::BlockStore`] provides fixed-size blocks with a free-block bitmap kept in
//! the store's own tail blocks. [`fs::FileSystem`] lays an inode table, directories
//! and file data out on top of it.

pub mod block;
pub mod fs;
pub mod vfs;

pub use block::{BlockError, BlockId, BlockStore, BLOCK_SIZE};
pub use fs::{FileSystem, FormatOptions, MAX_OPEN_FILES};
pub use vfs::{Error, ErrorKind, FileDescriptor, FileInfo, FileRecord, INodeType, Result, SeekFrom};
