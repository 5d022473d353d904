//! Inode filesystem on top of a [`BlockStore`].
//!
//! The inode table and its occupancy bitmap are held in memory while mounted and
//! written back to their reserved blocks by [`FileSystem::sync`] and
//! [`FileSystem::unmount`]. Everything else (directory blocks, index blocks, file
//! data) goes straight to the block store.

pub mod cursor;
mod directory;
mod file_io;
pub mod layout;
pub mod path;
pub mod record_table;

// convenience macro for returning errors about inconsistent on-disk data
macro_rules! corrupt {
    ($($args:tt)*) => {
        Err(crate::vfs::Error::IO(format!($($args)*)))
    }
}
pub(crate) use corrupt;

use crate::block::{BlockId, BlockStore, BLOCK_SIZE, DEFAULT_BLOCK_COUNT};
use crate::vfs::{Error, FileInfo, INodeNum, INodeType, Path, Result};
use blockfs_shared::Bitmap;
use file_io::Descriptor;
use layout::{
    encode_owner, Inode, INODE_BITMAP_BLOCK, INODE_COUNT, INODE_TABLE_START, METADATA_BLOCKS,
    OWNER_MAX, ROOT_INODE,
};
use log::{debug, error};
use record_table::RecordTable;
use std::path::{Path as HostPath, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::AsBytes;

pub use file_io::MAX_OPEN_FILES;

/// Settings used when formatting a new volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Number of blocks in the volume, at most 65536.
    pub block_count: usize,
    /// Owner recorded in new inodes, at most 18 bytes.
    pub owner: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            owner: String::new(),
        }
    }
}

/// Seconds since the Unix epoch.
fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// A mounted volume.
///
/// Callers must not share one instance between threads without their own locking;
/// every operation is a read-modify-write of shared blocks.
pub struct FileSystem {
    /// All blocks of the volume
    store: BlockStore,
    /// In-memory copy of blocks 0-4
    inodes: RecordTable<Inode>,
    /// Open files, never persisted
    descriptors: RecordTable<Descriptor>,
    /// Where `sync` writes the image
    image: PathBuf,
    /// Owner stamped on inodes created from now on
    owner: [u8; OWNER_MAX],
}

impl FileSystem {
    /// Format a volume with the default geometry at `path`, replacing any existing file.
    pub fn format(path: impl AsRef<HostPath>) -> Result<Self> {
        Self::format_with(path, &FormatOptions::default())
    }

    pub fn format_with(path: impl AsRef<HostPath>, options: &FormatOptions) -> Result<Self> {
        let owner = encode_owner(&options.owner)?;
        let mut store = BlockStore::create(options.block_count)?;
        for id in 0..METADATA_BLOCKS {
            if !store.request(id) {
                // the free-block bitmap overlaps the metadata blocks
                return Err(Error::InvalidArgument);
            }
        }
        if store.free_blocks() == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut inodes = RecordTable::new(INODE_COUNT).ok_or(Error::InvalidArgument)?;
        inodes.allocate(Inode::new(INodeType::Directory, ROOT_INODE, owner, now()));
        let mut fs = Self {
            store,
            inodes,
            descriptors: RecordTable::new(MAX_OPEN_FILES).ok_or(Error::InvalidArgument)?,
            image: path.as_ref().to_path_buf(),
            owner,
        };
        fs.sync()?;
        debug!(
            "blockfs: formatted {} ({} blocks)",
            fs.image.display(),
            options.block_count
        );
        Ok(fs)
    }

    /// Open the volume previously written to `path`.
    pub fn mount(path: impl AsRef<HostPath>) -> Result<Self> {
        let image = path.as_ref().to_path_buf();
        let store = BlockStore::deserialize(&image)?;
        if let Some(id) = (0..METADATA_BLOCKS).find(|&id| !store.is_allocated(id)) {
            error!("blockfs: {}: metadata block {id} is free", image.display());
            return corrupt!("metadata block {id} is not allocated");
        }

        let mut block = [0u8; BLOCK_SIZE];
        store.read(INODE_BITMAP_BLOCK, &mut block)?;
        let occupied = Bitmap::import(INODE_COUNT, &block).ok_or(Error::InvalidArgument)?;
        let mut records = vec![Inode::default(); INODE_COUNT];
        let chunks = records.as_bytes_mut().chunks_mut(BLOCK_SIZE);
        for (id, chunk) in (INODE_TABLE_START..).zip(chunks) {
            store.read(id, chunk)?;
        }
        let inodes = RecordTable::from_parts(records, occupied).ok_or(Error::InvalidArgument)?;
        if !inodes.get(0).is_some_and(Inode::is_directory) {
            error!("blockfs: {}: no root directory", image.display());
            return corrupt!("root inode is missing or not a directory");
        }

        debug!("blockfs: mounted {} ({})", image.display(), store);
        Ok(Self {
            store,
            inodes,
            descriptors: RecordTable::new(MAX_OPEN_FILES).ok_or(Error::InvalidArgument)?,
            image,
            owner: [0; OWNER_MAX],
        })
    }

    /// Write the inode table back to its blocks and the whole volume to the image file.
    pub fn sync(&mut self) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        let bits = self.inodes.occupancy().export();
        block[..bits.len()].copy_from_slice(bits);
        self.store.write(INODE_BITMAP_BLOCK, &block)?;
        let table = self.inodes.records().as_bytes();
        for (id, chunk) in (INODE_TABLE_START..).zip(table.chunks(BLOCK_SIZE)) {
            self.store.write(id, chunk)?;
        }
        self.store.serialize(&self.image)?;
        Ok(())
    }

    /// Flush everything and close the volume. Open descriptors are dropped.
    pub fn unmount(mut self) -> Result<()> {
        self.sync()?;
        if !self.descriptors.is_empty() {
            debug!(
                "blockfs: closing {} descriptors still open on {}",
                self.descriptors.len(),
                self.image.display()
            );
        }
        debug!("blockfs: unmounted {}", self.image.display());
        Ok(())
    }

    /// Owner recorded in inodes created after this call.
    pub fn set_owner(&mut self, owner: &str) -> Result<()> {
        self.owner = encode_owner(owner)?;
        Ok(())
    }

    pub fn stat(&self, path: &Path) -> Result<FileInfo> {
        let number = self.resolve(path)?;
        let inode = self.inode(number)?;
        Ok(FileInfo {
            r#type: inode.r#type()?,
            inode: number,
            size: u64::from(inode.size()),
            nlink: inode.link_count(),
            owner: inode.owner(),
            created: inode.created(),
            modified: inode.modified(),
        })
    }

    pub fn block_store(&self) -> &BlockStore {
        &self.store
    }

    pub fn free_inodes(&self) -> usize {
        self.inodes.capacity() - self.inodes.len()
    }

    pub fn open_descriptors(&self) -> usize {
        self.descriptors.len()
    }

    fn inode(&self, number: INodeNum) -> Result<&Inode> {
        match self.inodes.get(number as usize) {
            Some(inode) => Ok(inode),
            None => corrupt!("reference to free inode {number}"),
        }
    }

    fn inode_mut(&mut self, number: INodeNum) -> Result<&mut Inode> {
        match self.inodes.get_mut(number as usize) {
            Some(inode) => Ok(inode),
            None => corrupt!("reference to free inode {number}"),
        }
    }

    /// Check a block pointer read from an inode or index block.
    fn data_block(&self, id: BlockId) -> Result<BlockId> {
        let usable = METADATA_BLOCKS as usize..self.store.reserved().start;
        if !usable.contains(&usize::from(id)) {
            return corrupt!("block pointer {id} outside the data area");
        }
        Ok(id)
    }
}
