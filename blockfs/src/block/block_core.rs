use super::block_error::BlockError;
use blockfs_shared::Bitmap;
use log::trace;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

/// Size of a block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Number of blocks in a store unless configured otherwise.
pub const DEFAULT_BLOCK_COUNT: usize = 65536;

/// Block ids are 16 bits wide everywhere, on disk included.
pub const MAX_BLOCK_COUNT: usize = 1 << 16;

/// Index of a block in a [`BlockStore`].
pub type BlockId = u16;

/// Number of blocks needed to hold a free-block bitmap for `block_count` blocks.
const fn bitmap_blocks(block_count: usize) -> usize {
    block_count.div_ceil(8).div_ceil(BLOCK_SIZE)
}

const fn valid_geometry(block_count: usize) -> bool {
    block_count > bitmap_blocks(block_count) && block_count <= MAX_BLOCK_COUNT
}

/// A fixed number of `BLOCK_SIZE` blocks held in memory and backed by a flat image file.
///
/// Free/used state is tracked by a bitmap stored inline in the last blocks of the
/// store, so it travels with the image. Those blocks are marked used when the store
/// is created and are never handed out by [`BlockStore::allocate`].
///
/// ```text
/// +---------+---------+-----+-----------------+
/// | block 0 | block 1 | ... | free-block bitmap |
/// +---------+---------+-----+-----------------+
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct BlockStore {
    data: Vec<u8>,
    block_count: usize,
}

impl BlockStore {
    /// Create a store of `block_count` zeroed blocks.
    pub fn create(block_count: usize) -> Result<Self, BlockError> {
        if !valid_geometry(block_count) {
            return Err(BlockError::InvalidGeometry(block_count));
        }
        let mut store = Self {
            data: vec![0; block_count * BLOCK_SIZE],
            block_count,
        };
        let reserved = store.reserved();
        let mut bitmap = store
            .bitmap_mut()
            .ok_or(BlockError::InvalidGeometry(block_count))?;
        for id in reserved {
            bitmap.set(id);
        }
        Ok(store)
    }

    /// Blocks holding the free-block bitmap.
    pub fn reserved(&self) -> Range<usize> {
        self.block_count - bitmap_blocks(self.block_count)..self.block_count
    }

    fn bitmap(&self) -> Option<Bitmap<&[u8]>> {
        let start = self.reserved().start * BLOCK_SIZE;
        Bitmap::overlay(self.block_count, &self.data[start..])
    }

    fn bitmap_mut(&mut self) -> Option<Bitmap<&mut [u8]>> {
        let start = self.reserved().start * BLOCK_SIZE;
        Bitmap::overlay(self.block_count, &mut self.data[start..])
    }

    /// Allocate the free block with the lowest id.
    ///
    /// Returns `None` if every block is in use.
    pub fn allocate(&mut self) -> Option<BlockId> {
        let mut bitmap = self.bitmap_mut()?;
        let id = bitmap.first_zero()?;
        bitmap.set(id);
        trace!("block: allocate {id}");
        BlockId::try_from(id).ok()
    }

    /// Claim block `id` if it exists and is free.
    pub fn request(&mut self, id: BlockId) -> bool {
        let Some(mut bitmap) = self.bitmap_mut() else {
            return false;
        };
        let id = usize::from(id);
        if bitmap.test(id) {
            return false;
        }
        trace!("block: request {id}");
        bitmap.set(id)
    }

    /// Mark block `id` free.
    ///
    /// Releasing a free block, an out of range id or a block of the bitmap itself
    /// does nothing.
    pub fn release(&mut self, id: BlockId) {
        let id = usize::from(id);
        if self.reserved().contains(&id) {
            return;
        }
        if let Some(mut bitmap) = self.bitmap_mut() {
            trace!("block: release {id}");
            bitmap.reset(id);
        }
    }

    pub fn is_allocated(&self, id: BlockId) -> bool {
        self.bitmap()
            .is_some_and(|bitmap| bitmap.test(usize::from(id)))
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of allocated blocks, the bitmap's own blocks included.
    pub fn used_blocks(&self) -> usize {
        self.bitmap().map_or(0, |bitmap| bitmap.total_set())
    }

    pub fn free_blocks(&self) -> usize {
        self.block_count - self.used_blocks()
    }

    /// Verifies that `id` addresses a block, and returns its byte range.
    fn check_block(&self, id: BlockId) -> Result<Range<usize>, BlockError> {
        let id = usize::from(id);
        if id >= self.block_count {
            return Err(BlockError::BlockOutOfBounds(id));
        }
        Ok(id * BLOCK_SIZE..(id + 1) * BLOCK_SIZE)
    }

    /// Verifies that `buf` is a valid buffer for reading or writing a block.
    fn verify_buffer(buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SIZE {
            return Err(BlockError::BufferInvalid(buf.len()));
        }
        Ok(())
    }

    /// Reads block `id` into `buf`, which must be exactly `BLOCK_SIZE` bytes.
    pub fn read(&self, id: BlockId, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.check_block(id)?;
        Self::verify_buffer(buf)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    /// Writes `buf`, which must be exactly `BLOCK_SIZE` bytes, to block `id`.
    pub fn write(&mut self, id: BlockId, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.check_block(id)?;
        Self::verify_buffer(buf)?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    /// Write the whole store, bitmap included, to the file at `path`.
    pub fn serialize(&self, path: impl AsRef<Path>) -> Result<(), BlockError> {
        let file = File::create(path).map_err(|e| BlockError::WriteError(e.kind()))?;
        self.write_image(BufWriter::new(file))
    }

    /// Load a store previously written by [`BlockStore::serialize`].
    pub fn deserialize(path: impl AsRef<Path>) -> Result<Self, BlockError> {
        let file = File::open(path).map_err(|e| BlockError::ReadError(e.kind()))?;
        Self::read_image(BufReader::new(file))
    }

    /// Write the raw image, one block after another in id order.
    pub fn write_image<W: Write>(&self, mut writer: W) -> Result<(), BlockError> {
        writer
            .write_all(&self.data)
            .and_then(|()| writer.flush())
            .map_err(|e| BlockError::WriteError(e.kind()))
    }

    /// Read a raw image. The block count is taken from the image length.
    pub fn read_image<R: Read>(mut reader: R) -> Result<Self, BlockError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| BlockError::ReadError(e.kind()))?;
        if data.len() % BLOCK_SIZE != 0 || !valid_geometry(data.len() / BLOCK_SIZE) {
            return Err(BlockError::InvalidImage);
        }
        let store = Self {
            block_count: data.len() / BLOCK_SIZE,
            data,
        };
        if !store.reserved().all(|id| {
            BlockId::try_from(id).is_ok_and(|id| store.is_allocated(id))
        }) {
            return Err(BlockError::InvalidImage);
        }
        Ok(store)
    }
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("block_count", &self.block_count)
            .field("used", &self.used_blocks())
            .finish()
    }
}

impl fmt::Display for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:05} blocks of {} bytes, {:05} used, {:05} free",
            self.block_count,
            BLOCK_SIZE,
            self.used_blocks(),
            self.free_blocks()
        )
    }
}
