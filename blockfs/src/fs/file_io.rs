use super::cursor::{BlockSlot, Cursor};
use super::layout::{IndexBlock, Inode, DIRECT_POINTERS};
use super::{now, FileSystem};
use crate::block::{BlockId, BLOCK_SIZE};
use crate::vfs::{Error, FileDescriptor, INodeNum, Path, Result, SeekFrom};
use log::{debug, warn};
use zerocopy::{AsBytes, FromZeroes};

/// Maximum number of simultaneously open files.
pub const MAX_OPEN_FILES: usize = 256;

/// An open file: the inode it refers to and where the next read or write happens.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Descriptor {
    pub inode: INodeNum,
    pub cursor: Cursor,
}

static ZERO_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

impl FileSystem {
    /// Open the file at `path` with its cursor at byte 0.
    pub fn open(&mut self, path: &Path) -> Result<FileDescriptor> {
        let inode = self.resolve(path)?;
        if self.inode(inode)?.is_directory() {
            return Err(Error::IsDirectory);
        }
        if self.descriptors.is_full() {
            return Err(Error::TooManyOpenFiles);
        }
        let fd = self
            .descriptors
            .allocate(Descriptor {
                inode,
                cursor: Cursor::default(),
            })
            .ok_or(Error::TooManyOpenFiles)?;
        debug!("blockfs: open {path} (inode {inode}) -> fd {fd}");
        Ok(fd)
    }

    pub fn close(&mut self, fd: FileDescriptor) -> Result<()> {
        if !self.descriptors.release(fd) {
            return Err(Error::BadFd);
        }
        Ok(())
    }

    /// Move the cursor of `fd` and return the new position.
    ///
    /// The position is clamped to `[0, size]`, so seeking never extends a file.
    pub fn seek(&mut self, fd: FileDescriptor, offset: i64, whence: SeekFrom) -> Result<u64> {
        let descriptor = *self.descriptor(fd)?;
        let size = i128::from(self.inode(descriptor.inode)?.size());
        let base = match whence {
            SeekFrom::Start => 0,
            SeekFrom::Current => i128::from(descriptor.cursor.position()),
            SeekFrom::End => size,
        };
        // within [0, u32::MAX] after clamping
        let position = (base + i128::from(offset)).clamp(0, size) as u64;
        self.descriptor_mut(fd)?.cursor = Cursor::at(position);
        Ok(position)
    }

    /// Read from the cursor of `fd` into `buf`, stopping at the end of the file.
    pub fn read(&mut self, fd: FileDescriptor, buf: &mut [u8]) -> Result<usize> {
        let Descriptor { inode, mut cursor } = *self.descriptor(fd)?;
        let inode = *self.inode(inode)?;
        let available = u64::from(inode.size()).saturating_sub(cursor.position());
        let len = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));

        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let Some(slot) = cursor.slot() else {
                break;
            };
            let Some(id) = self.lookup_block(&inode, slot)? else {
                break;
            };
            self.store.read(id, &mut block)?;
            let offset = cursor.offset();
            let n = cursor.remaining_in_block().min(len - done);
            buf[done..done + n].copy_from_slice(&block[offset..offset + n]);
            cursor.advance(n);
            done += n;
        }
        self.descriptor_mut(fd)?.cursor = cursor;
        Ok(done)
    }

    /// Write `buf` at the cursor of `fd`, allocating blocks as needed.
    ///
    /// Returns fewer bytes than requested once the block store runs out of space or
    /// the file reaches `u32::MAX` bytes.
    pub fn write(&mut self, fd: FileDescriptor, buf: &[u8]) -> Result<usize> {
        let Descriptor { inode: number, mut cursor } = *self.descriptor(fd)?;
        let mut inode = *self.inode(number)?;
        let start = cursor.position();
        let limit = u64::from(u32::MAX).saturating_sub(start);
        let len = buf.len().min(usize::try_from(limit).unwrap_or(usize::MAX));

        let result = self.write_blocks(&mut inode, &mut cursor, &buf[..len]);
        // keep whatever was allocated and written, even on error
        if cursor.position() != start {
            inode.touch(now());
        }
        *self.inode_mut(number)? = inode;
        self.descriptor_mut(fd)?.cursor = cursor;

        let written = result?;
        if written < buf.len() {
            warn!(
                "blockfs: short write to inode {number}: {written} of {} bytes",
                buf.len()
            );
        }
        debug!("blockfs: write {written} bytes at {start} to inode {number}");
        Ok(written)
    }

    fn write_blocks(
        &mut self,
        inode: &mut Inode,
        cursor: &mut Cursor,
        buf: &[u8],
    ) -> Result<usize> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < buf.len() {
            let Some(slot) = cursor.slot() else {
                break;
            };
            let Some((id, fresh)) = self.map_block(inode, slot)? else {
                break;
            };
            let offset = cursor.offset();
            let n = cursor.remaining_in_block().min(buf.len() - done);
            if n < BLOCK_SIZE {
                if fresh {
                    block.fill(0);
                } else {
                    self.store.read(id, &mut block)?;
                }
            }
            block[offset..offset + n].copy_from_slice(&buf[done..done + n]);
            self.store.write(id, &block)?;
            cursor.advance(n);
            done += n;
            let end = u32::try_from(cursor.position()).unwrap_or(u32::MAX);
            if end > inode.size() {
                inode.set_size(end);
            }
        }
        Ok(done)
    }

    fn descriptor(&self, fd: FileDescriptor) -> Result<&Descriptor> {
        self.descriptors.get(fd).ok_or(Error::BadFd)
    }

    fn descriptor_mut(&mut self, fd: FileDescriptor) -> Result<&mut Descriptor> {
        self.descriptors.get_mut(fd).ok_or(Error::BadFd)
    }

    /// Read the index block `id`, which must be a valid data block.
    fn index_block(&self, id: BlockId) -> Result<IndexBlock> {
        let mut index = IndexBlock::new_zeroed();
        self.store.read(self.data_block(id)?, index.as_bytes_mut())?;
        Ok(index)
    }

    /// The block behind `slot` of `inode`, without allocating.
    fn lookup_block(&self, inode: &Inode, slot: BlockSlot) -> Result<Option<BlockId>> {
        let id = match slot {
            BlockSlot::Direct(i) => inode.direct(i),
            BlockSlot::Indirect(entry) => {
                if inode.indirect() == 0 {
                    return Ok(None);
                }
                self.index_block(inode.indirect())?.get(entry)
            }
            BlockSlot::DoubleIndirect { outer, inner } => {
                if inode.double_indirect() == 0 {
                    return Ok(None);
                }
                let middle = self.index_block(inode.double_indirect())?.get(outer);
                if middle == 0 {
                    return Ok(None);
                }
                self.index_block(middle)?.get(inner)
            }
        };
        if id == 0 {
            return Ok(None);
        }
        self.data_block(id).map(Some)
    }

    /// The block behind `slot` of `inode`, allocating it and any index blocks on
    /// the way. The flag is set for a newly allocated data block.
    ///
    /// `None` means the block store is full.
    fn map_block(&mut self, inode: &mut Inode, slot: BlockSlot) -> Result<Option<(BlockId, bool)>> {
        match slot {
            BlockSlot::Direct(i) => {
                let id = inode.direct(i);
                if id != 0 {
                    return Ok(Some((self.data_block(id)?, false)));
                }
                let Some(id) = self.store.allocate() else {
                    return Ok(None);
                };
                inode.set_direct(i, id);
                Ok(Some((id, true)))
            }
            BlockSlot::Indirect(entry) => {
                let Some(index) = self.claim_index(inode.indirect())? else {
                    return Ok(None);
                };
                inode.set_indirect(index);
                self.claim_entry(index, entry)
            }
            BlockSlot::DoubleIndirect { outer, inner } => {
                let Some(top) = self.claim_index(inode.double_indirect())? else {
                    return Ok(None);
                };
                inode.set_double_indirect(top);
                let Some(middle) = self.claim_entry_index(top, outer)? else {
                    return Ok(None);
                };
                self.claim_entry(middle, inner)
            }
        }
    }

    /// Return `current` if set, or allocate a zeroed index block.
    fn claim_index(&mut self, current: BlockId) -> Result<Option<BlockId>> {
        if current != 0 {
            return self.data_block(current).map(Some);
        }
        let Some(id) = self.store.allocate() else {
            return Ok(None);
        };
        if let Err(e) = self.store.write(id, &ZERO_BLOCK) {
            self.store.release(id);
            return Err(e.into());
        }
        Ok(Some(id))
    }

    /// Entry `entry` of index block `index`, allocating a zeroed index block for it
    /// if empty.
    fn claim_entry_index(&mut self, index: BlockId, entry: usize) -> Result<Option<BlockId>> {
        let mut table = self.index_block(index)?;
        let current = table.get(entry);
        let Some(id) = self.claim_index(current)? else {
            return Ok(None);
        };
        if id != current {
            table.set(entry, id);
            self.store.write(index, table.as_bytes())?;
        }
        Ok(Some(id))
    }

    /// Entry `entry` of index block `index`, allocating a data block for it if empty.
    fn claim_entry(&mut self, index: BlockId, entry: usize) -> Result<Option<(BlockId, bool)>> {
        let mut table = self.index_block(index)?;
        let current = table.get(entry);
        if current != 0 {
            return Ok(Some((self.data_block(current)?, false)));
        }
        let Some(id) = self.store.allocate() else {
            return Ok(None);
        };
        table.set(entry, id);
        if let Err(e) = self.store.write(index, table.as_bytes()) {
            self.store.release(id);
            return Err(e.into());
        }
        Ok(Some((id, true)))
    }

    /// Give back every block owned by `inode`, index blocks included.
    pub(super) fn release_blocks(&mut self, inode: &Inode) -> Result<()> {
        for i in 0..DIRECT_POINTERS {
            self.release_tree(inode.direct(i), 0)?;
        }
        self.release_tree(inode.indirect(), 1)?;
        self.release_tree(inode.double_indirect(), 2)
    }

    /// Release block `id` and, for `depth > 0`, everything its pointers lead to.
    fn release_tree(&mut self, id: BlockId, depth: u8) -> Result<()> {
        if id == 0 {
            return Ok(());
        }
        let id = self.data_block(id)?;
        if depth > 0 {
            let index = self.index_block(id)?;
            for child in index.blocks() {
                self.release_tree(child, depth - 1)?;
            }
        }
        self.store.release(id);
        Ok(())
    }
}
