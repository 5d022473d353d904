//! On-disk records and layout constants.
//!
//! ```text
//! block 0          occupancy bitmap of the inode table
//! blocks 1-4       inode table: 256 records of 64 bytes
//! blocks 5..       file data, index blocks and directory blocks
//! last blocks      free-block bitmap, owned by the block store
//! ```
//!
//! All integers are little-endian and unaligned, so every record can be read
//! straight out of a block buffer.

use super::corrupt;
use crate::block::{BlockId, BLOCK_SIZE};
use crate::vfs::{Error, INodeNum, INodeType, Result};
use core::mem::size_of;
// These are little-endian unaligned integer types
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub const INODE_BITMAP_BLOCK: BlockId = 0;
pub const INODE_TABLE_START: BlockId = 1;
pub const INODE_TABLE_BLOCKS: usize = 4;
/// Blocks claimed at format time, before any file data.
pub const METADATA_BLOCKS: BlockId = INODE_TABLE_START + INODE_TABLE_BLOCKS as BlockId;

pub const INODE_COUNT: usize = 256;
pub const INODE_SIZE: usize = 64;
pub const ROOT_INODE: INodeNum = 0;

pub const DIRECT_POINTERS: usize = 6;
/// Block pointers held by one indirect block.
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / size_of::<U16>();

pub const DIRECTORY_ENTRIES: usize = 31;
const NAME_FIELD: usize = 127;
/// Longest file name, leaving room for the terminating NUL.
pub const NAME_MAX: usize = NAME_FIELD - 1;
const DIR_ENTRY_SIZE: usize = 132;

pub const OWNER_MAX: usize = 18;
pub const MAX_LINKS: u8 = u8::MAX;

const FILE_TAG: u8 = b'f';
const DIRECTORY_TAG: u8 = b'd';

const _: () = assert!(size_of::<Inode>() == INODE_SIZE);
const _: () = assert!(INODE_COUNT * INODE_SIZE == INODE_TABLE_BLOCKS * BLOCK_SIZE);
const _: () = assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);
const _: () = assert!(size_of::<DirectoryBlock>() == BLOCK_SIZE);
const _: () = assert!(size_of::<IndexBlock>() == BLOCK_SIZE);
const _: () = assert!(DIRECTORY_ENTRIES < u32::BITS as usize);

/// An inode record.
///
/// A pointer value of 0 means "no block": block 0 always holds the inode bitmap,
/// so it can never belong to a file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct Inode {
    /// bit `k` set iff directory slot `k` is in use (directories only)
    occupancy: U32,
    owner: [u8; OWNER_MAX],
    kind: u8,
    number: U32,
    link_count: u8,
    size: U32,
    direct: [U16; DIRECT_POINTERS],
    indirect: U16,
    double_indirect: U16,
    created: U64,
    modified: U64,
}

impl Default for Inode {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl Inode {
    pub fn new(r#type: INodeType, number: INodeNum, owner: [u8; OWNER_MAX], now: u64) -> Self {
        let mut inode = Self::new_zeroed();
        inode.kind = match r#type {
            INodeType::File => FILE_TAG,
            INodeType::Directory => DIRECTORY_TAG,
        };
        inode.number.set(number);
        inode.owner = owner;
        inode.link_count = 1;
        inode.created.set(now);
        inode.modified.set(now);
        inode
    }

    pub fn r#type(&self) -> Result<INodeType> {
        match self.kind {
            FILE_TAG => Ok(INodeType::File),
            DIRECTORY_TAG => Ok(INodeType::Directory),
            tag => corrupt!("inode {} has unknown type tag {tag:#04x}", self.number()),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == DIRECTORY_TAG
    }

    pub fn number(&self) -> INodeNum {
        self.number.get()
    }

    pub fn link_count(&self) -> u8 {
        self.link_count
    }

    pub fn set_link_count(&mut self, count: u8) {
        self.link_count = count;
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn set_size(&mut self, size: u32) {
        self.size.set(size);
    }

    pub fn occupancy(&self) -> u32 {
        self.occupancy.get()
    }

    pub fn set_occupancy(&mut self, occupancy: u32) {
        self.occupancy.set(occupancy);
    }

    pub fn direct(&self, index: usize) -> BlockId {
        self.direct[index].get()
    }

    pub fn set_direct(&mut self, index: usize, id: BlockId) {
        self.direct[index].set(id);
    }

    pub fn indirect(&self) -> BlockId {
        self.indirect.get()
    }

    pub fn set_indirect(&mut self, id: BlockId) {
        self.indirect.set(id);
    }

    pub fn double_indirect(&self) -> BlockId {
        self.double_indirect.get()
    }

    pub fn set_double_indirect(&mut self, id: BlockId) {
        self.double_indirect.set(id);
    }

    pub fn owner(&self) -> String {
        let len = self.owner.iter().position(|&b| b == 0).unwrap_or(OWNER_MAX);
        String::from_utf8_lossy(&self.owner[..len]).into_owned()
    }

    pub fn created(&self) -> u64 {
        self.created.get()
    }

    pub fn modified(&self) -> u64 {
        self.modified.get()
    }

    pub fn touch(&mut self, now: u64) {
        self.modified.set(now);
    }
}

/// Pack an owner name into its fixed-size field.
pub fn encode_owner(owner: &str) -> Result<[u8; OWNER_MAX]> {
    if owner.len() > OWNER_MAX || owner.contains('\0') {
        return Err(Error::InvalidArgument);
    }
    let mut field = [0; OWNER_MAX];
    field[..owner.len()].copy_from_slice(owner.as_bytes());
    Ok(field)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct DirEntry {
    /// NUL-terminated name
    name: [u8; NAME_FIELD],
    _pad: u8,
    inode: U32,
}

impl DirEntry {
    /// `name` must already have passed path validation.
    pub fn new(name: &str, inode: INodeNum) -> Self {
        let mut entry = Self::new_zeroed();
        let len = name.len().min(NAME_MAX);
        entry.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        entry.inode.set(inode);
        entry
    }

    pub fn name(&self) -> Result<&str> {
        let Some(len) = self.name.iter().position(|&b| b == 0) else {
            return corrupt!("unterminated directory entry name");
        };
        match core::str::from_utf8(&self.name[..len]) {
            Ok(name) => Ok(name),
            Err(_) => corrupt!("directory entry name is not UTF-8"),
        }
    }

    pub fn inode(&self) -> INodeNum {
        self.inode.get()
    }
}

/// The single data block of a directory.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct DirectoryBlock {
    pub entries: [DirEntry; DIRECTORY_ENTRIES],
    _unused: [u8; BLOCK_SIZE - DIRECTORY_ENTRIES * DIR_ENTRY_SIZE],
}

/// An indirect block: an array of block pointers.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct IndexBlock {
    pointers: [U16; POINTERS_PER_BLOCK],
}

impl IndexBlock {
    pub fn get(&self, index: usize) -> BlockId {
        self.pointers[index].get()
    }

    pub fn set(&mut self, index: usize, id: BlockId) {
        self.pointers[index].set(id);
    }

    /// Non-zero pointers, in order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.pointers.iter().map(|p| p.get()).filter(|&id| id != 0)
    }
}
