use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;

/// Error type for block store operations
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The block id is not below the store's block count
    BlockOutOfBounds(usize),
    /// The buffer has an invalid size (not `BLOCK_SIZE`)
    BufferInvalid(usize),
    /// The requested block count cannot be laid out
    InvalidGeometry(usize),
    /// An image has the wrong length or an inconsistent free-block bitmap
    InvalidImage,
    /// Error reading the backing file
    ReadError(io::ErrorKind),
    /// Error writing the backing file
    WriteError(io::ErrorKind),
}

impl Debug for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockError::BlockOutOfBounds(id) => write!(f, "BlockOutOfBounds({id})"),
            BlockError::BufferInvalid(len) => write!(f, "BufferInvalid({len})"),
            BlockError::InvalidGeometry(count) => write!(f, "InvalidGeometry({count})"),
            BlockError::InvalidImage => write!(f, "InvalidImage"),
            BlockError::ReadError(kind) => write!(f, "ReadError({kind})"),
            BlockError::WriteError(kind) => write!(f, "WriteError({kind})"),
        }
    }
}

impl Display for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockError::BlockOutOfBounds(id) => write!(f, "block {id} out of bounds"),
            BlockError::BufferInvalid(len) => {
                write!(f, "invalid buffer size {len} (not `BLOCK_SIZE`)")
            }
            BlockError::InvalidGeometry(count) => {
                write!(f, "cannot lay out a block store of {count} blocks")
            }
            BlockError::InvalidImage => write!(f, "not a valid block store image"),
            BlockError::ReadError(kind) => write!(f, "error reading block store image: {kind}"),
            BlockError::WriteError(kind) => write!(f, "error writing block store image: {kind}"),
        }
    }
}

impl Error for BlockError {}
