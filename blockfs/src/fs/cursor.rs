use super::layout::{DIRECT_POINTERS, POINTERS_PER_BLOCK};
use crate::block::BLOCK_SIZE;

/// Which pointer tier of an inode a block is reached through.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    #[default]
    Direct,
    Indirect,
    DoubleIndirect,
}

impl Tier {
    /// Number of blocks reachable through this tier.
    const fn capacity(self) -> usize {
        match self {
            Tier::Direct => DIRECT_POINTERS,
            Tier::Indirect => POINTERS_PER_BLOCK,
            Tier::DoubleIndirect => POINTERS_PER_BLOCK * POINTERS_PER_BLOCK,
        }
    }

    /// Number of file blocks that come before this tier.
    const fn first_block(self) -> usize {
        match self {
            Tier::Direct => 0,
            Tier::Indirect => DIRECT_POINTERS,
            Tier::DoubleIndirect => DIRECT_POINTERS + POINTERS_PER_BLOCK,
        }
    }
}

/// Where the pointer to a file block is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSlot {
    /// `direct[index]` of the inode
    Direct(usize),
    /// entry `index` of the indirect block
    Indirect(usize),
    /// entry `inner` of the indirect block at entry `outer` of the double-indirect block
    DoubleIndirect { outer: usize, inner: usize },
}

/// Position of an open file, kept the way it is addressed: tier, block index within
/// the tier, and byte offset within the block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    tier: Tier,
    index: u32,
    offset: u16,
}

impl Cursor {
    /// Cursor for absolute byte position `position`.
    pub fn at(position: u64) -> Self {
        let block = position / BLOCK_SIZE as u64;
        // always below BLOCK_SIZE
        let offset = (position % BLOCK_SIZE as u64) as u16;
        let (tier, index) = if block < Tier::Indirect.first_block() as u64 {
            (Tier::Direct, block)
        } else if block < Tier::DoubleIndirect.first_block() as u64 {
            (Tier::Indirect, block - Tier::Indirect.first_block() as u64)
        } else {
            (Tier::DoubleIndirect, block - Tier::DoubleIndirect.first_block() as u64)
        };
        Self {
            tier,
            index: u32::try_from(index).unwrap_or(u32::MAX),
            offset,
        }
    }

    /// Absolute byte position.
    pub fn position(&self) -> u64 {
        let block = self.tier.first_block() as u64 + u64::from(self.index);
        block * BLOCK_SIZE as u64 + u64::from(self.offset)
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn offset(&self) -> usize {
        usize::from(self.offset)
    }

    /// Bytes left before the cursor reaches the next block.
    pub fn remaining_in_block(&self) -> usize {
        BLOCK_SIZE - self.offset()
    }

    /// The pointer slot of the block under the cursor, or `None` past the largest
    /// addressable file.
    pub fn slot(&self) -> Option<BlockSlot> {
        let index = self.index as usize;
        if index >= self.tier.capacity() {
            return None;
        }
        Some(match self.tier {
            Tier::Direct => BlockSlot::Direct(index),
            Tier::Indirect => BlockSlot::Indirect(index),
            Tier::DoubleIndirect => BlockSlot::DoubleIndirect {
                outer: index / POINTERS_PER_BLOCK,
                inner: index % POINTERS_PER_BLOCK,
            },
        })
    }

    /// Move forward by `bytes`, which must not run past the current block.
    ///
    /// Stepping off the last block of a tier moves on to index 0 of the next tier.
    pub fn advance(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.remaining_in_block());
        let offset = self.offset() + bytes;
        if offset < BLOCK_SIZE {
            // checked against BLOCK_SIZE above
            self.offset = offset as u16;
            return;
        }
        self.offset = 0;
        self.index += 1;
        if self.index as usize == self.tier.capacity() {
            match self.tier {
                Tier::Direct => {
                    self.tier = Tier::Indirect;
                    self.index = 0;
                }
                Tier::Indirect => {
                    self.tier = Tier::DoubleIndirect;
                    self.index = 0;
                }
                // stays past the end; slot() reports None from here on
                Tier::DoubleIndirect => {}
            }
        }
    }
}
