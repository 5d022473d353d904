pub mod block_core;
pub mod block_error;

pub use block_core::{BlockId, BlockStore, BLOCK_SIZE, DEFAULT_BLOCK_COUNT, MAX_BLOCK_COUNT};
pub use block_error::BlockError;
