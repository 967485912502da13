//! The durable block device fronted by the cache.

use blockcache_core::{BlockId, StoreId};
use std::io;

pub use file::FileStore;
pub use memory::{MemStore, WriteRecord};

mod file;
mod memory;

/// A durable, block-addressed device.
///
/// Blocks are [`BLOCK_SIZE`](crate::BLOCK_SIZE) bytes long and located at
/// [`BlockId::address`]. Implementations must be safe to call from many threads at once.
pub trait Store: Send + Sync {
    /// The id embedded in the low bits of every [`BlockId`] of this store.
    fn store_id(&self) -> StoreId;

    /// Read a whole block into `buf`, which is exactly one block long.
    ///
    /// Bytes past the end of the underlying device read as zero.
    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> io::Result<()>;

    /// Write `data` at byte `offset` within the block.
    ///
    /// `is_priority` marks writes a caller is waiting on, as opposed to background write-back.
    fn write_block(
        &self,
        block_id: BlockId,
        offset: usize,
        data: &[u8],
        is_priority: bool,
    ) -> io::Result<()>;

    /// Release a block. Its contents become unspecified.
    fn free_block(&self, block_id: BlockId) -> io::Result<()>;
}

fn check_block(store_id: StoreId, block_id: BlockId) -> io::Result<()> {
    if block_id.store_id() != store_id {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{block_id:?} does not belong to store {}", store_id.0),
        ));
    }
    Ok(())
}

fn check_span(offset: usize, len: usize) -> io::Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= crate::BLOCK_SIZE => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("write of {len} bytes at {offset} exceeds the block"),
        )),
    }
}
