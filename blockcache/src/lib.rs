//! A block cache for block-addressed stores.
//!
//! Blocks of [`BLOCK_SIZE`] bytes are cached by a [`BlockManager`] in a two-segment
//! [`LruCache`]. Each cached [`Block`] counts its users and tracks the byte range modified since
//! it was last written. Clean blocks give their buffer back to the [`BufferPool`] as soon as the
//! last user lets go after eviction, dirty blocks are written back by a background writer first.
//!
//! Modifications go through a [`WriteView`]: either an [`AutoCommitView`] writing the shared
//! buffer directly, or an [`IsolatedView`] keeping changes private until commit.

pub use blockcache_core::{
    BlockId, DirtyRange, StoreId, BLOCK_BITS, BLOCK_INDEX_MASK, BLOCK_MASK, BLOCK_SIZE,
};

pub use block::{Block, BlockWriter, PinnedBlock};
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use error::{Error, Result};
pub use lru::{Evictable, EvictionListener, LruCache};
pub use manager::BlockManager;
pub use metrics::{Metric, Metrics};
pub use options::Options;
pub use store::{FileStore, MemStore, Store, WriteRecord};
pub use view::{AutoCommitView, IsolatedView, WriteView};

mod block;
mod buffer_pool;
mod error;
pub mod lru;
mod manager;
mod metrics;
mod options;
mod store;
mod view;
