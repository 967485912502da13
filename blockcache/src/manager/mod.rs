//! The block manager: a block cache shared by any number of stores.
//!
//! Every resident block is held by the cache with one pin. When the cache evicts a block it
//! first moves to the retired map, where it stays until its buffer is closed. A request for a
//! retired block either takes it back into the cache, if somebody still pins it, or waits for it
//! to close, so that one id is never represented by two blocks at once and a dirty block is
//! never re-read from the store before its write-back completes.
//!
//! Dirty blocks released by their last user are written back by a single background writer.
//!
//! Lock order: `miss_lock`, then the cache, then `retired`. The cache calls into `retired` from
//! its eviction hook, so `retired` is never held while touching the cache.

use crate::{
    block::{Block, BlockWriter, PinnedBlock},
    buffer_pool::BufferPool,
    error::{Error, Result},
    lru::{Evictable, LruCache},
    metrics::{Metric, Metrics},
    options::Options,
    store::Store,
};
use bitvec::prelude::*;
use blockcache_core::{BlockId, StoreId};
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use threadpool::ThreadPool;

use self::writer::WriterCommand;

mod writer;


const STORE_ID_COUNT: usize = 1 << 16;

/// A handle to the block cache. Dropping it flushes every dirty block and stops the writer.
pub struct BlockManager {
    shared: Arc<Shared>,
    writer_tp: ThreadPool,
}

struct Shared {
    cache: LruCache<BlockId, Arc<Block>>,
    pool: BufferPool,
    metrics: Metrics,
    flush_on_commit: bool,
    // Blocks removed from the cache whose buffer has not been closed yet.
    retired: Mutex<HashMap<BlockId, Arc<Block>, ahash::RandomState>>,
    retired_closed: Condvar,
    miss_lock: Mutex<()>,
    dirty_queue: Mutex<Vec<Arc<Block>>>,
    commands: Sender<WriterCommand>,
    store_ids: Mutex<BitVec<u64, Lsb0>>,
}

impl BlockManager {
    /// Create a block manager and start its writer thread.
    pub fn new(options: Options) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            cache: LruCache::new(options.cache_capacity),
            pool: BufferPool::new(options.buffer_pool_capacity),
            metrics: Metrics::new(options.metrics),
            flush_on_commit: options.flush_on_commit,
            retired: Mutex::new(HashMap::with_hasher(ahash::RandomState::new())),
            retired_closed: Condvar::new(),
            miss_lock: Mutex::new(()),
            dirty_queue: Mutex::new(Vec::new()),
            commands: command_tx,
            store_ids: Mutex::new(bitvec![u64, Lsb0; 0; STORE_ID_COUNT]),
        });

        let writer_tp = ThreadPool::with_name(options.writer_thread_name.clone(), 1);
        writer::spawn(&writer_tp, shared.clone(), command_rx);

        BlockManager { shared, writer_tp }
    }

    /// Reserve an id for a new store. `None` once every id is taken.
    pub fn allocate_store_id(&self) -> Option<StoreId> {
        let mut store_ids = self.shared.store_ids.lock();
        let free = store_ids.first_zero()?;
        store_ids.set(free, true);
        Some(StoreId(free as u16))
    }

    /// Give back an id obtained from [`BlockManager::allocate_store_id`].
    pub fn free_store_id(&self, store_id: StoreId) -> Result<()> {
        let was_allocated = self
            .shared
            .store_ids
            .lock()
            .replace(store_id.to_u16() as usize, false);
        if was_allocated {
            Ok(())
        } else {
            Err(Error::IllegalState("free of a store id which is not allocated"))
        }
    }

    /// Get the block `id` of `store`, pinned for the caller. The buffer is not loaded.
    pub fn get_block(&self, store: &Arc<dyn Store>, id: BlockId) -> Result<PinnedBlock> {
        if store.store_id() != id.store_id() {
            return Err(Error::IllegalState("block id does not belong to the store"));
        }
        self.shared.metrics.count(Metric::BlockRequests);

        loop {
            if let Some(block) = self.shared.cache.get(&id) {
                match PinnedBlock::pin(&block) {
                    Some(pinned) => return Ok(pinned),
                    // Evicted and released since the lookup.
                    None => continue,
                }
            }

            let miss = self.shared.miss_lock.lock();
            if self.shared.cache.contains_key(&id) {
                continue;
            }

            let mut retired = self.shared.retired.lock();
            if let Some(block) = retired.get(&id).cloned() {
                if let Some(pinned) = PinnedBlock::pin(&block) {
                    // The cache's pin. Cannot fail while `pinned` is held.
                    let cache_pin = block.allocate();
                    debug_assert!(cache_pin);
                    retired.remove(&id);
                    drop(retired);
                    tracing::trace!(block_id = ?id, "reusing retired block");
                    self.insert(id, block);
                    return Ok(pinned);
                }

                // Released with a pending write-back. Wait for it to reach the store.
                drop(miss);
                while retired.get(&id).map_or(false, |r| Arc::ptr_eq(r, &block)) {
                    self.shared.retired_closed.wait(&mut retired);
                }
                continue;
            }
            drop(retired);

            self.shared.metrics.count(Metric::BlockCacheMisses);
            let writer = Arc::downgrade(&self.shared) as Weak<dyn BlockWriter>;
            let block = Block::with_writer(
                store.clone(),
                id,
                &self.shared.pool,
                writer,
                self.shared.metrics.clone(),
            );
            block.set_flush_on_commit(self.shared.flush_on_commit);
            // UNWRAP: a new block starts with the cache's pin.
            let pinned = PinnedBlock::pin(&block).unwrap();
            self.insert(id, block);
            drop(miss);
            return Ok(pinned);
        }
    }

    /// Get the block `id` of `store`, pinned for the caller and loaded.
    pub fn read_block(&self, store: &Arc<dyn Store>, id: BlockId) -> Result<PinnedBlock> {
        let block = self.get_block(store, id)?;
        block.read()?;
        Ok(block)
    }

    /// Drop block `id` from the cache without writing it back, then free it in `store`.
    pub fn free_block(&self, store: &Arc<dyn Store>, id: BlockId) -> Result<()> {
        {
            let _miss = self.shared.miss_lock.lock();
            if let Some(block) = self.shared.cache.peek(&id) {
                block.clear_dirty();
                self.shared.cache.remove(&id);
            }
            if let Some(block) = self.shared.retired.lock().get(&id) {
                block.clear_dirty();
            }
        }
        store.free_block(id)?;
        Ok(())
    }

    /// Write every dirty block in the cache and wait for queued write-backs to finish.
    ///
    /// Every block is attempted. The first failure is returned.
    pub fn flush(&self) -> Result<()> {
        let blocks: Vec<Arc<Block>> = self.shared.cache.values().collect();
        let mut result = Ok(());
        for block in blocks {
            let Some(pinned) = PinnedBlock::pin(&block) else {
                continue;
            };
            if !pinned.is_dirty() {
                continue;
            }
            if let Err(err) = pinned.write() {
                tracing::warn!(block_id = ?pinned.id(), %err, "flush failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.join_writer();
        result
    }

    /// Queue a dirty, fully released block for the writer.
    pub fn add_lru_dirty_write_block(&self, block: Arc<Block>) {
        self.shared.add_lru_dirty_write_block(block);
    }

    /// Wake the writer to process its queue.
    pub fn wake_writer(&self) {
        self.shared.wake_writer();
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.clone()
    }

    /// The number of blocks resident in the cache.
    pub fn resident_count(&self) -> usize {
        self.shared.cache.len()
    }

    fn insert(&self, id: BlockId, block: Arc<Block>) {
        let replaced = self.shared.cache.put(id, Evictable::listening(block));
        debug_assert!(replaced.is_none());
    }

    fn join_writer(&self) {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self
            .shared
            .commands
            .send(WriterCommand::Join(done_tx))
            .is_ok()
        {
            let _ = done_rx.recv();
        } else {
            self.shared.write_queued();
        }
    }
}

impl Drop for BlockManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!(%err, "failed to flush the block cache on close");
        }
        self.shared.cache.clear();
        let _ = self.shared.commands.send(WriterCommand::Shutdown);
        self.writer_tp.join();
        // Blocks released after the writer stopped.
        self.shared.write_queued();
    }
}

impl Shared {
    // Close queued blocks until the queue stays empty.
    fn write_queued(&self) {
        loop {
            let queued = std::mem::take(&mut *self.dirty_queue.lock());
            if queued.is_empty() {
                return;
            }
            tracing::debug!(count = queued.len(), "writing back released blocks");
            for block in queued {
                block.close_write();
            }
        }
    }
}

impl BlockWriter for Shared {
    fn add_lru_dirty_write_block(&self, block: Arc<Block>) {
        self.dirty_queue.lock().push(block);
    }

    fn wake_writer(&self) {
        if self.commands.send(WriterCommand::Wake).is_err() {
            self.write_queued();
        }
    }

    fn on_block_evicting(&self, block: &Arc<Block>) {
        self.metrics.count(Metric::Evictions);
        tracing::trace!(block_id = ?block.id(), "block leaving the cache");
        self.retired.lock().insert(block.id(), block.clone());
    }

    fn on_block_closed(&self, block: &Block) {
        let mut retired = self.retired.lock();
        let is_retired = retired
            .get(&block.id())
            .map_or(false, |r| std::ptr::eq(Arc::as_ptr(r), block));
        if is_retired {
            retired.remove(&block.id());
            self.retired_closed.notify_all();
        }
    }
}
