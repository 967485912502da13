//! The in-memory representation of one block of a [`Store`].
//!
//! A [`Block`] is shared behind an [`Arc`] by everyone interested in it, but its buffer lives only
//! as long as somebody holds a pin on it. Pins are counted by [`Block::allocate`] and
//! [`Block::free`]; [`PinnedBlock`] holds one for the duration of a scope. The cache that keeps a
//! block resident holds a pin of its own, so the count reaches zero only after the block has been
//! evicted and every user has let go of it. At that point a clean block returns its buffer to the
//! pool right away, while a dirty one is handed to a [`BlockWriter`] which writes it back first.
//!
//! The modified part of the buffer is tracked as a single [`DirtyRange`] per block. Writers of
//! the buffer are expected to widen it through [`Block::set_dirty`] once their bytes are in place.

use crate::{
    buffer_pool::{BufferPool, PooledBuffer},
    error::{Error, Result},
    lru::EvictionListener,
    metrics::{Metric, Metrics},
    store::Store,
};
use blockcache_core::{BlockId, DirtyRange};
use parking_lot::{
    Condvar, MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, MutexGuard, RwLock,
    RwLockReadGuard, RwLockWriteGuard,
};
use std::{
    fmt,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

pub use pinned::PinnedBlock;

mod pinned;


/// The write-back side of block reclamation.
///
/// Implemented by the owner of the block cache.
pub trait BlockWriter: Send + Sync {
    /// Queue a dirty block whose use count dropped to zero.
    ///
    /// The writer must eventually call [`Block::close_write`] on it.
    fn add_lru_dirty_write_block(&self, block: Arc<Block>);

    /// Signal that queued blocks are waiting to be written.
    fn wake_writer(&self);

    /// Called while the block is being removed from the cache, under the cache lock.
    fn on_block_evicting(&self, _block: &Arc<Block>) {}

    /// Called once the block's buffer has been released.
    fn on_block_closed(&self, _block: &Block) {}
}

/// A reference-counted, dirty-tracked view over one block of a [`Store`].
pub struct Block {
    id: BlockId,
    store: Arc<dyn Store>,
    use_count: AtomicUsize,
    // Non-zero while a physical write is in flight. Writes requested meanwhile add to it.
    // Only changed with `passes` held.
    write_count: AtomicUsize,
    passes: Mutex<WritePasses>,
    pass_done: Condvar,
    is_valid: AtomicBool,
    flush_on_commit: AtomicBool,
    dirty: Mutex<DirtyRange>,
    // `None` once the block is closed.
    buffer: RwLock<Option<PooledBuffer>>,
    writer: Option<Weak<dyn BlockWriter>>,
    metrics: Metrics,
}

impl Block {
    /// Create an unmanaged block with a use count of one.
    ///
    /// When its use count drops to zero while dirty, the block writes itself back synchronously.
    pub fn new(store: Arc<dyn Store>, id: BlockId, pool: &BufferPool) -> Arc<Self> {
        Self::build(store, id, pool, None, Metrics::new(false))
    }

    /// Create a block with a use count of one which hands itself to `writer` for write-back.
    pub fn with_writer(
        store: Arc<dyn Store>,
        id: BlockId,
        pool: &BufferPool,
        writer: Weak<dyn BlockWriter>,
        metrics: Metrics,
    ) -> Arc<Self> {
        Self::build(store, id, pool, Some(writer), metrics)
    }

    fn build(
        store: Arc<dyn Store>,
        id: BlockId,
        pool: &BufferPool,
        writer: Option<Weak<dyn BlockWriter>>,
        metrics: Metrics,
    ) -> Arc<Self> {
        debug_assert_eq!(store.store_id(), id.store_id());
        Arc::new(Block {
            id,
            store,
            use_count: AtomicUsize::new(1),
            write_count: AtomicUsize::new(0),
            passes: Mutex::new(WritePasses::default()),
            pass_done: Condvar::new(),
            is_valid: AtomicBool::new(false),
            flush_on_commit: AtomicBool::new(false),
            dirty: Mutex::new(DirtyRange::clean()),
            buffer: RwLock::new(Some(pool.allocate())),
            writer,
            metrics,
        })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    /// Whether the buffer reflects the persisted block.
    pub fn is_valid(&self) -> bool {
        self.is_valid.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.lock().is_clean()
    }

    pub fn dirty_range(&self) -> DirtyRange {
        *self.dirty.lock()
    }

    /// Whether the buffer has been given back to the pool.
    pub fn is_closed(&self) -> bool {
        self.buffer.read().is_none()
    }

    pub fn is_flush_on_commit(&self) -> bool {
        self.flush_on_commit.load(Ordering::Relaxed)
    }

    /// Set whether [`Block::commit`] writes the dirty range synchronously.
    pub fn set_flush_on_commit(&self, flush_on_commit: bool) {
        self.flush_on_commit
            .store(flush_on_commit, Ordering::Relaxed);
    }

    /// Add a pin.
    ///
    /// Fails once the use count has dropped to zero: the block is being reclaimed and must not be
    /// used any more. Fetch a fresh block for the id instead.
    pub fn allocate(&self) -> bool {
        self.use_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == 0 {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    /// Drop a pin.
    ///
    /// Dropping the last pin releases the buffer of a clean block. A dirty block is handed to its
    /// writer instead, which releases the buffer after writing it back.
    pub fn free(self: &Arc<Self>) -> Result<()> {
        let previous = self
            .use_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| Error::IllegalState("free of a block which is not in use"))?;
        if previous > 1 {
            return Ok(());
        }

        if !self.is_dirty() {
            self.close();
            return Ok(());
        }
        match self.writer() {
            Some(writer) => {
                self.metrics.count(Metric::DirtyWriteBacks);
                writer.add_lru_dirty_write_block(self.clone());
                writer.wake_writer();
            }
            None => self.close_write(),
        }
        Ok(())
    }

    /// Load the block from the store, unless the buffer is already valid.
    pub fn read(&self) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }

        let mut buffer = self.buffer.write();
        if self.is_valid() {
            return Ok(());
        }
        let buf = buffer.as_mut().ok_or(Error::Released(self.id))?;
        {
            let _timer = self.metrics.record(Metric::BlockReadTime);
            self.store.read_block(self.id, buf)?;
        }
        self.metrics.count(Metric::BlockReads);
        self.dirty.lock().take();
        self.is_valid.store(true, Ordering::Release);
        Ok(())
    }

    /// Declare the buffer valid without reading it, for blocks which were just allocated in the
    /// store and whose previous contents are irrelevant.
    pub fn validate(&self) -> Result<()> {
        let buffer = self.buffer.read();
        if buffer.is_none() {
            return Err(Error::Released(self.id));
        }
        self.is_valid.store(true, Ordering::Release);
        Ok(())
    }

    /// Mark the buffer as no longer reflecting the store, forcing the next [`Block::read`] to
    /// reload it. The block must be clean.
    pub fn invalidate(&self) -> Result<()> {
        let dirty = self.dirty.lock();
        if !dirty.is_clean() {
            return Err(Error::IllegalState("invalidate of a dirty block"));
        }
        self.is_valid.store(false, Ordering::Release);
        Ok(())
    }

    /// Widen the dirty range to include `[min, max)`.
    pub fn set_dirty(&self, min: usize, max: usize) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::IllegalState("set_dirty on an invalid block"));
        }
        let range = DirtyRange::new(min, max).ok_or(Error::InvalidRange { min, max })?;
        self.dirty.lock().widen(range);
        Ok(())
    }

    /// Forget the dirty range without writing it.
    pub fn clear_dirty(&self) {
        self.dirty.lock().take();
    }

    /// Write the dirty range to the store.
    ///
    /// At most one physical write per block is in flight. If one already is, the request is left
    /// to it: the in-flight writer repeats until no request arrived during its last write, and
    /// this call blocks until the pass covering it has finished, returning that pass's error.
    pub fn write(&self) -> Result<()> {
        self.write_with_priority(true)
    }

    /// Make the dirty range durable if this block flushes on commit. Otherwise leave it for the
    /// write-back on eviction.
    pub fn commit(&self) -> Result<()> {
        if self.is_flush_on_commit() {
            self.write()
        } else {
            Ok(())
        }
    }

    /// Write back the dirty range of an unpinned block and release its buffer.
    ///
    /// Write failures are logged and dropped: nobody is left to receive them.
    pub fn close_write(&self) {
        debug_assert_eq!(self.use_count(), 0);
        if let Err(err) = self.write_with_priority(false) {
            tracing::error!(block_id = ?self.id, %err, "write-back failed, dropping dirty range");
            self.clear_dirty();
        }
        self.close();
    }

    /// Shared access to the buffer.
    ///
    /// Do not hold the guard across [`Block::write`] or [`Block::read`] on the same thread.
    pub fn buffer(&self) -> Result<MappedRwLockReadGuard<'_, [u8]>> {
        RwLockReadGuard::try_map(self.buffer.read(), |buffer| buffer.as_deref())
            .map_err(|_| Error::Released(self.id))
    }

    /// Exclusive access to the buffer.
    ///
    /// Do not hold the guard across any other access to the block on the same thread.
    pub fn buffer_mut(&self) -> Result<MappedRwLockWriteGuard<'_, [u8]>> {
        RwLockWriteGuard::try_map(self.buffer.write(), |buffer| buffer.as_deref_mut())
            .map_err(|_| Error::Released(self.id))
    }

    fn writer(&self) -> Option<Arc<dyn BlockWriter>> {
        self.writer.as_ref().and_then(Weak::upgrade)
    }

    fn write_with_priority(&self, is_priority: bool) -> Result<()> {
        let mut passes = self.passes.lock();
        if self.write_count.fetch_add(1, Ordering::AcqRel) != 0 {
            // The pass in flight may have taken the dirty range before this request widened it.
            let target = passes.started + 1;
            while passes.finished < target {
                self.pass_done.wait(&mut passes);
            }
            return match &passes.failure {
                Some((failed, err)) if failed.contains(&target) => Err(err.replicate()),
                _ => Ok(()),
            };
        }

        loop {
            passes.started += 1;
            let pass = passes.started;
            let observed = self.write_count.load(Ordering::Acquire);
            let result = MutexGuard::unlocked(&mut passes, || self.write_dirty_range(is_priority));
            if let Err(err) = result {
                // Requests waiting on the next pass fail along with this one.
                let last = pass + 1;
                passes.started = last;
                passes.finished = last;
                passes.failure = Some((pass..=last, err.replicate()));
                self.write_count.store(0, Ordering::Release);
                self.pass_done.notify_all();
                return Err(err);
            }
            passes.finished = pass;
            self.pass_done.notify_all();
            if self
                .write_count
                .compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    // Performs one physical write of the current dirty range.
    //
    // The range is reset to clean before the I/O starts, so anything dirtied while the write is
    // in flight stays dirty for the next one. A failed write puts its range back.
    fn write_dirty_range(&self, is_priority: bool) -> Result<()> {
        let buffer = self.buffer.read();
        let range = self.dirty.lock().take();
        let Some(span) = range.as_range() else {
            return Ok(());
        };
        let Some(buf) = buffer.as_deref() else {
            self.dirty.lock().widen(range);
            return Err(Error::Released(self.id));
        };

        let result = {
            let _timer = self.metrics.record(Metric::BlockWriteTime);
            self.store
                .write_block(self.id, span.start, &buf[span.clone()], is_priority)
        };
        match result {
            Ok(()) => {
                self.metrics.count(Metric::BlockWrites);
                Ok(())
            }
            Err(err) => {
                self.dirty.lock().widen(range);
                Err(err.into())
            }
        }
    }

    // Release the buffer back to the pool.
    fn close(&self) {
        let buffer = self.buffer.write().take();
        self.is_valid.store(false, Ordering::Release);
        drop(buffer);
        tracing::trace!(block_id = ?self.id, "block closed");
        if let Some(writer) = self.writer() {
            writer.on_block_closed(self);
        }
    }
}

// Sequence numbers of the physical writes of one block.
#[derive(Default)]
struct WritePasses {
    started: u64,
    finished: u64,
    // The passes ended by the most recent failure.
    failure: Option<(RangeInclusive<u64>, Error)>,
}

impl EvictionListener for Arc<Block> {
    fn on_before_remove(&self) {
        if let Some(writer) = self.writer() {
            writer.on_block_evicting(self);
        }
    }

    // The cache's own pin goes with the entry.
    fn on_after_remove(&self) {
        if let Err(err) = self.free() {
            tracing::error!(block_id = ?self.id, %err, "failed to release evicted block");
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("use_count", &self.use_count())
            .field("is_valid", &self.is_valid())
            .field("dirty", &self.dirty_range())
            .finish()
    }
}
