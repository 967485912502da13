use super::{check_block, check_span, Store};
use blockcache_core::{BlockId, StoreId, BLOCK_SIZE};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

/// A physical write observed by a [`MemStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub block_id: BlockId,
    pub offset: usize,
    pub len: usize,
    pub is_priority: bool,
}

/// A [`Store`] keeping its blocks in memory.
///
/// Besides serving ephemeral caches, it records every write and can be told to fail, which makes
/// it the store of choice for exercising the cache.
pub struct MemStore {
    store_id: StoreId,
    blocks: Mutex<HashMap<u64, Box<[u8]>>>,
    writes: Mutex<Vec<WriteRecord>>,
    freed: Mutex<Vec<BlockId>>,
    reads: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
}

impl MemStore {
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            blocks: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            freed: Mutex::new(Vec::new()),
            reads: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            writes_in_flight: AtomicUsize::new(0),
            max_writes_in_flight: AtomicUsize::new(0),
        }
    }

    /// Place `data` at the start of a block without recording a write.
    pub fn seed(&self, block_id: BlockId, data: &[u8]) {
        let mut blocks = self.blocks.lock();
        let block = blocks
            .entry(block_id.index())
            .or_insert_with(|| vec![0; BLOCK_SIZE].into_boxed_slice());
        block[..data.len()].copy_from_slice(data);
    }

    /// A copy of the persisted contents of a block.
    pub fn contents(&self, block_id: BlockId) -> Vec<u8> {
        self.blocks
            .lock()
            .get(&block_id.index())
            .map_or_else(|| vec![0; BLOCK_SIZE], |block| block.to_vec())
    }

    /// Every write performed so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Every block freed so far, oldest first.
    pub fn freed(&self) -> Vec<BlockId> {
        self.freed.lock().clone()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// The highest number of writes ever observed executing at the same time.
    pub fn writes_in_flight(&self) -> usize {
        self.writes_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_writes_in_flight(&self) -> usize {
        self.max_writes_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every write sleep for `delay` before it takes effect.
    pub fn write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }
}

impl Store for MemStore {
    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> io::Result<()> {
        check_block(self.store_id, block_id)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.blocks.lock().get(&block_id.index()) {
            Some(block) => buf.copy_from_slice(block),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(
        &self,
        block_id: BlockId,
        offset: usize,
        data: &[u8],
        is_priority: bool,
    ) -> io::Result<()> {
        check_block(self.store_id, block_id)?;
        check_span(offset, data.len())?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }

        let in_flight = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writes_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        {
            let mut blocks = self.blocks.lock();
            let block = blocks
                .entry(block_id.index())
                .or_insert_with(|| vec![0; BLOCK_SIZE].into_boxed_slice());
            block[offset..offset + data.len()].copy_from_slice(data);
        }
        self.writes.lock().push(WriteRecord {
            block_id,
            offset,
            len: data.len(),
            is_priority,
        });
        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn free_block(&self, block_id: BlockId) -> io::Result<()> {
        check_block(self.store_id, block_id)?;
        self.blocks.lock().remove(&block_id.index());
        self.freed.lock().push(block_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemStore, WriteRecord};
    use crate::store::Store;
    use blockcache_core::{BlockId, StoreId, BLOCK_SIZE};

    #[test]
    fn records_writes() {
        let store = MemStore::new(StoreId(0));
        let id = BlockId::new(StoreId(0), 2);
        store.write_block(id, 4, b"abcd", true).unwrap();
        assert_eq!(
            store.writes(),
            vec![WriteRecord {
                block_id: id,
                offset: 4,
                len: 4,
                is_priority: true,
            }]
        );
        assert_eq!(&store.contents(id)[..8], b"\0\0\0\0abcd");
    }

    #[test]
    fn unknown_blocks_read_as_zero() {
        let store = MemStore::new(StoreId(0));
        let mut buf = vec![1; BLOCK_SIZE];
        store
            .read_block(BlockId::new(StoreId(0), 9), &mut buf)
            .unwrap();
        assert!(buf.iter().all(|b| *b == 0));
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn injected_failures() {
        let store = MemStore::new(StoreId(0));
        let id = BlockId::new(StoreId(0), 0);
        store.fail_writes(true);
        assert!(store.write_block(id, 0, b"x", false).is_err());
        store.fail_reads(true);
        let mut buf = vec![0; BLOCK_SIZE];
        assert!(store.read_block(id, &mut buf).is_err());
        assert!(store.writes().is_empty());
    }
}
