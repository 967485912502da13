use blockcache::{BlockId, BlockManager, MemStore, Options, Store};
use std::sync::Arc;

pub struct Harness {
    pub manager: BlockManager,
    pub mem: Arc<MemStore>,
    pub store: Arc<dyn Store>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(cache_capacity: usize) -> Self {
        Self::with_options(cache_capacity, |_| {})
    }

    pub fn with_options(cache_capacity: usize, configure: impl FnOnce(&mut Options)) -> Self {
        let mut options = Options::new();
        options.cache_capacity(cache_capacity);
        options.metrics(true);
        configure(&mut options);
        let manager = BlockManager::new(options);
        // UNWRAP: a fresh manager has every store id free.
        let store_id = manager.allocate_store_id().unwrap();
        let mem = Arc::new(MemStore::new(store_id));
        let store = mem.clone() as Arc<dyn Store>;
        Harness {
            manager,
            mem,
            store,
        }
    }

    pub fn id(&self, index: u64) -> BlockId {
        BlockId::new(self.store.store_id(), index)
    }

    /// Overwrite the start of block `index` and mark it dirty.
    pub fn write(&self, index: u64, bytes: &[u8]) {
        let block = self.manager.read_block(&self.store, self.id(index)).unwrap();
        block.buffer_mut().unwrap()[..bytes.len()].copy_from_slice(bytes);
        block.set_dirty(0, bytes.len()).unwrap();
    }

    /// The first `len` bytes of block `index` as seen through the cache.
    pub fn read(&self, index: u64, len: usize) -> Vec<u8> {
        let block = self.manager.read_block(&self.store, self.id(index)).unwrap();
        let bytes = block.buffer().unwrap()[..len].to_vec();
        bytes
    }
}

