/// Options when creating a [`crate::BlockManager`].
#[derive(Clone, Debug)]
pub struct Options {
    /// The maximum number of blocks resident in the block cache.
    pub(crate) cache_capacity: usize,
    /// The maximum number of free buffers kept by the buffer pool for reuse.
    pub(crate) buffer_pool_capacity: usize,
    /// Whether blocks created by the manager persist their dirty range on `commit`.
    pub(crate) flush_on_commit: bool,
    /// Enable or disable metrics collection.
    pub(crate) metrics: bool,
    /// The name given to the background writer thread.
    pub(crate) writer_thread_name: String,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    pub fn new() -> Self {
        Self {
            cache_capacity: 256,
            buffer_pool_capacity: 64,
            flush_on_commit: false,
            metrics: false,
            writer_thread_name: "blockcache-writer".to_string(),
        }
    }

    /// Set the maximum number of resident blocks.
    ///
    /// Each resident block holds a buffer of [`crate::BLOCK_SIZE`] bytes.
    ///
    /// Must be more than 0. Default: 256 (16 MiB).
    pub fn cache_capacity(&mut self, cache_capacity: usize) {
        assert!(cache_capacity > 0);
        self.cache_capacity = cache_capacity;
    }

    /// Set the number of released buffers kept around for reuse.
    ///
    /// Buffers released while the pool is full are deallocated.
    ///
    /// Default: 64.
    pub fn buffer_pool_capacity(&mut self, buffer_pool_capacity: usize) {
        self.buffer_pool_capacity = buffer_pool_capacity;
    }

    /// Set whether `commit` synchronously writes the dirty range of a block.
    ///
    /// When off, dirty ranges are written once the block is evicted or the manager is flushed.
    ///
    /// Default: off.
    pub fn flush_on_commit(&mut self, flush_on_commit: bool) {
        self.flush_on_commit = flush_on_commit;
    }

    /// Set metrics collection on or off.
    ///
    /// Default: off.
    pub fn metrics(&mut self, metrics: bool) {
        self.metrics = metrics;
    }

    /// Set the name of the background writer thread.
    pub fn writer_thread_name(&mut self, name: impl Into<String>) {
        self.writer_thread_name = name.into();
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn default_cache_is_16_mib() {
    // Update the docs above if this fails.
    assert_eq!(Options::new().cache_capacity * crate::BLOCK_SIZE, 16 << 20);
}
