//! A free-list of block-sized buffers.
//!
//! Blocks and isolated write views are short-lived relative to the process, but each of them
//! needs a [`BLOCK_SIZE`] buffer. [`BufferPool`] keeps a bounded number of released buffers around
//! so that they can be handed out again without going through the allocator.

use blockcache_core::BLOCK_SIZE;
use parking_lot::Mutex;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// A buffer obtained from a [`BufferPool`].
///
/// The buffer is always exactly [`BLOCK_SIZE`] bytes long and goes back to its pool on drop.
pub struct PooledBuffer {
    pool: BufferPool,
    // INVARIANT: `Some` until dropped.
    data: Option<Box<[u8]>>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // UNWRAP: only taken in `drop`.
        self.data.as_deref().unwrap()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // UNWRAP: only taken in `drop`.
        self.data.as_deref_mut().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// A bounded pool of reusable [`BLOCK_SIZE`] buffers.
///
/// This is cheap to clone; clones share the same free-list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

struct Inner {
    freelist: Mutex<Vec<Box<[u8]>>>,
    max_free: usize,
}

impl BufferPool {
    /// Creates a pool that keeps up to `max_free` released buffers for reuse.
    pub fn new(max_free: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                freelist: Mutex::new(Vec::with_capacity(max_free)),
                max_free,
            }),
        }
    }

    /// Allocates a zero-filled buffer, reusing a released one if available.
    pub fn allocate(&self) -> PooledBuffer {
        let reused = self.inner.freelist.lock().pop();
        let data = match reused {
            Some(mut data) => {
                data.fill(0);
                data
            }
            None => vec![0u8; BLOCK_SIZE].into_boxed_slice(),
        };
        PooledBuffer {
            pool: self.clone(),
            data: Some(data),
        }
    }

    /// Allocates a buffer holding a copy of `src`.
    ///
    /// Panics if `src` is not exactly [`BLOCK_SIZE`] bytes long.
    pub fn allocate_copy(&self, src: &[u8]) -> PooledBuffer {
        assert_eq!(src.len(), BLOCK_SIZE);
        let reused = self.inner.freelist.lock().pop();
        let data = match reused {
            Some(mut data) => {
                data.copy_from_slice(src);
                data
            }
            None => src.to_vec().into_boxed_slice(),
        };
        PooledBuffer {
            pool: self.clone(),
            data: Some(data),
        }
    }

    /// Returns a buffer to the pool.
    ///
    /// Equivalent to dropping it.
    pub fn free(&self, buffer: PooledBuffer) {
        drop(buffer)
    }

    /// The number of released buffers currently available for reuse.
    pub fn free_count(&self) -> usize {
        self.inner.freelist.lock().len()
    }

    fn release(&self, data: Box<[u8]>) {
        let mut freelist = self.inner.freelist.lock();
        if freelist.len() < self.inner.max_free {
            freelist.push(data);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::BufferPool;
    use blockcache_core::BLOCK_SIZE;

    #[test]
    fn allocated_buffers_are_block_sized_and_zeroed() {
        let pool = BufferPool::new(4);
        let mut buf = pool.allocate();
        assert_eq!(buf.len(), BLOCK_SIZE);
        assert!(buf.iter().all(|b| *b == 0));
        buf[0] = 0xff;
        drop(buf);

        let buf = pool.allocate();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn released_buffers_are_reused() {
        let pool = BufferPool::new(4);
        let a = pool.allocate();
        let ptr = a.as_ptr();
        pool.free(a);
        assert_eq!(pool.free_count(), 1);

        let b = pool.allocate();
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn overflow_is_dropped() {
        let pool = BufferPool::new(2);
        let bufs = (0..5).map(|_| pool.allocate()).collect::<Vec<_>>();
        drop(bufs);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn allocate_copy_snapshots_source() {
        let pool = BufferPool::new(1);
        let mut src = vec![0u8; BLOCK_SIZE];
        src[..4].copy_from_slice(b"AAAA");
        let copy = pool.allocate_copy(&src);
        src[..4].copy_from_slice(b"BBBB");
        assert_eq!(&copy[..4], b"AAAA");
    }
}
