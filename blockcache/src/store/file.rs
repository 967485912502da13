#[cfg(not(target_family = "unix"))]
std::compile_error!("FileStore only supports Unix-based OSs");

use super::{check_block, check_span, Store};
use blockcache_core::{BlockId, StoreId, BLOCK_SIZE};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt as _,
    path::Path,
};

/// A [`Store`] backed by a single file, block `n` living at byte `n * BLOCK_SIZE`.
pub struct FileStore {
    store_id: StoreId,
    file: File,
    alloc: Mutex<Allocator>,
}

struct Allocator {
    // the index one past the highest block ever handed out.
    bump: u64,
    free: Vec<u64>,
}

impl FileStore {
    /// Open the file at `path`, creating it if it does not exist.
    pub fn open(path: impl AsRef<Path>, store_id: StoreId) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        let bump = len.div_ceil(BLOCK_SIZE as u64);
        tracing::debug!(path = %path.as_ref().display(), blocks = bump, "opened file store");
        Ok(Self {
            store_id,
            file,
            alloc: Mutex::new(Allocator { bump, free: vec![] }),
        })
    }

    /// Hand out a block which is not in use, preferring previously freed ones.
    pub fn allocate_block(&self) -> BlockId {
        let mut alloc = self.alloc.lock();
        let index = match alloc.free.pop() {
            Some(index) => index,
            None => {
                alloc.bump += 1;
                alloc.bump - 1
            }
        };
        BlockId::new(self.store_id, index)
    }

    /// The number of blocks the file spans, used or not.
    pub fn block_count(&self) -> u64 {
        self.alloc.lock().bump
    }

    /// Flush written data to the device.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

impl Store for FileStore {
    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> io::Result<()> {
        check_block(self.store_id, block_id)?;
        let address = block_id.address();
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], address + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_block(
        &self,
        block_id: BlockId,
        offset: usize,
        data: &[u8],
        _is_priority: bool,
    ) -> io::Result<()> {
        check_block(self.store_id, block_id)?;
        check_span(offset, data.len())?;
        self.file
            .write_all_at(data, block_id.address() + offset as u64)
    }

    fn free_block(&self, block_id: BlockId) -> io::Result<()> {
        check_block(self.store_id, block_id)?;
        let mut alloc = self.alloc.lock();
        if block_id.index() >= alloc.bump || alloc.free.contains(&block_id.index()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{block_id:?} is not allocated"),
            ));
        }
        alloc.free.push(block_id.index());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FileStore;
    use crate::store::Store;
    use blockcache_core::{BlockId, StoreId, BLOCK_SIZE};
    use tempfile::NamedTempFile;

    #[test]
    fn write_then_reopen() {
        let (_file, path) = NamedTempFile::new().unwrap().into_parts();
        let store = FileStore::open(&path, StoreId(1)).unwrap();
        let a = store.allocate_block();
        let b = store.allocate_block();
        assert_eq!(a, BlockId::new(StoreId(1), 0));
        assert_eq!(b, BlockId::new(StoreId(1), 1));

        store.write_block(a, 0, b"hello", true).unwrap();
        store.write_block(b, 100, b"world", false).unwrap();
        store.sync().unwrap();
        drop(store);

        let store = FileStore::open(&path, StoreId(1)).unwrap();
        let mut buf = vec![0xaa; BLOCK_SIZE];
        store.read_block(a, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"hello");
        assert!(buf[5..].iter().all(|b| *b == 0));

        store.read_block(b, &mut buf).unwrap();
        assert_eq!(&buf[100..105], b"world");
        // the second block was only partially written: the tail past EOF reads as zero.
        assert!(buf[105..].iter().all(|b| *b == 0));
        assert_eq!(store.block_count(), 2);
    }

    #[test]
    fn freed_blocks_are_reused() {
        let (_file, path) = NamedTempFile::new().unwrap().into_parts();
        let store = FileStore::open(&path, StoreId(0)).unwrap();
        let a = store.allocate_block();
        let _b = store.allocate_block();
        store.free_block(a).unwrap();
        assert!(store.free_block(a).is_err());
        assert_eq!(store.allocate_block(), a);
    }

    #[test]
    fn rejects_foreign_blocks_and_overlong_writes() {
        let (_file, path) = NamedTempFile::new().unwrap().into_parts();
        let store = FileStore::open(&path, StoreId(3)).unwrap();
        let foreign = BlockId::new(StoreId(4), 0);
        let mut buf = vec![0; BLOCK_SIZE];
        assert!(store.read_block(foreign, &mut buf).is_err());

        let own = store.allocate_block();
        assert!(store.write_block(own, BLOCK_SIZE - 1, b"xy", true).is_err());
    }
}
