//! Write views over a pinned block.
//!
//! A view is how a transaction modifies a block. [`AutoCommitView`] writes straight into the
//! block's shared buffer, so its changes are visible to every reader at once. [`IsolatedView`]
//! works on a private copy taken when the view is opened and merges the modified range into the
//! block on [`WriteView::commit`], so readers observe the old contents until then.
//!
//! At most one view may be writing a block at a time, and mixing an isolated view with an
//! auto-commit view on the same block is not supported: nothing detects the conflict, so the
//! owner of the block must serialize writers by other means, such as a per-block lock.

use crate::{
    block::PinnedBlock,
    buffer_pool::{BufferPool, PooledBuffer},
    error::{Error, Result},
};
use blockcache_core::{DirtyRange, BLOCK_SIZE};
use std::ops::Range;

/// Write access to a block.
pub trait WriteView {
    /// The block this view writes.
    fn block(&self) -> &PinnedBlock;

    /// Copy the bytes at `offset` as seen by this view into `dst`.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` to `offset` and mark those bytes dirty.
    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()>;

    /// Mark `[min, max)` dirty after modifying it.
    fn set_dirty(&mut self, min: usize, max: usize) -> Result<()>;

    /// Make this view's changes part of the block, writing them out if the block flushes on
    /// commit.
    fn commit(&mut self) -> Result<()>;
}

fn span(offset: usize, len: usize) -> Result<Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= BLOCK_SIZE => Ok(offset..end),
        _ => Err(Error::InvalidRange {
            min: offset,
            max: offset.saturating_add(len),
        }),
    }
}

/// A view sharing the block's buffer.
pub struct AutoCommitView {
    block: PinnedBlock,
}

impl AutoCommitView {
    /// Open a view on `block`, loading it first if necessary.
    pub fn new(block: &PinnedBlock) -> Result<Self> {
        block.read()?;
        Ok(AutoCommitView {
            block: block.clone(),
        })
    }
}

impl WriteView for AutoCommitView {
    fn block(&self) -> &PinnedBlock {
        &self.block
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let span = span(offset, dst.len())?;
        dst.copy_from_slice(&self.block.buffer()?[span]);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let span = span(offset, src.len())?;
        self.block.buffer_mut()?[span.clone()].copy_from_slice(src);
        self.block.set_dirty(span.start, span.end)
    }

    fn set_dirty(&mut self, min: usize, max: usize) -> Result<()> {
        self.block.set_dirty(min, max)
    }

    fn commit(&mut self) -> Result<()> {
        self.block.commit()
    }
}

/// A view working on a private copy of the block.
///
/// Dropping the view without committing discards its changes.
pub struct IsolatedView {
    block: PinnedBlock,
    buffer: PooledBuffer,
    pending: DirtyRange,
}

impl IsolatedView {
    /// Open a view on `block`, loading it first if necessary, with a private copy taken from
    /// `pool`.
    pub fn new(block: &PinnedBlock, pool: &BufferPool) -> Result<Self> {
        block.read()?;
        let buffer = pool.allocate_copy(&block.buffer()?);
        Ok(IsolatedView {
            block: block.clone(),
            buffer,
            pending: DirtyRange::clean(),
        })
    }

    /// The range modified since the view was opened or last committed.
    pub fn pending(&self) -> DirtyRange {
        self.pending
    }

    /// Copy `[offset, offset + len)` of the private copy into the block and mark it dirty there.
    pub fn write_impl(&self, offset: usize, len: usize) -> Result<()> {
        let span = span(offset, len)?;
        self.block.buffer_mut()?[span.clone()].copy_from_slice(&self.buffer[span.clone()]);
        self.block.set_dirty(span.start, span.end)
    }
}

impl WriteView for IsolatedView {
    fn block(&self) -> &PinnedBlock {
        &self.block
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let span = span(offset, dst.len())?;
        dst.copy_from_slice(&self.buffer[span]);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let span = span(offset, src.len())?;
        self.buffer[span.clone()].copy_from_slice(src);
        self.set_dirty(span.start, span.end)
    }

    fn set_dirty(&mut self, min: usize, max: usize) -> Result<()> {
        let range = DirtyRange::new(min, max).ok_or(Error::InvalidRange { min, max })?;
        self.pending.widen(range);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let pending = self.pending.take();
        if let Some(span) = pending.as_range() {
            if let Err(err) = self.write_impl(span.start, span.len()) {
                self.pending.widen(pending);
                return Err(err);
            }
        }
        self.block.commit()
    }
}
