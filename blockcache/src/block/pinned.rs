use super::Block;
use std::{fmt, ops::Deref, sync::Arc};

/// A pin on a [`Block`], dropped when this goes out of scope.
pub struct PinnedBlock {
    block: Arc<Block>,
}

impl PinnedBlock {
    /// Add a pin to `block`. `None` if the block is already being reclaimed.
    pub fn pin(block: &Arc<Block>) -> Option<Self> {
        block.allocate().then(|| PinnedBlock {
            block: block.clone(),
        })
    }

    /// Take ownership of a pin which was already counted, such as the one every new block is
    /// created with.
    pub fn adopt(block: Arc<Block>) -> Self {
        debug_assert!(block.use_count() > 0);
        PinnedBlock { block }
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }
}

impl Clone for PinnedBlock {
    fn clone(&self) -> Self {
        // UNWRAP: the pin held by `self` keeps the use count above zero.
        PinnedBlock::pin(&self.block).unwrap()
    }
}

impl Deref for PinnedBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}

impl Drop for PinnedBlock {
    fn drop(&mut self) {
        if let Err(err) = self.block.free() {
            tracing::error!(block_id = ?self.block.id(), %err, "failed to unpin block");
        }
    }
}

impl fmt::Debug for PinnedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PinnedBlock").field(&*self.block).finish()
    }
}
