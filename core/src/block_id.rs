//! Block addressing.
//!
//! A store is divided into fixed-size blocks of [`BLOCK_SIZE`] bytes. A [`BlockId`] packs the byte
//! address of the block within its store together with the [`StoreId`] of the owning store: the
//! address is always a multiple of [`BLOCK_SIZE`], which leaves the low [`BLOCK_BITS`] bits free to
//! carry the store id. This lets blocks of many stores share one cache keyed by block id alone.

use core::fmt;

/// The number of bits addressing a byte within a block.
pub const BLOCK_BITS: u32 = 16;

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 1 << BLOCK_BITS;

/// Mask selecting the byte offset within a block.
pub const BLOCK_INDEX_MASK: u64 = BLOCK_SIZE as u64 - 1;

/// Mask selecting the block-aligned address.
pub const BLOCK_MASK: u64 = !BLOCK_INDEX_MASK;

/// Identifies a store sharing a block cache.
///
/// Store ids fit in the low [`BLOCK_BITS`] bits of a [`BlockId`].
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
pub struct StoreId(pub u16);

impl StoreId {
    pub fn to_u16(self) -> u16 {
        self.0
    }
}

/// The stable logical address of a block.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
pub struct BlockId(u64);

impl BlockId {
    /// Create the id of the `index`-th block of the given store.
    ///
    /// Panics if the index does not fit in the address space.
    pub fn new(store_id: StoreId, index: u64) -> Self {
        assert!(
            index <= (u64::MAX >> BLOCK_BITS),
            "block index {index} out of range"
        );
        BlockId((index << BLOCK_BITS) | store_id.0 as u64)
    }

    /// Create a block id from any byte address inside the block, discarding the offset.
    pub fn from_address(address: u64, store_id: StoreId) -> Self {
        BlockId((address & BLOCK_MASK) | store_id.0 as u64)
    }

    /// Reinterpret a raw id, as previously returned by [`BlockId::to_u64`].
    pub fn from_u64(raw: u64) -> Self {
        BlockId(raw)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// The byte address of the first byte of the block within its store.
    pub fn address(self) -> u64 {
        self.0 & BLOCK_MASK
    }

    /// The index of the block within its store.
    pub fn index(self) -> u64 {
        self.0 >> BLOCK_BITS
    }

    /// The store the block belongs to.
    pub fn store_id(self) -> StoreId {
        StoreId((self.0 & BLOCK_INDEX_MASK) as u16)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}:{})", self.store_id().0, self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_matches_bits() {
        assert_eq!(BLOCK_SIZE, 65536);
        assert_eq!(BLOCK_INDEX_MASK, 0xffff);
        assert_eq!(BLOCK_MASK & BLOCK_INDEX_MASK, 0);
    }

    #[test]
    fn store_id_rides_in_low_bits() {
        let id = BlockId::new(StoreId(7), 3);
        assert_eq!(id.store_id(), StoreId(7));
        assert_eq!(id.index(), 3);
        assert_eq!(id.address(), 3 * BLOCK_SIZE as u64);
    }

    #[test]
    fn from_address_drops_offset() {
        let id = BlockId::from_address(5 * BLOCK_SIZE as u64 + 1234, StoreId(2));
        assert_eq!(id, BlockId::new(StoreId(2), 5));
    }

    #[test]
    fn ids_of_different_stores_differ() {
        assert_ne!(BlockId::new(StoreId(1), 9), BlockId::new(StoreId(2), 9));
    }
}
