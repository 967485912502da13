//! Tracking of the modified byte range of a block.

use crate::block_id::BLOCK_SIZE;
use core::ops::Range;

/// A half-open byte range `[min, max)` within a block that was modified since the last flush.
///
/// The clean state is represented as `min == BLOCK_SIZE && max == 0`, so that widening a clean
/// range by any non-empty range yields exactly that range.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
pub struct DirtyRange {
    min: u32,
    max: u32,
}

impl DirtyRange {
    /// The empty range.
    pub const fn clean() -> Self {
        DirtyRange {
            min: BLOCK_SIZE as u32,
            max: 0,
        }
    }

    /// Create a range covering `[min, max)`. Returns `None` if the bounds are reversed or fall
    /// outside the block.
    pub fn new(min: usize, max: usize) -> Option<Self> {
        if min > max || max > BLOCK_SIZE {
            return None;
        }
        if min == max {
            return Some(Self::clean());
        }
        Some(DirtyRange {
            min: min as u32,
            max: max as u32,
        })
    }

    pub fn min(&self) -> usize {
        self.min as usize
    }

    pub fn max(&self) -> usize {
        self.max as usize
    }

    pub fn is_clean(&self) -> bool {
        self.max <= self.min
    }

    /// Widen this range to the union of itself and `other`.
    ///
    /// The union of two disjoint ranges also covers the gap between them.
    pub fn widen(&mut self, other: DirtyRange) {
        if other.is_clean() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Return the current range and reset `self` to clean.
    pub fn take(&mut self) -> DirtyRange {
        core::mem::replace(self, DirtyRange::clean())
    }

    /// The range as byte offsets, or `None` if clean.
    pub fn as_range(&self) -> Option<Range<usize>> {
        if self.is_clean() {
            None
        } else {
            Some(self.min()..self.max())
        }
    }

    pub fn len(&self) -> usize {
        self.as_range().map_or(0, |r| r.len())
    }
}

impl Default for DirtyRange {
    fn default() -> Self {
        DirtyRange::clean()
    }
}

impl core::fmt::Debug for DirtyRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.as_range() {
            Some(r) => write!(f, "DirtyRange({}..{})", r.start, r.end),
            None => write!(f, "DirtyRange(clean)"),
        }
    }
}
