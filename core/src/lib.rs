//! Core types of the block cache.
//!
//! This crate defines how blocks are addressed within a store and how the modified ("dirty") part
//! of a block is tracked. It carries no I/O and no synchronization, so it can be shared by the
//! engine, tests and tooling alike.
//!
//! The types of this crate do not require the standard library.

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

pub mod block_id;
pub mod dirty;

pub use block_id::{BlockId, StoreId, BLOCK_BITS, BLOCK_INDEX_MASK, BLOCK_MASK, BLOCK_SIZE};
pub use dirty::DirtyRange;
