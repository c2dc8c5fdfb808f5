//! Core support library for the ATA driver stack.
//!
//! Provides the leveled logging facade ([`klog!`] and friends) and the
//! synchronization primitives the drivers build on: [`sync::SpinLock`],
//! the [`sync::oneshot`] completion channel and [`block_on`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block_on;
pub mod log;
pub mod sync;

pub use block_on::block_on;
