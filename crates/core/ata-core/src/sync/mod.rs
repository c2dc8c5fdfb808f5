//! Synchronization primitives for the ATA driver stack.
//!
//! Provides [`SpinLock`] for guarding channel state that is touched from both
//! the submission path and the interrupt path, and [`oneshot`] for handing a
//! single completion from a callback back to a waiting caller.

pub mod oneshot;
mod spinlock;

#[cfg(test)]
pub(crate) mod test_waker;

pub use spinlock::{SpinLock, SpinLockGuard};
