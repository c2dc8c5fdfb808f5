//! Blocking sync-async bridge.
//!
//! Provides [`block_on`] for driving a future to completion from
//! synchronous code, such as a device nub waiting for a command it queued
//! on its channel.

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll, Waker};

/// Poll a future to completion, spinning between polls.
///
/// Progress must come from another context (an interrupt handler or a
/// second thread), since this never yields the current one.
pub fn block_on<T>(future: impl Future<Output = T>) -> T {
    let mut cx = Context::from_waker(Waker::noop());
    let mut future = pin!(future);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(val) => return val,
            Poll::Pending => core::hint::spin_loop(),
        }
    }
}
