//! Single-value completion channel.
//!
//! A [`Sender`] delivers exactly one value to its [`Receiver`]. The receiver
//! is a [`Future`], so async callers can `.await` it, while synchronous
//! callers use [`Receiver::wait`]. Dropping the sender without sending
//! resolves the receiver with [`Canceled`].
//!
//! Used to turn a command completion callback into a blocking or awaitable
//! result for the caller that submitted the command.

use alloc::sync::Arc;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use super::SpinLock;

/// Error returned when the [`Sender`] was dropped without sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("oneshot sender dropped without sending")
    }
}

enum Slot<T> {
    Empty,
    Full(T),
    Taken,
    Closed,
}

struct Shared<T> {
    slot: Slot<T>,
    waker: Option<Waker>,
}

/// Creates a connected sender/receiver pair.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(SpinLock::new(Shared {
        slot: Slot::Empty,
        waker: None,
    }));
    (
        Sender {
            shared: Some(Arc::clone(&shared)),
        },
        Receiver { shared },
    )
}

/// Sending half of a oneshot channel.
pub struct Sender<T> {
    shared: Option<Arc<SpinLock<Shared<T>>>>,
}

impl<T> Sender<T> {
    /// Delivers `value` and wakes the receiver.
    pub fn send(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            Self::finish(&shared, Slot::Full(value));
        }
    }

    fn finish(shared: &SpinLock<Shared<T>>, slot: Slot<T>) {
        let waker = {
            let mut guard = shared.lock();
            guard.slot = slot;
            guard.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::finish(&shared, Slot::Closed);
        }
    }
}

/// Receiving half of a oneshot channel.
pub struct Receiver<T> {
    shared: Arc<SpinLock<Shared<T>>>,
}

impl<T> Receiver<T> {
    /// Takes the value if it has arrived.
    ///
    /// Returns `Ok(None)` while the sender is still pending.
    ///
    /// # Errors
    ///
    /// Returns [`Canceled`] if the sender was dropped, or if the value has
    /// already been taken.
    pub fn try_recv(&self) -> Result<Option<T>, Canceled> {
        let mut guard = self.shared.lock();
        match core::mem::replace(&mut guard.slot, Slot::Taken) {
            Slot::Full(value) => Ok(Some(value)),
            Slot::Empty => {
                guard.slot = Slot::Empty;
                Ok(None)
            }
            Slot::Closed | Slot::Taken => {
                guard.slot = Slot::Closed;
                Err(Canceled)
            }
        }
    }

    /// Spins until the value arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Canceled`] if the sender was dropped without sending.
    pub fn wait(self) -> Result<T, Canceled> {
        loop {
            if let Some(value) = self.try_recv()? {
                return Ok(value);
            }
            core::hint::spin_loop();
        }
    }
}

impl<T> Future for Receiver<T> {
    type Output = Result<T, Canceled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.shared.lock();
        match core::mem::replace(&mut guard.slot, Slot::Taken) {
            Slot::Full(value) => Poll::Ready(Ok(value)),
            Slot::Empty => {
                guard.slot = Slot::Empty;
                guard.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            Slot::Closed | Slot::Taken => {
                guard.slot = Slot::Closed;
                Poll::Ready(Err(Canceled))
            }
        }
    }
}
