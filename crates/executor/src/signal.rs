//! One-shot completion broadcast built on channel close semantics.
//!
//! Closing the sending half of an [`async_channel`] causes every clone of
//! the receiving half to resolve its pending and future `recv()` calls with
//! [`async_channel::RecvError`]. A [`Signal`] uses that behaviour directly
//! instead of a dedicated watch/broadcast primitive: `fulfill()` closes the
//! channel, and any number of [`SignalWait`] clones taken beforehand observe
//! the fulfillment simultaneously.

use async_channel::{Receiver, RecvError, Sender};

/// The fulfilling half of a one-shot signal.
///
/// Dropping a `Signal` without calling [`Signal::fulfill`] also closes the
/// channel (the last sender going away closes it too), so waiters are never
/// left hanging if the signal itself is discarded.
#[derive(Debug)]
pub struct Signal {
    sender: Sender<()>,
    waiter: Receiver<()>,
}

/// The waiting half of a one-shot signal. Cheap to clone; every clone
/// observes the same fulfillment.
#[derive(Debug, Clone)]
pub struct SignalWait {
    receiver: Receiver<()>,
}

impl Signal {
    /// Creates a fresh, unfulfilled signal.
    pub fn new() -> Self {
        let (sender, waiter) = async_channel::bounded(1);
        Self { sender, waiter }
    }

    /// Returns a waiter that resolves once this signal is fulfilled.
    pub fn waiter(&self) -> SignalWait {
        SignalWait {
            receiver: self.waiter.clone(),
        }
    }

    /// Marks the signal fulfilled. Idempotent: fulfilling an
    /// already-fulfilled signal is a no-op.
    pub fn fulfill(&self) {
        self.sender.close();
    }

    /// True once [`Signal::fulfill`] has been called.
    pub fn is_fulfilled(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalWait {
    /// Waits for the signal to be fulfilled. Resolves immediately if it
    /// already was.
    pub async fn wait(&self) {
        match self.receiver.recv().await {
            Ok(()) => unreachable!("signal channel never carries a value"),
            Err(RecvError) => {}
        }
    }

    /// True if the signal has already been fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        self.receiver.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilling_wakes_all_waiters() {
        let signal = Signal::new();
        let a = signal.waiter();
        let b = signal.waiter();
        assert!(!a.is_fulfilled());

        signal.fulfill();

        a.wait().await;
        b.wait().await;
        assert!(a.is_fulfilled());
        assert!(b.is_fulfilled());
    }

    #[tokio::test]
    async fn fulfill_is_idempotent() {
        let signal = Signal::new();
        signal.fulfill();
        signal.fulfill();
        signal.waiter().wait().await;
    }

    #[tokio::test]
    async fn waiter_taken_after_fulfillment_resolves_immediately() {
        let signal = Signal::new();
        signal.fulfill();
        let late = signal.waiter();
        late.wait().await;
    }

    #[tokio::test]
    async fn dropping_signal_releases_waiters() {
        let signal = Signal::new();
        let waiter = signal.waiter();
        drop(signal);
        waiter.wait().await;
    }
}
