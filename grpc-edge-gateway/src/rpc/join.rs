//! Counting join barrier
//!
//! Used by the duplex shape: the stream may only be closed once every
//! participant (send side, receive side) has arrived.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct JoinBarrier {
    remaining: AtomicUsize,
    notify: Notify,
}

impl JoinBarrier {
    pub fn new(participants: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(participants),
            notify: Notify::new(),
        })
    }

    /// Signal that one participant is done. Extra arrivals are ignored.
    pub fn arrive(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Wait until every participant has arrived
    pub async fn wait(&self) {
        loop {
            // Register before checking so a concurrent last arrival is not missed
            let notified = self.notify.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    /// A guard that arrives when dropped, so early returns and panics still count
    pub fn guard(self: &Arc<Self>) -> ArrivalGuard {
        ArrivalGuard { barrier: Some(Arc::clone(self)) }
    }
}

#[derive(Debug)]
pub struct ArrivalGuard {
    barrier: Option<Arc<JoinBarrier>>,
}

impl ArrivalGuard {
    pub fn arrive(mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.arrive();
        }
    }
}

impl Drop for ArrivalGuard {
    fn drop(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.arrive();
        }
    }
}
