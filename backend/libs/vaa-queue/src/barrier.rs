//! Per-batch completion barrier
//!
//! Every emitted message holds one [`BarrierSlot`]. The polling loop waits on the
//! barrier of the current batch before fetching again. A fresh barrier is created
//! per batch, so late releases from an abandoned batch never affect the next one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct BatchBarrier {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl BatchBarrier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(self: &Arc<Self>) -> BarrierSlot {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        BarrierSlot {
            barrier: Some(Arc::clone(self)),
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Resolves once every registered slot has been released.
    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// One outstanding message. Released exactly once, explicitly or on drop.
#[derive(Debug)]
pub(crate) struct BarrierSlot {
    barrier: Option<Arc<BatchBarrier>>,
}

impl BarrierSlot {
    pub(crate) fn release(mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.release();
        }
    }
}

impl Drop for BarrierSlot {
    fn drop(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.release();
        }
    }
}
