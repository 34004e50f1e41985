//! Chain tip state and the coalescing gate for tip refreshes.

use std::sync::{Mutex, MutexGuard};

use bitcoin::BlockHash;

/// What the service currently believes about the best chain.
#[derive(Debug, Default)]
pub struct ChainTip {
    pub height: u32,
    /// Hash of the last block a tip update was applied for.
    pub processed: Option<BlockHash>,
    /// Raw hash bytes of the last `hashblock` notification handled.
    pub last_seen: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Slot<T> {
    busy: bool,
    pending: Option<T>,
}

/// Collapses a burst of requests into at most one running job plus one
/// queued follow-up carrying the latest request.
///
/// A caller that gets its item back from [`Coalescer::submit`] owns the
/// drain: it runs the job, then calls [`Coalescer::finish`] and keeps going while that
/// yields another item.
#[derive(Debug)]
pub struct Coalescer<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                busy: false,
                pending: None,
            }),
        }
    }

    /// Offer `item`. Returns it back when the caller should run it now;
    /// otherwise it replaces whatever was queued.
    pub fn submit(&self, item: T) -> Option<T> {
        let mut slot = self.lock();
        if slot.busy {
            slot.pending = Some(item);
            None
        } else {
            slot.busy = true;
            Some(item)
        }
    }

    /// Called by the drain owner after each run. Returns the next queued
    /// item, or releases the gate.
    pub fn finish(&self) -> Option<T> {
        let mut slot = self.lock();
        match slot.pending.take() {
            Some(next) => Some(next),
            None => {
                slot.busy = false;
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}
