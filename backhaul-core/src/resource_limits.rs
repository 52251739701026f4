//! Per-session stream cap
//!
//! Every live logical stream, opened or accepted, holds one [`StreamPermit`].
//! Dropping the stream returns the slot.

use backhaul_common::MuxError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct StreamLimits {
    slots: Arc<Semaphore>,
    max_streams: usize,
}

impl StreamLimits {
    #[must_use]
    pub fn new(max_streams: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_streams)),
            max_streams,
        }
    }

    /// Take a slot, or [`MuxError::StreamsExhausted`] when all are in use.
    pub fn try_acquire_stream(&self) -> Result<StreamPermit, MuxError> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .map(|permit| StreamPermit { _permit: permit })
            .map_err(|_| MuxError::StreamsExhausted)
    }

    /// Streams currently holding a slot
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.max_streams - self.slots.available_permits()
    }

    #[must_use]
    pub fn max_streams(&self) -> usize {
        self.max_streams
    }
}

/// A held stream slot; released on drop
#[derive(Debug)]
pub struct StreamPermit {
    _permit: OwnedSemaphorePermit,
}
