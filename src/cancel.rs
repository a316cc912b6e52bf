//! Cooperative cancellation token (spec.md §5).
//!
//! Propagated into every sync call; checked between SELECT rows, between
//! batched bulk ops, and between per-folder loops. Cancellation never
//! leaves partial state committed — callers discard whatever they were
//! accumulating and return [`crate::error::StoreError::Cancelled`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    flag: Arc<AtomicBool>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Call at a suspension point; turns a live cancellation into an error.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
