//! Pinned staging arena for BATCH and BACKGROUND payloads.
//!
//! Bulk payloads are staged here and drained in one pass by whatever
//! consumes them (an accelerator feeder or an E-class worker). The arena
//! is locked against paging for its lifetime; when the lock is denied
//! (ulimit, container policy) the region degrades to unpinned with a
//! warning rather than aborting startup.

use crate::error::{PlatformError, ReadError, WriteError};
use crate::lane::Lane;
use crate::shm::SharedRegion;
use std::sync::Arc;

/// SPSC staging arena with page-lock semantics.
pub struct PinnedRegion {
    region: Arc<SharedRegion>,
    lane: Lane,
    locked: bool,
}

impl PinnedRegion {
    /// Allocate and pin `capacity` bytes. `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Result<Self, PlatformError> {
        let region = SharedRegion::anonymous(capacity)?;
        let locked = Self::lock_pages(&region, capacity);
        if !locked {
            tracing::warn!(capacity, "mlock denied, staging region runs unpinned");
        }
        // SAFETY: the arena is exclusive to this lane and `self.region`
        // keeps the mapping alive for the lane's lifetime.
        let lane = unsafe { Lane::from_raw(region.as_ptr(), capacity) };
        Ok(Self { region, lane, locked })
    }

    #[cfg(unix)]
    fn lock_pages(region: &SharedRegion, capacity: usize) -> bool {
        // SAFETY: the range is the live mapping.
        unsafe { libc::mlock(region.as_ptr().cast(), capacity) == 0 }
    }

    #[cfg(not(unix))]
    fn lock_pages(_region: &SharedRegion, _capacity: usize) -> bool {
        false
    }

    /// True when the pages are locked against paging.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Stage one payload for deferred drain.
    pub fn stage(&self, payload: &[u8]) -> Result<(), WriteError> {
        self.lane.write(payload)
    }

    /// Drain every staged payload through `handler`, returning the count.
    pub fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let mut scratch = vec![0u8; self.lane.max_message()];
        let mut drained = 0;
        loop {
            match self.lane.read(&mut scratch) {
                Ok(n) => {
                    handler(&scratch[..n]);
                    drained += 1;
                }
                Err(ReadError::Empty) => return drained,
                Err(_) => return drained,
            }
        }
    }

    /// Staged bytes not yet drained.
    pub fn backlog(&self) -> usize {
        self.lane.len()
    }

    /// Largest accepted payload.
    pub fn max_payload(&self) -> usize {
        self.lane.max_message()
    }
}

impl Drop for PinnedRegion {
    fn drop(&mut self) {
        #[cfg(unix)]
        if self.locked {
            // SAFETY: the range was locked at construction and the mapping
            // is still alive (`self.region` drops after us).
            unsafe {
                libc::munlock(self.region.as_ptr().cast(), self.region.len());
            }
        }
    }
}
