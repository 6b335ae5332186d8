//! Menu item identifier allocation.

use std::sync::atomic::{AtomicU32, Ordering};

/// ID reserved for the root menu ("no parent").
pub const ROOT_ID: u32 = 0;

/// Highest ID ever issued. `u32::MAX` is what the platform reports for
/// "no entry chosen".
pub const LAST_ID: u32 = u32::MAX - 1;

/// Issues strictly increasing menu item IDs, starting at 1.
///
/// IDs are never reused, so a click that races with a removal can only
/// ever resolve to the removed item (and be dropped), never to a newer
/// item that happens to share its number.
#[derive(Debug, Default)]
pub struct IdAllocator {
    current: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next ID, or `None` once [`LAST_ID`] has been issued.
    pub fn next(&self) -> Option<u32> {
        self.current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < LAST_ID).then_some(current + 1)
            })
            .ok()
            .map(|prev| prev + 1)
    }

    #[cfg(test)]
    pub(crate) fn starting_after(current: u32) -> Self {
        Self {
            current: AtomicU32::new(current),
        }
    }

    /// Returns the most recently allocated ID (0 if none yet).
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }
}
