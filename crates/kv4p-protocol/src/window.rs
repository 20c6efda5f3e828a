//! Credit-based flow control for host-to-dongle traffic.
//!
//! The dongle advertises a receive window in its `VERSION` frame and tops it
//! up with `WINDOW_UPDATE` frames as it drains its input buffer. Every frame
//! the host writes costs its full wire length in credit.
//!
//! Credit is signed: when the dongle stays silent for too long the IO task
//! sends the head of its queue anyway, overdrawing the window, and a later
//! update brings it back above zero.

/// Credit assumed before the dongle reports its window size.
pub const DEFAULT_WINDOW: u32 = 1024;

/// Send credit, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    credit: i64,
}

impl FlowWindow {
    pub fn new(size: u32) -> Self {
        FlowWindow {
            credit: i64::from(size),
        }
    }

    /// Remaining credit. Negative after a forced send.
    pub fn credit(&self) -> i64 {
        self.credit
    }

    /// Returns `true` if a frame of `len` wire bytes fits.
    pub fn can_send(&self, len: usize) -> bool {
        i64::try_from(len).is_ok_and(|len| len <= self.credit)
    }

    /// Charge `len` bytes.
    pub fn consume(&mut self, len: usize) {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        self.credit = self.credit.saturating_sub(len);
    }

    /// Add `delta` bytes from a `WINDOW_UPDATE`.
    pub fn replenish(&mut self, delta: u32) {
        self.credit = self.credit.saturating_add(i64::from(delta));
    }

    /// Replace the credit with a freshly advertised window size.
    pub fn reset(&mut self, size: u32) {
        self.credit = i64::from(size);
    }
}

impl Default for FlowWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
