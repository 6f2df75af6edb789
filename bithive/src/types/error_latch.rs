//! A latch that remembers fleet errors until a clean poll cycle.
//!
//! Any device failing during a cycle raises the latch. It stays raised
//! across later cycles, even ones where the failing device has recovered
//! but another one has not, and only lowers once a whole cycle settles with
//! zero device errors.
//!
//! # State Machine
//!
//! ```text
//!           settle(errors > 0)
//!  Clear ─────────────────────► Raised ──┐
//!    ▲                            │      │ settle(errors > 0)
//!    │     settle(errors == 0)    │ ◄────┘
//!    └────────────────────────────┘
//! ```
//!
//! `settle()` returns a [`LatchStatus`] describing the transition so
//! callers can log exactly the edges (`Raised` and `Cleared`).
//!
//! A single flapping device keeps the latch raised for as long as it
//! keeps failing at least once per cycle.

/// Result of [`ErrorLatch::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchStatus {
    /// No errors this cycle, none outstanding.
    Clear,

    /// First cycle with errors after a clean one. Returned exactly once
    /// per episode.
    Raised,

    /// Still raised: this cycle had errors too.
    Held,

    /// Was raised, this cycle was clean. Returned exactly once.
    Cleared,
}

#[derive(Debug, Default)]
pub struct ErrorLatch {
    raised: bool,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the outcome of one settled cycle.
    ///
    /// | Previous | errors | Result |
    /// |----------|--------|--------|
    /// | clear | 0 | `Clear` |
    /// | clear | > 0 | `Raised` |
    /// | raised | > 0 | `Held` |
    /// | raised | 0 | `Cleared` |
    pub fn settle(&mut self, error_count: usize) -> LatchStatus {
        match (self.raised, error_count > 0) {
            (false, false) => LatchStatus::Clear,
            (false, true) => {
                self.raised = true;
                LatchStatus::Raised
            }
            (true, true) => LatchStatus::Held,
            (true, false) => {
                self.raised = false;
                LatchStatus::Cleared
            }
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised
    }
}
