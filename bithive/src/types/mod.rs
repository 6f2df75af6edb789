//! Small value types shared across the crate.

pub mod difficulty;
pub mod error_latch;

pub use difficulty::{BestDifficulty, format_difficulty, parse_difficulty};
pub use error_latch::{ErrorLatch, LatchStatus};
