//! Waiting for device output.
//!
//! Every session feeds the lines it receives into a [`LineStream`]. An expectation scans that
//! stream for the first line matching a [`Pattern`] and resolves exactly once: matched, timed
//! out or cancelled.

mod matcher;
mod pattern;
mod stream;

pub use matcher::{ExpectError, MatchResult, Resolution};
pub use pattern::{Pattern, Predicate};
pub use stream::{Line, LineStream, DEFAULT_CAPACITY};
