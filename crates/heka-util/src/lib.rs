//! # heka-util
//!
//! Small platform utilities shared by the sandbox, wire-codec, matcher, and
//! plugin crates: power-of-two rounding, a monotonic clock, whole-file
//! reads, a NaN/Inf-tolerant running-stats accumulator, and the structured
//! JSONL logger used as the "host logger" threaded through plugins and
//! sandboxes.

pub mod clock;
pub mod log;
pub mod pow2;
pub mod slurp;
pub mod stats;

pub use clock::monotonic_nanos;
pub use log::{LogLevel, Logger, NullLogger, StderrLogger};
pub use pow2::next_power_of_two;
pub use stats::RunningStats;
