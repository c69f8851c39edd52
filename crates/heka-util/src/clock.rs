//! Monotonic nanosecond clock, best-effort across platforms.

use std::time::Instant;

/// Nanoseconds since an arbitrary, process-local epoch. Only differences
/// between two calls are meaningful; the absolute value carries no wall-clock
/// semantics. Used by the plugin shell's `process_message`/`timer_event`
/// timing and by `Sandbox::usage` profiling.
pub fn monotonic_nanos() -> u64 {
    thread_local! {
        static EPOCH: Instant = Instant::now();
    }
    EPOCH.with(|epoch| epoch.elapsed().as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_nondecreasing() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
    }
}
