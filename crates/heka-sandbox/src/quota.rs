//! The three resource dimensions a sandbox is metered on, and the hard
//! ceilings a caller cannot raise a sandbox's limit past.

/// Upper bound accepted for `SandboxConfig::memory_limit` (8 MiB).
pub const MAX_MEMORY_LIMIT: usize = 1024 * 1024 * 8;
/// Upper bound accepted for `SandboxConfig::instruction_limit`.
pub const MAX_INSTRUCTION_LIMIT: u32 = 1_000_000;
/// Upper bound accepted for `SandboxConfig::output_limit` (63 KiB).
pub const MAX_OUTPUT_LIMIT: usize = 1024 * 63;
/// Floor applied to a nonzero `SandboxConfig::output_limit`; the buffer
/// never shrinks below this regardless of what the caller asks for. `0` is
/// the literal "unlimited" sentinel and is left untouched by the floor.
pub const MIN_OUTPUT_LIMIT: usize = 1024;

/// The three quota dimensions a sandbox tracks usage for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageType {
    Memory,
    Instruction,
    Output,
}

/// Snapshot of one usage dimension: configured limit, current reading, and
/// the high-water mark observed since the sandbox was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub limit: u64,
    pub current: u64,
    pub maximum: u64,
}

/// Resource limits a sandbox enforces for its lifetime. Values above the
/// hard ceilings are rejected at construction rather than silently clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    pub memory_limit: usize,
    pub instruction_limit: u32,
    pub output_limit: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig { memory_limit: MAX_MEMORY_LIMIT, instruction_limit: MAX_INSTRUCTION_LIMIT, output_limit: MAX_OUTPUT_LIMIT }
    }
}

impl SandboxConfig {
    /// Validates the configuration against the hard ceilings, applying the
    /// output-limit floor to any nonzero value (`0` means unlimited and is
    /// never floored). `None` on any limit exceeding its ceiling.
    pub fn normalize(mut self) -> Option<Self> {
        if self.memory_limit > MAX_MEMORY_LIMIT
            || self.instruction_limit > MAX_INSTRUCTION_LIMIT
            || self.output_limit > MAX_OUTPUT_LIMIT
        {
            return None;
        }
        if self.output_limit != 0 && self.output_limit < MIN_OUTPUT_LIMIT {
            self.output_limit = MIN_OUTPUT_LIMIT;
        }
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_output_limit_is_left_as_the_unlimited_sentinel() {
        let config = SandboxConfig { output_limit: 0, ..SandboxConfig::default() };
        let normalized = config.normalize().unwrap();
        assert_eq!(normalized.output_limit, 0);
    }

    #[test]
    fn nonzero_output_limit_below_the_floor_is_raised() {
        let config = SandboxConfig { output_limit: 1, ..SandboxConfig::default() };
        let normalized = config.normalize().unwrap();
        assert_eq!(normalized.output_limit, MIN_OUTPUT_LIMIT);
    }
}
