/// Frame and timing ceilings for one listener (spec.md §6).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Limits {
    pub max_line_bytes: usize,
    pub max_literal_bytes: u64,
    pub command_timeout_s: u64,
    pub idle_timeout_s: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_line_bytes: 65536,
            max_literal_bytes: 10 * 1024 * 1024,
            command_timeout_s: 300,
            idle_timeout_s: 1800,
        }
    }
}
