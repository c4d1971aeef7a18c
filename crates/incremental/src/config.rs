//! Runtime configuration for pipelines.

/// Pipeline runtime options.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Sample every N-th `add` into a user-supplied aggregate and check
    /// that `add(v); remove(v)` leaves `result()` unchanged. Violations are
    /// logged and counted, never rejected.
    pub inverse_check_interval: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inverse_check_interval: if cfg!(debug_assertions) { Some(64) } else { None },
        }
    }
}

impl PipelineConfig {
    /// Checks every `interval`-th custom aggregate add; 0 disables checks.
    pub fn with_inverse_check(mut self, interval: u32) -> Self {
        self.inverse_check_interval = (interval > 0).then_some(interval);
        self
    }

    /// Disables inverse-law sampling.
    pub fn without_inverse_check(mut self) -> Self {
        self.inverse_check_interval = None;
        self
    }
}
