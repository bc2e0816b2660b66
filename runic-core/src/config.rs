//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Default cap on flush passes per phase before an update is declared runaway.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 1000;

/// Settings for one [`Runtime`](crate::Runtime).
///
/// Missing fields fall back to their defaults, so a host can load a partial
/// document:
///
/// ```rust
/// use runic_core::RuntimeConfig;
///
/// let config: RuntimeConfig = serde_json::from_str(r#"{ "inspect": false }"#).unwrap();
/// assert!(!config.inspect);
/// assert_eq!(config.max_flush_passes, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Passes one phase of a flush may take before failing with
    /// [`ReactiveError::RunawayUpdate`](crate::ReactiveError::RunawayUpdate).
    pub max_flush_passes: usize,

    /// Whether the `log*` instrumentation entry points emit anything.
    pub inspect: bool,
}

impl RuntimeConfig {
    /// Override the pass limit.
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }

    /// Enable or disable instrumentation.
    pub fn with_inspect(mut self, inspect: bool) -> Self {
        self.inspect = inspect;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            inspect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_flush_passes, DEFAULT_MAX_FLUSH_PASSES);
        assert!(config.inspect);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{ "max_flush_passes": 8 }"#).unwrap();
        assert_eq!(config.max_flush_passes, 8);
        assert!(config.inspect);
    }

    #[test]
    fn pass_limit_is_at_least_one() {
        let config = RuntimeConfig::default().with_max_flush_passes(0);
        assert_eq!(config.max_flush_passes, 1);
    }
}
