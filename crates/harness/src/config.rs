//! Harness configuration

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Value written into the data input before invoking
    pub input_fill: i8,

    /// Value written into the state input before invoking
    pub state_fill: i8,

    /// Output values logged after a single-shot run (0 logs all of them)
    pub output_preview: usize,

    /// Log level used by `init_logging`
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            input_fill: 3,
            state_fill: 1,
            output_preview: 0,
            log_level: "info".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `HARNESS_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(Environment::with_prefix("HARNESS").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Config for benchmarks: warn-level logging and a single-value output preview
    pub fn quiet() -> Self {
        Self {
            output_preview: 1,
            log_level: "warn".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.input_fill, 3);
        assert_eq!(config.state_fill, 1);
        assert_eq!(config.output_preview, 0);
    }

    #[test]
    fn test_quiet_keeps_fills_and_trims_preview() {
        let config = HarnessConfig::quiet();
        assert_eq!(config.output_preview, 1);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.input_fill, HarnessConfig::default().input_fill);
        assert_eq!(config.state_fill, HarnessConfig::default().state_fill);
    }

    #[test]
    fn test_load_without_overrides_is_default() {
        // No HARNESS_* variables are set in the test environment
        assert_eq!(HarnessConfig::load().unwrap(), HarnessConfig::default());
    }
}
