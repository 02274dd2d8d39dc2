//! Host runtime configuration

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// Host runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Invocations per benchmark round
    pub bench_iterations: i32,

    /// Benchmark rounds after the single-shot and profiling calls
    pub bench_rounds: u32,

    /// Print the profile report as JSON
    pub report_json: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bench_iterations: 100,
            bench_rounds: 3,
            report_json: false,
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `HOST_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(Environment::with_prefix("HOST").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
