//! Execution Harness
//!
//! Runs the embedded model on the micro engine, either plainly (single
//! shot or iterated) or under the profiler, and exposes both modes to a
//! host runtime through C entry points.

pub mod arena;
pub mod config;
pub mod error;
pub mod ffi;
pub mod model_data;
pub mod ops;
pub mod profile;
pub mod run;

pub use arena::{ArenaCell, PROFILE_ARENA_SIZE, RUN_ARENA_SIZE};
pub use crate::config::HarnessConfig;
pub use error::{HarnessError, StructuralViolation};
pub use ffi::{HARNESS_ABI_VERSION, HarnessStatus};
pub use model_data::EXAMPLE_MODEL;
pub use ops::register_ops;
pub use profile::{ProfileReport, profile_memory_and_latency};
pub use run::{RunReport, run_model};

use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging at `level` ("trace" to "error"; anything else is info).
///
/// Later calls keep the first subscriber.
pub fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Tracing subscriber already set");
    }
}
