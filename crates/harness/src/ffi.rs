//! C entry points
//!
//! The host runtime drives the harness through these symbols. Internal
//! results are translated to integer statuses only here. Structural
//! violations have no status: they are logged and the process aborts.

#![allow(non_snake_case)]

use crate::arena::{PROFILE_ARENA, RUN_ARENA};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, StructuralViolation};
use crate::model_data::EXAMPLE_MODEL;
use crate::profile::profile_memory_and_latency;
use crate::run::run_model;
use std::os::raw::c_int;
use std::sync::OnceLock;
use timing_bridge::HostClock;
use tracing::{error, info, warn};

/// Version of this entry-point set
pub const HARNESS_ABI_VERSION: u32 = 1;

/// Status returned across the boundary
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessStatus {
    Ok = 0,
    OpRegistrationFailed = 1,
    AllocationFailed = 2,
    InvocationFailed = 3,
    Busy = 4,
}

impl TryFrom<&HarnessError> for HarnessStatus {
    type Error = StructuralViolation;

    fn try_from(err: &HarnessError) -> Result<Self, Self::Error> {
        match err {
            HarnessError::OpRegistration(_) => Ok(HarnessStatus::OpRegistrationFailed),
            HarnessError::AllocationFailed(_) => Ok(HarnessStatus::AllocationFailed),
            HarnessError::InvocationFailed { .. } => Ok(HarnessStatus::InvocationFailed),
            HarnessError::Busy => Ok(HarnessStatus::Busy),
            HarnessError::Unrecoverable(violation) => Err(violation.clone()),
        }
    }
}

/// Status for a harness result, or the violation that must stop the process
pub fn status_of<T>(
    result: &Result<T, HarnessError>,
) -> Result<HarnessStatus, StructuralViolation> {
    match result {
        Ok(_) => Ok(HarnessStatus::Ok),
        Err(err) => HarnessStatus::try_from(err),
    }
}

fn finish<T>(result: Result<T, HarnessError>) -> c_int {
    match status_of(&result) {
        Ok(status) => {
            if let Err(err) = &result {
                warn!("{}", err);
            }
            status as c_int
        }
        Err(violation) => {
            error!("Unrecoverable: {}", violation);
            std::process::abort()
        }
    }
}

fn config() -> &'static HarnessConfig {
    static CONFIG: OnceLock<HarnessConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        HarnessConfig::load().unwrap_or_else(|e| {
            warn!("Using default harness config: {}", e);
            HarnessConfig::default()
        })
    })
}

/// Log a greeting to show the boundary is wired up
#[no_mangle]
pub extern "C" fn SayHello() {
    info!("Hello from Rust. 1+1={}", 1 + 1);
}

/// Run the embedded model `iterations` times over the static run arena
#[no_mangle]
pub extern "C" fn RunModelFromRust(iterations: c_int) -> c_int {
    let result = RUN_ARENA
        .try_lock()
        .ok_or(HarnessError::Busy)
        .and_then(|mut arena| run_model(&mut arena, EXAMPLE_MODEL, iterations, config()));
    finish(result)
}

/// Profile one invocation of the embedded model over the static profile arena
#[no_mangle]
pub extern "C" fn ProfileModelFromRust() -> c_int {
    let result = PROFILE_ARENA
        .try_lock()
        .ok_or(HarnessError::Busy)
        .and_then(|mut arena| profile_memory_and_latency(&mut arena, EXAMPLE_MODEL, HostClock));
    finish(result)
}

/// Version of the entry-point set, for the host to check before calling
#[no_mangle]
pub extern "C" fn HarnessAbiVersion() -> u32 {
    HARNESS_ABI_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use micro_engine::{BuiltinOperator, EngineError};

    #[test]
    fn test_status_codes() {
        let kernel = || EngineError::KernelFailure {
            node: 2,
            op: BuiltinOperator::Tanh,
            reason: "x".to_string(),
        };
        let cases = [
            (HarnessError::OpRegistration(EngineError::DuplicateOperator(BuiltinOperator::Add)), 1),
            (
                HarnessError::AllocationFailed(EngineError::ArenaExhausted {
                    requested: 10,
                    available: 2,
                }),
                2,
            ),
            (
                HarnessError::InvocationFailed {
                    iteration: 0,
                    source: kernel(),
                },
                3,
            ),
            (HarnessError::Busy, 4),
        ];
        for (err, code) in cases {
            assert_eq!(HarnessStatus::try_from(&err).unwrap() as c_int, code);
        }
        assert_eq!(status_of::<()>(&Ok(())), Ok(HarnessStatus::Ok));
    }

    #[test]
    fn test_unrecoverable_has_no_status() {
        let violation = StructuralViolation::SchemaVersionMismatch {
            found: 1,
            expected: 3,
        };
        let err = HarnessError::Unrecoverable(violation.clone());
        assert_eq!(HarnessStatus::try_from(&err), Err(violation));
    }

    #[test]
    fn test_run_entry_point() {
        assert_eq!(RunModelFromRust(1), 0);
        assert_eq!(RunModelFromRust(3), 0);
        assert_eq!(RunModelFromRust(0), 0);

        // A call while the arena is held is refused, not aliased
        let held = RUN_ARENA.try_lock().unwrap();
        assert_eq!(RunModelFromRust(1), HarnessStatus::Busy as c_int);
        drop(held);
        assert_eq!(RunModelFromRust(1), 0);
    }

    #[test]
    fn test_profile_entry_point() {
        assert_eq!(ProfileModelFromRust(), 0);
        let held = PROFILE_ARENA.try_lock().unwrap();
        assert_eq!(ProfileModelFromRust(), HarnessStatus::Busy as c_int);
        drop(held);
    }

    #[test]
    fn test_hello_and_abi_version() {
        SayHello();
        assert_eq!(HarnessAbiVersion(), HARNESS_ABI_VERSION);
    }
}
